use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::Json,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::GradingConfig,
    database::ExamWrite,
    errors::{ApiError, ApiResult, ErrorContext, ErrorResponse, classify_database_error},
    llm_providers::PdfAttachment,
    llm_service::LLMService,
    models::*,
    session::{SessionContext, SessionStore},
    student_service::StudentService,
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn, log_validation};

#[derive(Clone)]
pub struct AppState {
    pub student_service: StudentService,
    pub llm_service: LLMService,
    pub sessions: SessionStore,
    pub grading: GradingConfig,
}

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub session_id: Uuid,
    pub role: Role,
    pub classes: Vec<String>,
    pub register_no: Option<String>,
}

// ----------------------------------------------------------------------------
// Session helpers
// ----------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| Uuid::parse_str(token.trim()).ok())
}

fn resolve_session(state: &AppState, headers: &HeaderMap, operation: &str) -> Result<SessionContext, ErrorResponse> {
    let Some(session_id) = bearer_token(headers) else {
        return Ok(SessionContext::unauthenticated());
    };

    state.sessions.resolve(session_id).map_err(|e| {
        ApiError::InternalError(e.to_string()).to_response_with_context(ErrorContext::new(operation, "session"))
    })
}

pub fn require_session(state: &AppState, headers: &HeaderMap, operation: &str) -> Result<SessionContext, ErrorResponse> {
    let session = resolve_session(state, headers, operation)?;
    if session.is_authenticated() {
        Ok(session)
    } else {
        Err(ApiError::Unauthorized("Sign in to continue".to_string())
            .to_response_with_context(ErrorContext::new(operation, "session")))
    }
}

pub fn require_teacher(state: &AppState, headers: &HeaderMap, operation: &str) -> Result<SessionContext, ErrorResponse> {
    let session = require_session(state, headers, operation)?;
    if session.is_teacher() {
        Ok(session)
    } else {
        Err(ApiError::Forbidden("Teacher access required".to_string())
            .to_response_with_context(ErrorContext::new(operation, "session")))
    }
}

fn require_register_access(
    state: &AppState,
    headers: &HeaderMap,
    operation: &str,
    register_no: &str,
) -> Result<SessionContext, ErrorResponse> {
    let session = require_session(state, headers, operation)?;
    if session.can_view_register(register_no) {
        Ok(session)
    } else {
        log_api_warn!(operation, register_no = register_no, "register number outside session scope");
        Err(ApiError::Forbidden("You may only view your own results".to_string())
            .to_response_with_context(ErrorContext::new(operation, "student").with_id(register_no)))
    }
}

fn parse_exam(exam: &str, operation: &str) -> Result<ExamField, ErrorResponse> {
    exam.parse::<ExamField>().map_err(|e| {
        ApiError::ValidationError(e.to_string()).to_response_with_context(ErrorContext::new(operation, "exam").with_id(exam))
    })
}

fn student_not_found(operation: &str, id: &str) -> ErrorResponse {
    ApiError::NotFound(format!("Student '{}' not found", id))
        .to_response_with_context(ErrorContext::new(operation, "Student").with_id(id))
}

fn database_failure(operation: &str, id: Option<&str>, error: anyhow::Error) -> ErrorResponse {
    let context = ErrorContext::new(operation, "student");
    let context = match id {
        Some(id) => context.with_id(id),
        None => context,
    };
    ApiError::DatabaseError(error).to_response_with_context(context)
}

fn answer_key_or_default(key_data: Option<String>, grading: &GradingConfig) -> (String, bool) {
    match key_data {
        Some(key) if !key.trim().is_empty() => (key, false),
        _ => (grading.default_answer_key.clone(), true),
    }
}

fn feedback_entries(feedback: &FeedbackMap) -> Vec<ExamFeedback> {
    feedback
        .iter()
        .map(|(exam, text)| ExamFeedback {
            exam: exam.to_string(),
            feedback: text.to_string(),
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Upload endpoints, `{ response }` / `{ feedback }` / `{ error }` on the wire
// ----------------------------------------------------------------------------

fn text_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<TextResponse>) {
    (status, Json(TextResponse::Error { error: message.into() }))
}

fn attachment_from_request(pdf: Option<String>, operation: &str) -> Result<PdfAttachment, (StatusCode, Json<TextResponse>)> {
    let pdf = pdf.filter(|data| !data.trim().is_empty());
    let Some(pdf) = pdf else {
        log_api_warn!(operation, "request carried no PDF");
        return Err(text_error(StatusCode::BAD_REQUEST, "PDF data is required"));
    };

    PdfAttachment::from_base64(&pdf).map_err(|e| {
        log_validation!(failure, "pdf_upload", error = e);
        text_error(StatusCode::BAD_REQUEST, e.to_string())
    })
}

pub async fn grade_with_key(
    State(state): State<AppState>,
    Json(request): Json<GradeWithKeyRequest>,
) -> (StatusCode, Json<TextResponse>) {
    log_api_start!("grade_with_key");

    let attachment = match attachment_from_request(request.pdf, "grade_with_key") {
        Ok(attachment) => attachment,
        Err(rejection) => return rejection,
    };
    let (answer_key, used_default) = answer_key_or_default(request.key_data, &state.grading);
    debug!(used_default_key = used_default, "Answer key resolved");

    match state.llm_service.grade_answer_sheet(&attachment, &answer_key).await {
        Ok(response) => {
            log_api_success!("grade_with_key", "answer sheet graded");
            (StatusCode::OK, Json(TextResponse::Response { response }))
        }
        Err(e) => {
            log_api_error!("grade_with_key", error = e, "model call failed");
            text_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn extract_key_text(
    State(state): State<AppState>,
    Json(request): Json<ExtractKeyRequest>,
) -> (StatusCode, Json<TextResponse>) {
    log_api_start!("extract_key_text");

    let attachment = match attachment_from_request(request.pdf, "extract_key_text") {
        Ok(attachment) => attachment,
        Err(rejection) => return rejection,
    };

    match state.llm_service.extract_answer_key(&attachment).await {
        Ok(response) => {
            log_api_success!("extract_key_text", "answer key extracted");
            (StatusCode::OK, Json(TextResponse::Response { response }))
        }
        Err(e) => {
            log_api_error!("extract_key_text", error = e, "model call failed");
            text_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn narrative_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> (StatusCode, Json<FeedbackResponse>) {
    log_api_start!("narrative_feedback");

    let name = request.name.filter(|name| !name.trim().is_empty());
    let (Some(name), Some(scores)) = (name, request.scores) else {
        log_api_warn!("narrative_feedback", "missing name or scores");
        return (
            StatusCode::BAD_REQUEST,
            Json(FeedbackResponse::Error {
                error: "Missing required fields".to_string(),
            }),
        );
    };

    match state.llm_service.generate_feedback(&name, &scores).await {
        Ok(feedback) => {
            log_api_success!("narrative_feedback", count = feedback.len(), "feedback generated");
            (StatusCode::OK, Json(FeedbackResponse::Feedback { feedback }))
        }
        Err(e) => {
            log_api_error!("narrative_feedback", error = e, "model call failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(FeedbackResponse::Error { error: e.to_string() }),
            )
        }
    }
}

// ----------------------------------------------------------------------------
// Auth endpoints
// ----------------------------------------------------------------------------

pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<User> {
    log_api_start!("create_user");

    // Only the very first account may be created anonymously
    match state.student_service.has_accounts().await {
        Ok(true) => {
            require_teacher(&state, &headers, "create_user")?;
        }
        Ok(false) => info!("No accounts yet; creating bootstrap account"),
        Err(e) => return Err(database_failure("create_user", None, e)),
    }

    let validation = if !request.email.contains('@') {
        Some("A valid email address is required")
    } else if request.password.is_empty() {
        Some("Password must not be empty")
    } else if request.role == Role::Student
        && request.register_no.as_deref().map(str::trim).unwrap_or_default().is_empty()
    {
        Some("Student accounts need a register number")
    } else {
        None
    };
    if let Some(message) = validation {
        return Err(ApiError::ValidationError(message.to_string())
            .to_response_with_context(ErrorContext::new("create_user", "user")));
    }

    let email = request.email.clone();
    match state.student_service.register_user(request).await {
        Ok(user) => {
            log_api_success!("create_user", "user created");
            Ok(Json(ApiResponse::success(user)))
        }
        Err(e) => Err(classify_database_error(&e)
            .to_response_with_context(ErrorContext::new("create_user", "user").with_id(&email))),
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    log_api_start!("login");

    let user = match state.student_service.authenticate(&request.email, &request.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            log_api_warn!("login", "invalid credentials");
            return Err(ApiError::Unauthorized("Invalid email or password".to_string())
                .to_response_with_context(ErrorContext::new("login", "session")));
        }
        Err(e) => return Err(database_failure("login", None, e)),
    };

    let session = state.sessions.create(&user).map_err(|e| {
        ApiError::InternalError(e.to_string()).to_response_with_context(ErrorContext::new("login", "session"))
    })?;
    info!(session_id = %session.session_id, role = user.role.as_str(), "Session created");

    Ok(Json(ApiResponse::success(LoginResponse {
        session_id: session.session_id,
        role: user.role,
        classes: session.classes,
        register_no: session.register_no,
    })))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<bool> {
    let session = require_session(&state, &headers, "logout")?;

    let terminated = state.sessions.terminate(session.session_id).map_err(|e| {
        ApiError::InternalError(e.to_string()).to_response_with_context(ErrorContext::new("logout", "session"))
    })?;
    log_api_success!("logout", "session terminated");
    Ok(Json(ApiResponse::success(terminated)))
}

pub async fn current_session(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<SessionContext> {
    let session = require_session(&state, &headers, "current_session")?;
    Ok(Json(ApiResponse::success(session)))
}

// ----------------------------------------------------------------------------
// Teacher endpoints
// ----------------------------------------------------------------------------

pub async fn teacher_classes(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<String>> {
    let session = require_teacher(&state, &headers, "teacher_classes")?;
    log_api_success!("teacher_classes", count = session.classes.len(), "classes listed");
    Ok(Json(ApiResponse::success(session.classes)))
}

pub async fn create_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateStudentRequest>,
) -> ApiResult<Student> {
    require_teacher(&state, &headers, "create_student")?;
    log_api_start!("create_student", register_no = request.register_no);

    if request.register_no.trim().is_empty() || request.name.trim().is_empty() || request.class_name.trim().is_empty() {
        return Err(ApiError::ValidationError("registerNo, name and class are required".to_string())
            .to_response_with_context(ErrorContext::new("create_student", "student")));
    }

    let register_no = request.register_no.clone();
    match state.student_service.create_student(request).await {
        Ok(student) => {
            log_api_success!("create_student", student_id = student.id, "student created");
            Ok(Json(ApiResponse::success(student)))
        }
        Err(e) => Err(classify_database_error(&e)
            .to_response_with_context(ErrorContext::new("create_student", "student").with_id(&register_no))),
    }
}

pub async fn list_class_students(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(class_name): Path<String>,
) -> ApiResult<Vec<Student>> {
    require_teacher(&state, &headers, "list_class_students")?;
    log_api_start!("list_class_students");

    match state.student_service.list_class(&class_name).await {
        Ok(students) => {
            log_api_success!("list_class_students", count = students.len(), "students listed");
            Ok(Json(ApiResponse::success(students)))
        }
        Err(e) => {
            log_api_error!("list_class_students", error = e, "query failed");
            Err(database_failure("list_class_students", Some(&class_name), e))
        }
    }
}

pub async fn get_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Student> {
    require_teacher(&state, &headers, "get_student")?;
    log_api_start!("get_student", student_id = id);

    match state.student_service.get_student(id).await {
        Ok(Some(student)) => Ok(Json(ApiResponse::success(student))),
        Ok(None) => {
            log_api_warn!("get_student", student_id = id, "student not found");
            Err(student_not_found("get_student", &id.to_string()))
        }
        Err(e) => Err(database_failure("get_student", Some(&id.to_string()), e)),
    }
}

pub async fn grade_student_exam(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, exam)): Path<(Uuid, String)>,
    Json(request): Json<GradeWithKeyRequest>,
) -> ApiResult<GradedDraft> {
    require_teacher(&state, &headers, "grade_student_exam")?;
    let exam = parse_exam(&exam, "grade_student_exam")?;
    log_api_start!("grade_student_exam", student_id = id, exam = exam);

    let attachment = match request.pdf.as_deref().map(str::trim).filter(|pdf| !pdf.is_empty()) {
        Some(pdf) => PdfAttachment::from_base64(pdf).map_err(|e| {
            ApiError::ValidationError(e.to_string())
                .to_response_with_context(ErrorContext::new("grade_student_exam", "pdf"))
        })?,
        None => {
            return Err(ApiError::ValidationError("PDF data is required".to_string())
                .to_response_with_context(ErrorContext::new("grade_student_exam", "pdf")));
        }
    };

    let student = match state.student_service.get_student(id).await {
        Ok(Some(student)) => student,
        Ok(None) => return Err(student_not_found("grade_student_exam", &id.to_string())),
        Err(e) => return Err(database_failure("grade_student_exam", Some(&id.to_string()), e)),
    };

    let (answer_key, used_default_key) = answer_key_or_default(request.key_data, &state.grading);
    let raw_text = state
        .llm_service
        .grade_answer_sheet(&attachment, &answer_key)
        .await
        .map_err(|e| {
            log_api_error!("grade_student_exam", student_id = id, error = e, "model call failed");
            ApiError::LLMError(e.to_string())
                .to_response_with_context(ErrorContext::new("grade_student_exam", "grading").with_id(&id.to_string()))
        })?;

    let draft = StudentService::grade_draft(&student, exam, &raw_text, used_default_key);
    if draft.needs_manual_review {
        log_api_warn!("grade_student_exam", student_id = id, "model reply had no question marks; manual review needed");
    }
    log_api_success!("grade_student_exam", student_id = id, exam = exam, format!("draft total {}", draft.total));
    Ok(Json(ApiResponse::success(draft)))
}

pub async fn save_student_exam(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, exam)): Path<(Uuid, String)>,
    Json(request): Json<SaveBreakdownRequest>,
) -> ApiResult<Student> {
    require_teacher(&state, &headers, "save_student_exam")?;
    let exam = parse_exam(&exam, "save_student_exam")?;
    log_api_start!("save_student_exam", student_id = id, exam = exam);

    let write = state
        .student_service
        .save_exam(id, exam, request.breakdown, request.expected_version)
        .await
        .map_err(|e| {
            log_api_error!("save_student_exam", student_id = id, error = e, "write failed");
            database_failure("save_student_exam", Some(&id.to_string()), e)
        })?;

    match write {
        ExamWrite::Updated(student) => {
            log_api_success!("save_student_exam", student_id = id, exam = exam, "breakdown saved");
            Ok(Json(ApiResponse::success(student)))
        }
        ExamWrite::NotFound => Err(student_not_found("save_student_exam", &id.to_string())),
        ExamWrite::VersionConflict { current_version } => Err(ApiError::Conflict(format!(
            "Record was modified by another save (current version {})",
            current_version
        ))
        .to_response_with_context(ErrorContext::new("save_student_exam", "student").with_id(&id.to_string()))),
    }
}

pub async fn student_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<FeedbackMap> {
    require_teacher(&state, &headers, "student_feedback")?;
    log_api_start!("student_feedback", student_id = id);

    let student = match state.student_service.get_student(id).await {
        Ok(Some(student)) => student,
        Ok(None) => return Err(student_not_found("student_feedback", &id.to_string())),
        Err(e) => return Err(database_failure("student_feedback", Some(&id.to_string()), e)),
    };

    let feedback = state
        .llm_service
        .generate_feedback(&student.name, &student.exam_scores())
        .await
        .map_err(|e| {
            ApiError::LLMError(e.to_string())
                .to_response_with_context(ErrorContext::new("student_feedback", "feedback").with_id(&id.to_string()))
        })?;

    log_api_success!("student_feedback", student_id = id, "feedback generated");
    Ok(Json(ApiResponse::success(feedback)))
}

// ----------------------------------------------------------------------------
// Student views, keyed by register number
// ----------------------------------------------------------------------------

pub async fn register_marks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(register_no): Path<String>,
) -> ApiResult<StudentMarks> {
    require_register_access(&state, &headers, "register_marks", &register_no)?;
    log_api_start!("register_marks", register_no = register_no);

    match state.student_service.marks_view(&register_no).await {
        Ok(Some(marks)) => Ok(Json(ApiResponse::success(marks))),
        Ok(None) => Err(student_not_found("register_marks", &register_no)),
        Err(e) => Err(database_failure("register_marks", Some(&register_no), e)),
    }
}

pub async fn register_breakdown(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((register_no, exam)): Path<(String, String)>,
) -> ApiResult<StudentBreakdown> {
    require_register_access(&state, &headers, "register_breakdown", &register_no)?;
    let exam = parse_exam(&exam, "register_breakdown")?;
    log_api_start!("register_breakdown", register_no = register_no);

    match state.student_service.breakdown_view(&register_no, exam).await {
        Ok(Some(view)) => Ok(Json(ApiResponse::success(view))),
        Ok(None) => Err(student_not_found("register_breakdown", &register_no)),
        Err(e) => Err(database_failure("register_breakdown", Some(&register_no), e)),
    }
}

pub async fn register_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(register_no): Path<String>,
) -> ApiResult<Vec<ExamFeedback>> {
    require_register_access(&state, &headers, "register_feedback", &register_no)?;
    log_api_start!("register_feedback", register_no = register_no);

    let student = match state.student_service.get_student_by_register_no(&register_no).await {
        Ok(Some(student)) => student,
        Ok(None) => return Err(student_not_found("register_feedback", &register_no)),
        Err(e) => return Err(database_failure("register_feedback", Some(&register_no), e)),
    };

    let feedback = state
        .llm_service
        .generate_feedback(&student.name, &student.exam_scores())
        .await
        .map_err(|e| {
            ApiError::LLMError(e.to_string())
                .to_response_with_context(ErrorContext::new("register_feedback", "feedback").with_id(&register_no))
        })?;

    let entries = feedback_entries(&feedback);
    log_api_success!("register_feedback", count = entries.len(), "feedback generated");
    Ok(Json(ApiResponse::success(entries)))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Upload routes
        .route("/api/gemini", post(grade_with_key))
        .route("/api/keyAnalyser", post(extract_key_text))
        .route("/api/feedback", post(narrative_feedback))

        // Auth routes
        .route("/api/users", post(create_user))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(current_session))

        // Teacher routes
        .route("/api/teacher/classes", get(teacher_classes))
        .route("/api/students", post(create_student))
        .route("/api/classes/:class_name/students", get(list_class_students))
        .route("/api/students/:id", get(get_student))
        .route("/api/students/:id/feedback", get(student_feedback))
        .route("/api/students/:id/exams/:exam/grade", post(grade_student_exam))
        .route("/api/students/:id/exams/:exam", put(save_student_exam))

        // Student view routes
        .route("/api/register/:register_no/marks", get(register_marks))
        .route("/api/register/:register_no/exams/:exam/breakdown", get(register_breakdown))
        .route("/api/register/:register_no/feedback", get(register_feedback))

        .with_state(state)
}
