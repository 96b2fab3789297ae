use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::breakdown_editor::BreakdownDraft;
use crate::database::{Database, ExamWrite};
use crate::grade_parser::parse_grading_text;
use crate::models::*;
use crate::session::{hash_password, verify_password};

// Import logging macros
use crate::{log_service_start, log_service_success, log_service_warn};

#[derive(Clone)]
pub struct StudentService {
    db: Database,
}

impl StudentService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // Student records
    pub async fn create_student(&self, request: CreateStudentRequest) -> Result<Student> {
        let request = CreateStudentRequest {
            register_no: request.register_no.trim().to_string(),
            name: request.name.trim().to_string(),
            class_name: request.class_name.trim().to_string(),
        };
        self.db.create_student(request).await
    }

    pub async fn get_student(&self, id: Uuid) -> Result<Option<Student>> {
        self.db.get_student(id).await
    }

    pub async fn get_student_by_register_no(&self, register_no: &str) -> Result<Option<Student>> {
        self.db.get_student_by_register_no(register_no.trim()).await
    }

    pub async fn list_class(&self, class_name: &str) -> Result<Vec<Student>> {
        self.db.get_students_by_class(class_name).await
    }

    /// Turn one model reply into an unsaved draft; nothing is written
    pub fn grade_draft(student: &Student, exam: ExamField, raw_text: &str, used_default_key: bool) -> GradedDraft {
        let outcome = parse_grading_text(raw_text);
        let needs_manual_review = outcome.needs_manual_review();
        let draft = BreakdownDraft::from_ai(exam, outcome.clone().into_result());
        let update = draft.commit();

        GradedDraft {
            student_id: student.id,
            exam,
            outcome,
            total: update.total,
            breakdown: update.breakdown,
            needs_manual_review,
            used_default_key,
        }
    }

    /// Persist a submitted breakdown; the stored total is always recomputed from its marks
    pub async fn save_exam(
        &self,
        student_id: Uuid,
        exam: ExamField,
        breakdown: Vec<QuestionRecord>,
        expected_version: Option<i64>,
    ) -> Result<ExamWrite> {
        let mut draft = BreakdownDraft::from_submission(exam, breakdown, None);
        self.save_draft(student_id, &mut draft, expected_version).await
    }

    /// Commit an edited draft; on a successful write the draft moves to `Saved`
    pub async fn save_draft(
        &self,
        student_id: Uuid,
        draft: &mut BreakdownDraft,
        expected_version: Option<i64>,
    ) -> Result<ExamWrite> {
        log_service_start!("student_service", "save_exam", student_id = student_id);
        let started = Instant::now();
        let exam = draft.exam();

        let update = draft.commit();
        let write = self.db.update_exam(student_id, &update, expected_version).await?;

        match &write {
            ExamWrite::Updated(_) => {
                draft.mark_saved(update.total);
                log_service_success!(
                    "student_service",
                    "save_exam",
                    student_id = student_id,
                    duration_ms = started.elapsed().as_millis() as u64
                );
            }
            ExamWrite::VersionConflict { current_version } => {
                log_service_warn!(
                    "student_service",
                    "save_exam",
                    format!(
                        "version conflict for {} {}: expected {:?}, stored {}",
                        student_id, exam, expected_version, current_version
                    )
                );
            }
            ExamWrite::NotFound => {
                log_service_warn!("student_service", "save_exam", format!("student {} not found", student_id));
            }
        }

        Ok(write)
    }

    /// Totals per exam for the student view; ungraded exams read "N/A"
    pub async fn marks_view(&self, register_no: &str) -> Result<Option<StudentMarks>> {
        let Some(student) = self.get_student_by_register_no(register_no).await? else {
            return Ok(None);
        };

        let marks: HashMap<String, serde_json::Value> = ExamField::ALL
            .iter()
            .map(|exam| {
                let value = match student.total(*exam) {
                    Some(total) => json!(total),
                    None => json!("N/A"),
                };
                (exam.label().to_string(), value)
            })
            .collect();

        Ok(Some(StudentMarks {
            name: student.name,
            marks,
        }))
    }

    pub async fn breakdown_view(&self, register_no: &str, exam: ExamField) -> Result<Option<StudentBreakdown>> {
        Ok(self
            .get_student_by_register_no(register_no)
            .await?
            .map(|student| StudentBreakdown {
                exam,
                breakdown: student.breakdown(exam).to_vec(),
                name: student.name,
            }))
    }

    // Accounts
    pub async fn register_user(&self, request: CreateUserRequest) -> Result<User> {
        log_service_start!("student_service", "register_user");
        let password_hash = hash_password(&request.password)?;
        let register_no = request
            .register_no
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let user = self
            .db
            .create_user(&request.email, password_hash, request.role, request.classes, register_no)
            .await?;

        log_service_success!("student_service", "register_user", format!("{} account created", user.role.as_str()));
        Ok(user)
    }

    /// No accounts yet means the first one may be created without signing in
    pub async fn has_accounts(&self) -> Result<bool> {
        Ok(self.db.count_users().await? > 0)
    }

    /// `None` covers both an unknown email and a wrong password
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.db.get_user_by_email(email).await? else {
            return Ok(None);
        };

        if verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }
}
