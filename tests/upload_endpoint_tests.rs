use axum::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use axum_test::TestServer;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use grading_system::{
    Database, LLMService, SessionStore, StudentService,
    api::*,
    config::{GradingConfig, LLMConfig},
    llm_providers::LLMProviderType,
};
use serde_json::{Value, json};

// Nothing listens on the discard port, so every model call fails fast
async fn create_test_server(provider: LLMProviderType) -> TestServer {
    create_test_server_with_key(provider, "test_key").await
}

async fn create_test_server_with_key(provider: LLMProviderType, api_key: &str) -> TestServer {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let llm_service = LLMService::new(&LLMConfig {
        api_key: api_key.to_string(),
        base_url: Some("http://127.0.0.1:9".to_string()),
        provider,
        model: None,
        timeout_secs: 5,
    })
    .unwrap();

    let app_state = AppState {
        student_service: StudentService::new(db),
        llm_service,
        sessions: SessionStore::new(),
        grading: GradingConfig::default(),
    };

    TestServer::new(create_router(app_state)).unwrap()
}

fn sample_pdf() -> String {
    STANDARD.encode(b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n")
}

#[tokio::test]
async fn test_grade_upload_requires_pdf() {
    let server = create_test_server(LLMProviderType::Gemini).await;

    for body in [json!({}), json!({"pdf": ""}), json!({"pdf": null, "keyData": "Q1: cells"})] {
        let response = server.post("/api/gemini").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>(), json!({"error": "PDF data is required"}));
    }
}

#[tokio::test]
async fn test_grade_upload_rejects_non_pdf() {
    let server = create_test_server(LLMProviderType::Gemini).await;

    let response = server
        .post("/api/gemini")
        .json(&json!({"pdf": STANDARD.encode(b"just some text")}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("not a PDF"));
    assert!(body.get("response").is_none());

    let response = server.post("/api/keyAnalyser").json(&json!({"pdf": "%%%"})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_grade_upload_surfaces_model_failure() {
    for provider in [LLMProviderType::Gemini, LLMProviderType::OpenAI] {
        let server = create_test_server(provider).await;

        let response = server
            .post("/api/gemini")
            .json(&json!({"pdf": sample_pdf(), "keyData": "1. Mitochondria"}))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert!(body["error"].is_string(), "provider {:?}", provider);
        assert!(body.get("response").is_none());
    }
}

#[tokio::test]
async fn test_model_failure_never_echoes_api_key() {
    for provider in [LLMProviderType::Gemini, LLMProviderType::OpenAI] {
        let server = create_test_server_with_key(provider, "SUPERSECRETKEY").await;

        let responses = [
            server
                .post("/api/gemini")
                .json(&json!({"pdf": sample_pdf(), "keyData": "1. Mitochondria"}))
                .await,
            server.post("/api/keyAnalyser").json(&json!({"pdf": sample_pdf()})).await,
            server
                .post("/api/feedback")
                .json(&json!({"name": "Asha", "scores": {"UT1": 40}}))
                .await,
        ];

        for response in responses {
            response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
            let text = response.text();
            assert!(!text.contains("SUPERSECRETKEY"), "provider {:?} leaked key: {}", provider, text);
            assert!(!text.contains("127.0.0.1"), "provider {:?} leaked upstream url: {}", provider, text);
        }
    }
}

#[tokio::test]
async fn test_key_extraction_surfaces_model_failure() {
    let server = create_test_server(LLMProviderType::Gemini).await;

    let response = server.post("/api/keyAnalyser").json(&json!({"pdf": sample_pdf()})).await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.json::<Value>()["error"].is_string());
}

#[tokio::test]
async fn test_feedback_requires_name_and_scores() {
    let server = create_test_server(LLMProviderType::Gemini).await;

    for body in [
        json!({}),
        json!({"name": "Asha"}),
        json!({"scores": {"UT1": 40}}),
        json!({"name": "  ", "scores": {"UT1": 40}}),
    ] {
        let response = server.post("/api/feedback").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>(), json!({"error": "Missing required fields"}));
    }
}

#[tokio::test]
async fn test_feedback_surfaces_model_failure() {
    let server = create_test_server(LLMProviderType::Gemini).await;

    let response = server
        .post("/api/feedback")
        .json(&json!({"name": "Asha", "scores": {"UT1": 40, "CAT1": 35, "UT2": 42, "CAT2": 48}}))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert!(body["error"].is_string());
    assert!(body.get("feedback").is_none());
}

#[tokio::test]
async fn test_enveloped_grading_reports_service_unavailable() {
    let server = create_test_server(LLMProviderType::Gemini).await;

    server
        .post("/api/users")
        .json(&json!({"email": "t@school.test", "password": "pw", "role": "teacher", "classes": ["10A"]}))
        .await
        .assert_status_ok();
    let login: Value = server
        .post("/api/auth/login")
        .json(&json!({"email": "t@school.test", "password": "pw"}))
        .await
        .json();
    let token = format!("Bearer {}", login["data"]["session_id"].as_str().unwrap());

    let student: Value = server
        .post("/api/students")
        .add_header(AUTHORIZATION, HeaderValue::from_str(&token).unwrap())
        .json(&json!({"registerNo": "REG001", "name": "Asha", "class": "10A"}))
        .await
        .json();
    let id = student["data"]["id"].as_str().unwrap();

    let response = server
        .post(&format!("/api/students/{}/exams/UT1/grade", id))
        .add_header(AUTHORIZATION, HeaderValue::from_str(&token).unwrap())
        .json(&json!({"pdf": sample_pdf()}))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "AI service temporarily unavailable. Please try again.");

    let response = server
        .post(&format!("/api/students/{}/exams/UT1/grade", id))
        .add_header(AUTHORIZATION, HeaderValue::from_str(&token).unwrap())
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    // A failed grading call leaves the record untouched
    let stored: Value = server
        .get(&format!("/api/students/{}", id))
        .add_header(AUTHORIZATION, HeaderValue::from_str(&token).unwrap())
        .await
        .json();
    assert_eq!(stored["data"]["UT1"], Value::Null);
    assert_eq!(stored["data"]["version"], 0);
}
