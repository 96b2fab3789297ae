use grading_system::{CreateStudentRequest, Database, ExamField, ExamUpdate, ExamWrite, QuestionRecord, Role};
use uuid::Uuid;

fn request(register_no: &str, class_name: &str) -> CreateStudentRequest {
    CreateStudentRequest {
        register_no: register_no.to_string(),
        name: "Asha".to_string(),
        class_name: class_name.to_string(),
    }
}

#[tokio::test]
async fn test_database_connection_failure() {
    let result = Database::new("sqlite:/nonexistent-directory/grades/grading_system.db").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_duplicate_register_no_is_rejected() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    db.create_student(request("REG001", "10A")).await.unwrap();

    let error = db.create_student(request("REG001", "10B")).await.unwrap_err();
    assert!(format!("{:#}", error).to_lowercase().contains("unique constraint"));

    let stored = db.get_student_by_register_no("REG001").await.unwrap().unwrap();
    assert_eq!(stored.class_name, "10A");
}

#[tokio::test]
async fn test_duplicate_email_is_rejected_case_insensitively() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    db.create_user("teacher@school.test", "hash".to_string(), Role::Teacher, vec![], None)
        .await
        .unwrap();

    let result = db
        .create_user("TEACHER@school.test", "hash".to_string(), Role::Teacher, vec![], None)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_long_breakdowns_round_trip() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let student = db.create_student(request("REG001", "10A")).await.unwrap();

    let breakdown: Vec<QuestionRecord> = (1..=200)
        .map(|q| QuestionRecord::new(q.to_string(), q % 11, "x".repeat(500)))
        .collect();
    let update = ExamUpdate {
        exam: ExamField::Cat2,
        total: breakdown.iter().map(|r| r.marks).sum(),
        breakdown: breakdown.clone(),
    };

    let ExamWrite::Updated(saved) = db.update_exam(student.id, &update, None).await.unwrap() else {
        panic!("expected saved record");
    };
    assert_eq!(saved.cat2_breakdown, breakdown);
    assert_eq!(saved.cat2, Some(update.total));
}

#[tokio::test]
async fn test_lookups_for_missing_records() {
    let db = Database::new("sqlite::memory:").await.unwrap();

    assert!(db.get_student(Uuid::new_v4()).await.unwrap().is_none());
    assert!(db.get_student_by_register_no("NOPE").await.unwrap().is_none());
    assert!(db.get_students_by_class("10A").await.unwrap().is_empty());
    assert!(db.get_user_by_email("nobody@school.test").await.unwrap().is_none());
}
