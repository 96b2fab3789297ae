use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

/// Outcome of a conditional exam write
#[derive(Debug, Clone)]
pub enum ExamWrite {
    Updated(Student),
    NotFound,
    VersionConflict { current_version: i64 },
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every in-memory connection is its own database, so tests share one
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().max_connections(5).connect_with(options).await?
        };
        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migrate", "schema ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                register_no TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                class_name TEXT NOT NULL,
                ut1 INTEGER,
                cat1 INTEGER,
                ut2 INTEGER,
                cat2 INTEGER,
                ut1_breakdown TEXT NOT NULL DEFAULT '[]',
                cat1_breakdown TEXT NOT NULL DEFAULT '[]',
                ut2_breakdown TEXT NOT NULL DEFAULT '[]',
                cat2_breakdown TEXT NOT NULL DEFAULT '[]',
                version INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_students_class ON students (class_name)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                classes TEXT NOT NULL DEFAULT '[]',
                register_no TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Student operations
    pub async fn create_student(&self, request: CreateStudentRequest) -> Result<Student> {
        let student = Student {
            id: Uuid::new_v4(),
            register_no: request.register_no,
            name: request.name,
            class_name: request.class_name,
            ut1: None,
            cat1: None,
            ut2: None,
            cat2: None,
            ut1_breakdown: Vec::new(),
            cat1_breakdown: Vec::new(),
            ut2_breakdown: Vec::new(),
            cat2_breakdown: Vec::new(),
            version: 0,
            updated_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO students (id, register_no, name, class_name, version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(student.id.to_string())
        .bind(&student.register_no)
        .bind(&student.name)
        .bind(&student.class_name)
        .bind(student.version)
        .bind(student.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(student)
    }

    pub async fn get_student(&self, id: Uuid) -> Result<Option<Student>> {
        let row = sqlx::query("SELECT * FROM students WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_student(&row)).transpose()
    }

    pub async fn get_student_by_register_no(&self, register_no: &str) -> Result<Option<Student>> {
        let row = sqlx::query("SELECT * FROM students WHERE register_no = ?1")
            .bind(register_no)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_student(&row)).transpose()
    }

    pub async fn get_students_by_class(&self, class_name: &str) -> Result<Vec<Student>> {
        let started = std::time::Instant::now();
        let rows = sqlx::query("SELECT * FROM students WHERE class_name = ?1 ORDER BY register_no")
            .bind(class_name)
            .fetch_all(&self.pool)
            .await?;

        let students = rows.iter().map(row_to_student).collect::<Result<Vec<_>>>()?;
        log_db_operation!(
            debug,
            "get_students_by_class",
            count = students.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(students)
    }

    /// Write one exam slot. With `expected_version` the write only lands if nobody
    /// saved in between; without it the last write wins.
    pub async fn update_exam(
        &self,
        student_id: Uuid,
        update: &ExamUpdate,
        expected_version: Option<i64>,
    ) -> Result<ExamWrite> {
        let (total_column, breakdown_column) = exam_columns(update.exam);
        let breakdown_json = serde_json::to_string(&update.breakdown)?;
        let now = Utc::now().to_rfc3339();

        let sql = match expected_version {
            Some(_) => format!(
                "UPDATE students SET {total_column} = ?1, {breakdown_column} = ?2, \
                 version = version + 1, updated_at = ?3 WHERE id = ?4 AND version = ?5"
            ),
            None => format!(
                "UPDATE students SET {total_column} = ?1, {breakdown_column} = ?2, \
                 version = version + 1, updated_at = ?3 WHERE id = ?4"
            ),
        };

        let mut query = sqlx::query(&sql)
            .bind(update.total)
            .bind(&breakdown_json)
            .bind(&now)
            .bind(student_id.to_string());
        if let Some(version) = expected_version {
            query = query.bind(version);
        }
        let result = query.execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Ok(match self.get_student(student_id).await? {
                Some(current) => ExamWrite::VersionConflict {
                    current_version: current.version,
                },
                None => ExamWrite::NotFound,
            });
        }

        match self.get_student(student_id).await? {
            Some(student) => Ok(ExamWrite::Updated(student)),
            None => Ok(ExamWrite::NotFound),
        }
    }

    // User operations
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: String,
        role: Role,
        classes: Vec<String>,
        register_no: Option<String>,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            password_hash,
            role,
            classes,
            register_no,
        };

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, role, classes, register_no) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(serde_json::to_string(&user.classes)?)
        .bind(&user.register_no)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn count_users(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_user(&row)).transpose()
    }
}

fn exam_columns(exam: ExamField) -> (&'static str, &'static str) {
    match exam {
        ExamField::Ut1 => ("ut1", "ut1_breakdown"),
        ExamField::Cat1 => ("cat1", "cat1_breakdown"),
        ExamField::Ut2 => ("ut2", "ut2_breakdown"),
        ExamField::Cat2 => ("cat2", "cat2_breakdown"),
    }
}

fn breakdown_from_row(row: &SqliteRow, column: &str) -> Result<Vec<QuestionRecord>> {
    let raw: String = row.get(column);
    Ok(serde_json::from_str(&raw)?)
}

fn row_to_student(row: &SqliteRow) -> Result<Student> {
    Ok(Student {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        register_no: row.get("register_no"),
        name: row.get("name"),
        class_name: row.get("class_name"),
        ut1: row.get("ut1"),
        cat1: row.get("cat1"),
        ut2: row.get("ut2"),
        cat2: row.get("cat2"),
        ut1_breakdown: breakdown_from_row(row, "ut1_breakdown")?,
        cat1_breakdown: breakdown_from_row(row, "cat1_breakdown")?,
        ut2_breakdown: breakdown_from_row(row, "ut2_breakdown")?,
        cat2_breakdown: breakdown_from_row(row, "cat2_breakdown")?,
        version: row.get("version"),
        updated_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))?
            .with_timezone(&Utc),
    })
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get::<String, _>("role").parse()?,
        classes: serde_json::from_str(&row.get::<String, _>("classes"))?,
        register_no: row.get("register_no"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn new_student(register_no: &str, class_name: &str) -> CreateStudentRequest {
        CreateStudentRequest {
            register_no: register_no.to_string(),
            name: format!("Student {register_no}"),
            class_name: class_name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_student_round_trip() {
        let db = test_db().await;
        let created = db.create_student(new_student("REG001", "10A")).await.unwrap();

        let by_id = db.get_student(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.register_no, "REG001");
        assert_eq!(by_id.ut1, None);
        assert!(by_id.ut1_breakdown.is_empty());

        let by_register = db.get_student_by_register_no("REG001").await.unwrap().unwrap();
        assert_eq!(by_register.id, created.id);

        assert!(db.get_student_by_register_no("MISSING").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_register_no_fails() {
        let db = test_db().await;
        db.create_student(new_student("REG001", "10A")).await.unwrap();

        let err = db.create_student(new_student("REG001", "10B")).await.unwrap_err();
        assert!(err.to_string().to_lowercase().contains("unique"));
    }

    #[tokio::test]
    async fn test_class_filter_is_exact() {
        let db = test_db().await;
        db.create_student(new_student("REG002", "10A")).await.unwrap();
        db.create_student(new_student("REG001", "10A")).await.unwrap();
        db.create_student(new_student("REG003", "10AB")).await.unwrap();

        let students = db.get_students_by_class("10A").await.unwrap();
        let registers: Vec<&str> = students.iter().map(|s| s.register_no.as_str()).collect();
        assert_eq!(registers, vec!["REG001", "REG002"]);
    }

    #[tokio::test]
    async fn test_update_exam_writes_only_that_slot() {
        let db = test_db().await;
        let student = db.create_student(new_student("REG001", "10A")).await.unwrap();

        let update = ExamUpdate {
            exam: ExamField::Cat1,
            total: 14,
            breakdown: vec![QuestionRecord::new("1", 8, ""), QuestionRecord::new("2", 6, "vague")],
        };
        let written = match db.update_exam(student.id, &update, None).await.unwrap() {
            ExamWrite::Updated(student) => student,
            other => panic!("unexpected write outcome: {other:?}"),
        };

        assert_eq!(written.cat1, Some(14));
        assert_eq!(written.cat1_breakdown, update.breakdown);
        assert_eq!(written.ut1, None);
        assert_eq!(written.version, 1);
    }

    #[tokio::test]
    async fn test_update_exam_version_check() {
        let db = test_db().await;
        let student = db.create_student(new_student("REG001", "10A")).await.unwrap();
        let update = ExamUpdate {
            exam: ExamField::Ut1,
            total: 5,
            breakdown: vec![QuestionRecord::new("1", 5, "")],
        };

        assert!(matches!(
            db.update_exam(student.id, &update, Some(0)).await.unwrap(),
            ExamWrite::Updated(_)
        ));
        assert!(matches!(
            db.update_exam(student.id, &update, Some(0)).await.unwrap(),
            ExamWrite::VersionConflict { current_version: 1 }
        ));
        assert!(matches!(
            db.update_exam(Uuid::new_v4(), &update, None).await.unwrap(),
            ExamWrite::NotFound
        ));
    }

    #[tokio::test]
    async fn test_user_lookup_is_case_insensitive() {
        let db = test_db().await;
        db.create_user(
            "Teacher@School.org",
            "hash".to_string(),
            Role::Teacher,
            vec!["10A".to_string()],
            None,
        )
        .await
        .unwrap();

        let user = db.get_user_by_email("teacher@school.org").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Teacher);
        assert_eq!(user.classes, vec!["10A".to_string()]);
    }
}
