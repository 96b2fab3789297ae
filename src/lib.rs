pub mod api;
pub mod breakdown_editor;
pub mod config;
pub mod database;
pub mod errors;
pub mod feedback_parser;
pub mod grade_parser;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod models;
pub mod session;
pub mod student_service;

pub use api::{AppState, create_router};
pub use breakdown_editor::{BreakdownDraft, DraftState};
pub use config::Config;
pub use database::{Database, ExamWrite};
pub use errors::*;
pub use feedback_parser::split_feedback;
pub use grade_parser::{parse_grading_result, parse_grading_text, total_marks};
pub use llm_providers::{LLMProvider, LLMProviderFactory, LLMProviderType, PdfAttachment};
pub use llm_service::LLMService;
pub use models::*;
pub use session::{SessionContext, SessionState, SessionStore};
pub use student_service::StudentService;
