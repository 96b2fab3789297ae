//! Standardized logging macros and subscriber setup.
//!
//! The macros keep field names consistent across handlers and services:
//! `operation`, `student_id`, `register_no`, `exam`, `error`.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, student_id = $student_id:expr, exam = $exam:expr) => {
        tracing::debug!(
            operation = $operation,
            student_id = %$student_id,
            exam = %$exam,
            "API operation started"
        );
    };
    ($operation:expr, student_id = $student_id:expr) => {
        tracing::debug!(
            operation = $operation,
            student_id = %$student_id,
            "API operation started"
        );
    };
    ($operation:expr, register_no = $register_no:expr) => {
        tracing::debug!(
            operation = $operation,
            register_no = %$register_no,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(operation = $operation, "API operation started");
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, student_id = $student_id:expr, exam = $exam:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            student_id = %$student_id,
            exam = %$exam,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, student_id = $student_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            student_id = %$student_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(operation = $operation, "API operation completed: {}", $msg);
    };
}

/// Log API operation errors with consistent structure
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, student_id = $student_id:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            student_id = %$student_id,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
}

/// Log API warnings with context
#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, student_id = $student_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            student_id = %$student_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, register_no = $register_no:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            register_no = %$register_no,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(operation = $operation, "API operation warning: {}", $msg);
    };
}

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, student_id = $student_id:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            student_id = %$student_id,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation started"
        );
    };
}

#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, student_id = $student_id:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            student_id = %$student_id,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation completed: {}", $msg
        );
    };
}

#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(
            service = $service,
            operation = $operation,
            "Service warning: {}",
            $msg
        );
    };
}

// ============================================================================
// Database Operation Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
    (error, $operation:expr, error = $error:expr) => {
        tracing::error!(
            component = "database",
            operation = $operation,
            error = %$error,
            "Database operation failed"
        );
    };
}

// ============================================================================
// LLM Service Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, provider = $provider:expr, attachment_bytes = $bytes:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            attachment_bytes = $bytes,
            "LLM operation started"
        );
    };
    (success, $operation:expr, provider = $provider:expr, duration_ms = $duration:expr, response_length = $len:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            duration_ms = $duration,
            response_length = $len,
            "LLM operation completed successfully"
        );
    };
    (error, $operation:expr, provider = $provider:expr, error = $error:expr) => {
        tracing::error!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            error = %$error,
            "LLM operation failed"
        );
    };
    (warn, $operation:expr, $msg:expr) => {
        tracing::warn!(
            component = "llm_service",
            operation = $operation,
            "LLM operation warning: {}", $msg
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

// ============================================================================
// Validation Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}

/// Install console and/or daily-rolling file output.
///
/// The returned guard flushes the file writer on drop and must live as long as the process.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new("info,grading_system=debug"));

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    let (file_layer, guard) = if config.file_enabled {
        if let Err(e) = std::fs::create_dir_all(&config.log_directory) {
            eprintln!("Warning: Could not create logs directory: {}", e);
        }
        let file_appender =
            tracing_appender::rolling::daily(&config.log_directory, "grading-system.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(non_blocking_file);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    log_system_event!(
        startup,
        component = "logging",
        format!("logging initialized (directory: {})", config.log_directory)
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    #[test]
    fn test_logging_macros_compile() {
        let student_id = Uuid::new_v4();
        let error = anyhow::anyhow!("test error");

        log_api_start!("grade_upload", student_id = student_id);
        log_api_start!("get_marks", register_no = "REG001");
        log_api_start!("save_breakdown", student_id = student_id, exam = "UT1");
        log_api_start!("list_students");

        log_api_success!("grade_upload", student_id = student_id, "graded");
        log_api_success!("save_breakdown", student_id = student_id, exam = "UT1", "saved");
        log_api_success!("list_students", count = 5, "students listed");
        log_api_success!("login", "session created");

        log_api_warn!("get_student", student_id = student_id, "not found");
        log_api_warn!("get_marks", register_no = "REG001", "not found");
        log_api_warn!("login", "bad credentials");

        log_api_error!("save_breakdown", student_id = student_id, error = error, "write failed");
        log_api_error!("list_students", error = error, "query failed");

        log_service_start!("student_service", "save_exam", student_id = student_id);
        log_service_start!("student_service", "import");
        log_service_success!("student_service", "save_exam", student_id = student_id, duration_ms = 3);
        log_service_success!("student_service", "import", "done");
        log_service_warn!("student_service", "save_exam", "version conflict");

        log_db_operation!(debug, "get_students_by_class", count = 3, duration_ms = 1);
        log_db_operation!(info, "migrate", "schema ready");
        log_db_operation!(error, "update_exam", error = error);

        log_llm_operation!(start, "grade_answer_sheet", provider = "Gemini", attachment_bytes = 1024);
        log_llm_operation!(
            success,
            "grade_answer_sheet",
            provider = "Gemini",
            duration_ms = 1500,
            response_length = 20
        );
        log_llm_operation!(error, "grade_answer_sheet", provider = "Gemini", error = error);
        log_llm_operation!(warn, "grade_answer_sheet", "empty response");

        log_system_event!(startup, component = "server", "server starting");
        log_system_event!(config, "configuration loaded successfully");

        log_validation!(success, "configuration", "validated");
        log_validation!(failure, "pdf_upload", error = error);
    }
}
