use meltsbatch::core::error::AppError;
use meltsbatch::core::process::ProcessError;
use meltsbatch::core::types::{ErrorCategory, ErrorSeverity, JobStatus};
use std::path::PathBuf;

#[test]
fn test_error_creation_all_categories() {
    let categories = vec![
        ErrorCategory::ValidationError,
        ErrorCategory::SerializationError,
        ErrorCategory::IoError,
        ErrorCategory::WorkspaceError,
        ErrorCategory::ProcessError,
        ErrorCategory::TimeoutError,
        ErrorCategory::InternalError,
        ErrorCategory::Unknown,
    ];

    for category in categories {
        let error = AppError::new(category, "test message");
        assert_eq!(error.category, category);
        assert_eq!(error.message, "test message");
        assert!(error.context.is_empty());
        assert!(error.recovery_suggestions.is_empty());
        assert!(error.occurred_at <= chrono::Utc::now());
        assert!(error.source.is_none());
        assert!(error.code.starts_with("ERR-"));
    }
}

#[test]
fn test_error_severity_mapping() {
    let test_cases = vec![
        (ErrorCategory::ValidationError, ErrorSeverity::Error),
        (ErrorCategory::ProcessError, ErrorSeverity::Error),
        (ErrorCategory::WorkspaceError, ErrorSeverity::Error),
        (ErrorCategory::TimeoutError, ErrorSeverity::Warning),
        (ErrorCategory::Unknown, ErrorSeverity::Info),
    ];

    for (category, expected) in test_cases {
        assert_eq!(AppError::new(category, "x").severity(), expected);
    }
}

#[test]
fn test_builder_methods_and_display() {
    let mut error = AppError::new(ErrorCategory::WorkspaceError, "cannot create job dir")
        .with_code("WS-001")
        .with_context("cd /tmp/batch/abc && run -m a.melts -f environment.txt")
        .with_suggestion("Check permissions on the batch root");
    error.add_context("hash", "abc");

    assert_eq!(error.code, "WS-001");
    assert_eq!(error.context.len(), 2);
    assert_eq!(error.recovery_suggestions.len(), 1);

    let rendered = error.to_string();
    assert!(rendered.starts_with("[WS-001] WorkspaceError: cannot create job dir"));
    assert!(rendered.contains("hash"));
}

#[test]
fn test_conversions() {
    let io_error: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert_eq!(io_error.category, ErrorCategory::IoError);
    assert!(io_error.source.is_some());

    let json_error: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert_eq!(json_error.category, ErrorCategory::SerializationError);

    let anyhow_error: AppError = anyhow::anyhow!("wrapped").into();
    assert_eq!(anyhow_error.category, ErrorCategory::InternalError);
    assert_eq!(anyhow_error.message, "wrapped");
}

#[test]
fn test_process_errors_map_to_process_category() {
    let cases = vec![
        (
            ProcessError::MissingExecutable(PathBuf::from("/nope")),
            "PROC-001",
        ),
        (ProcessError::NotExecutable(PathBuf::from("/etc/hosts")), "PROC-001"),
        (ProcessError::MissingPipe("stdout"), "PROC-003"),
        (
            ProcessError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )),
            "PROC-004",
        ),
        (ProcessError::Terminated, "PROC-005"),
    ];

    for (error, code) in cases {
        let message = error.to_string();
        let app: AppError = error.into();
        assert_eq!(app.category, ErrorCategory::ProcessError);
        assert_eq!(app.code, code);
        assert_eq!(app.message, message);
        assert!(app.source.is_some());
    }
}

#[test]
fn test_job_status_display() {
    assert_eq!(JobStatus::Completed.to_string(), "completed");
    assert_eq!(JobStatus::TimedOut.to_string(), "timed out");
    assert_eq!(JobStatus::Failed.to_string(), "failed");
    assert_eq!(JobStatus::Skipped.to_string(), "skipped");
}
