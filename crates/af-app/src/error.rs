//! Error types for the af-app service layer.

/// Application error wrapping errors from the backend crates into a
/// unified interface for frontends.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Executable error: {0}")]
    Exec(String),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for af-app operations.
pub type AppResult<T> = Result<T, AppError>;

// Conversions from backend error types
impl From<af_exec::ExecError> for AppError {
    fn from(err: af_exec::ExecError) -> Self {
        AppError::Exec(err.to_string())
    }
}

impl From<af_results::ResultsError> for AppError {
    fn from(err: af_results::ResultsError) -> Self {
        AppError::Results(err.to_string())
    }
}
