use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Code contains disallowed token: {0}")]
    PolicyViolation(String),

    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: u32, message: String },

    #[error("Unsafe or unsupported construct: {0}")]
    UnsafeConstruct(String),

    #[error("Error during execution: {message}\n{trace}")]
    Execution { message: String, trace: String },

    #[error("Execution budget exhausted after {limit} operations")]
    Budget { limit: u64 },

    #[error("Wall-clock deadline of {0:?} exceeded")]
    Deadline(std::time::Duration),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Code generation API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    /// Stable short name for logging and presentation.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::PolicyViolation(_) => "policy_violation",
            SandboxError::Syntax { .. } => "syntax_error",
            SandboxError::UnsafeConstruct(_) => "unsafe_construct",
            SandboxError::Execution { .. } => "execution_error",
            SandboxError::Budget { .. } => "budget_exhausted",
            SandboxError::Deadline(_) => "deadline_exceeded",
            SandboxError::Configuration(_) => "configuration_error",
            SandboxError::Api(_) => "api_error",
            SandboxError::Http(_) => "http_error",
            SandboxError::Json(_) => "json_error",
        }
    }
}
