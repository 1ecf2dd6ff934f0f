use thiserror::Error;

#[derive(Debug, Error)]
pub enum DroverError {
    // Matcher errors
    #[error("Pattern matcher used before build()")]
    NotBuilt,

    // Invocation errors
    #[error("Invocation timed out after {timeout_ms}ms")]
    InvokeTimeout { timeout_ms: u64 },

    #[error("Invocation failed: {0}")]
    InvokeFailure(String),

    #[error("Structured output parse error: {0}")]
    Parse(String),

    #[error("Retries exhausted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<DroverError>,
    },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Missing params for tool {tool}: {}", missing.join(", "))]
    MissingToolParams { tool: String, missing: Vec<String> },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    // Graph errors
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Step not found in graph: {0}")]
    StepNotFound(String),

    #[error("Branch '{label}' from step '{step}' has no mapped target")]
    BranchNotMapped { step: String, label: String },

    #[error("Graph exceeded step limit ({0})")]
    StepLimitExceeded(usize),

    #[error("State field missing or mistyped: {0}")]
    MissingField(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Retrieval errors
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DroverError {
    /// Whether `ResilientInvoker` counts this failure against the retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DroverError::InvokeTimeout { .. } | DroverError::InvokeFailure(_) | DroverError::Parse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DroverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_carries_cause() {
        let err = DroverError::RetryExhausted {
            attempts: 3,
            source: Box::new(DroverError::InvokeTimeout { timeout_ms: 1000 }),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("1000ms"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_missing_params_message() {
        let err = DroverError::MissingToolParams {
            tool: "unused_coupons".into(),
            missing: vec!["page".into(), "limit".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing params for tool unused_coupons: page, limit"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DroverError::Parse("bad".into()).is_retryable());
        assert!(DroverError::InvokeFailure("boom".into()).is_retryable());
        assert!(!DroverError::NotBuilt.is_retryable());
        assert!(!DroverError::ToolNotFound("x".into()).is_retryable());
    }
}
