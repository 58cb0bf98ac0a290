//! Error types for the execution engine.
//!
//! Two layers, matching the two audiences described in the design notes:
//!
//! - [`Error`]: the general-purpose error used by transports, tool
//!   reducers, and configuration. Mirrors ordinary library error handling.
//! - [`ExecutionError`]: the fixed, typed taxonomy an `execute()` call
//!   surfaces to its caller. Every variant carries the context a caller
//!   needs to log, retry at a higher level, or bill a user, and nothing
//!   escapes `execute()` except one of these.

use thiserror::Error;

/// Result type alias using the general-purpose [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// General-purpose error for transports, tool reducers, and configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (reference transport only).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error returned by the model transport or the model server.
    #[error("API error: {0}")]
    Api(String),

    /// Tool reducer error.
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// Catch-all.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }
}

/// A single failed validation layer: its identity plus the error it raised.
///
/// Carried inside [`ExecutionError::ValidationFailed`] only via
/// `MaxAttemptsExceeded.last_error` — validation failures are per-attempt
/// recoverable and never surfaced on their own (see `spec.md` §7).
#[derive(Debug, Clone)]
pub struct LayerFailure {
    pub layer_name: String,
    pub layer_description: String,
    pub error: String,
}

impl std::fmt::Display for LayerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "layer '{}' ({}) failed: {}",
            self.layer_name, self.layer_description, self.error
        )
    }
}

/// Checkpoint at which a cancellation signal was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationPhase {
    PromptGeneration,
    ApiCall,
    Validation,
    Iteration,
}

impl std::fmt::Display for CancellationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancellationPhase::PromptGeneration => "prompt_generation",
            CancellationPhase::ApiCall => "api_call",
            CancellationPhase::Validation => "validation",
            CancellationPhase::Iteration => "iteration",
        };
        f.write_str(s)
    }
}

/// The fixed taxonomy of errors `execute()` surfaces to its caller.
///
/// No panic or unhandled exception ever escapes `execute()`; every failure
/// path produces one of these, with metadata populated. See `spec.md` §6–§7.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// The model transport raised an error (network failure, non-2xx, malformed body).
    #[error("API error on attempt {attempt}: {message}")]
    ApiError { attempt: u32, message: String },

    /// The model ended its turn without ever producing the output tool.
    #[error(
        "output tool '{expected_tool}' not used after {iteration_count} iteration(s) on attempt {attempt}"
    )]
    OutputToolNotUsed {
        attempt: u32,
        iteration_count: u32,
        expected_tool: String,
    },

    /// `submit` was called before any output had been recorded in this attempt.
    #[error("submit called before output on attempt {attempt}, iteration {iteration_count}")]
    SubmitBeforeOutput { attempt: u32, iteration_count: u32 },

    /// The iteration budget for a single attempt was exhausted.
    #[error(
        "max iterations ({max_iterations}) exceeded on attempt {attempt} (reached {iteration_count})"
    )]
    MaxIterationsExceeded {
        attempt: u32,
        iteration_count: u32,
        max_iterations: u32,
    },

    /// Every attempt failed validation (or some other per-attempt recoverable
    /// failure) and the attempt budget was exhausted.
    #[error("max attempts ({max_attempts}) exceeded after {attempts} attempt(s)")]
    MaxAttemptsExceeded {
        attempts: u32,
        max_attempts: u32,
        last_error: Option<LayerFailure>,
    },

    /// The caller's cancellation signal fired.
    #[error("execution cancelled on attempt {attempt} during {phase}")]
    ExecutionCancelled {
        attempt: u32,
        phase: CancellationPhase,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api("500 Internal Server Error");
        assert!(matches!(err, Error::Api(_)));
        assert_eq!(err.to_string(), "API error: 500 Internal Server Error");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Tool not found");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "Tool execution error: Tool not found");
    }

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("Missing parameter");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: Missing parameter");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout())
        }
    }

    #[test]
    fn test_execution_error_variants_carry_context() {
        let err = ExecutionError::MaxIterationsExceeded {
            attempt: 1,
            iteration_count: 15,
            max_iterations: 15,
        };
        assert_eq!(
            err.to_string(),
            "max iterations (15) exceeded on attempt 1 (reached 15)"
        );

        let cancelled = ExecutionError::ExecutionCancelled {
            attempt: 2,
            phase: CancellationPhase::ApiCall,
        };
        assert!(cancelled.to_string().contains("api_call"));
    }
}
