//! Unified error types for the tutor loop

use thiserror::Error;

/// Unified error type for all tutor operations
#[derive(Error, Debug)]
pub enum TutorError {
    // Structured output errors
    #[error("Could not extract valid JSON from model output: {0}")]
    Parse(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    // State errors
    #[error("Missing required state: {0}")]
    MissingState(String),

    #[error("Invalid phase transition: {0}")]
    InvalidTransition(String),

    // External-call errors
    #[error("Text generation failed: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl TutorError {
    /// Whether the error came from the external text-generation service
    /// rather than from the shape of what it returned.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::Generation(_) | Self::Api(_) | Self::ApiLimit(_) | Self::Auth(_)
        )
    }
}

/// Result type alias using TutorError
pub type Result<T> = std::result::Result<T, TutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_classification() {
        assert!(TutorError::Api("502".into()).is_external());
        assert!(TutorError::ApiLimit("429".into()).is_external());
        assert!(!TutorError::Parse("no json".into()).is_external());
        assert!(!TutorError::MissingState("question".into()).is_external());
    }

    #[test]
    fn test_display_messages() {
        let err = TutorError::MissingState("gpqa_question".into());
        assert_eq!(err.to_string(), "Missing required state: gpqa_question");
    }
}
