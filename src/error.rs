use thiserror::Error;

/// Custom error types for the quiz session server
#[derive(Debug, Error)]
pub enum QuizError {
    /// Session lookup and capacity errors
    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Session {0} is full")]
    SessionFull(String),

    #[error("Session {0} is not accepting new participants")]
    QuizInactive(String),

    /// Poll lifecycle errors
    #[error("Invalid poll: {0}")]
    InvalidPoll(String),

    #[error("No active poll in this session")]
    NoActivePoll,

    #[error("An answer has already been submitted for this poll")]
    AlreadyAnswered,

    #[error("Option index {0} is out of range")]
    InvalidOption(usize),

    /// Authorization and lookup errors
    #[error("Connection {0} is not authorized for this operation")]
    Unauthorized(String),

    #[error("Participant {0} not found")]
    NotFound(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using QuizError
pub type Result<T> = std::result::Result<T, QuizError>;

impl QuizError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        QuizError::Internal(msg.into())
    }

    /// Stable wire identifier for the `error` notification sent to clients
    pub fn kind(&self) -> &'static str {
        match self {
            QuizError::SessionNotFound(_) => "session-not-found",
            QuizError::SessionFull(_) => "session-full",
            QuizError::QuizInactive(_) => "quiz-inactive",
            QuizError::InvalidPoll(_) => "invalid-poll",
            QuizError::NoActivePoll => "no-active-poll",
            QuizError::AlreadyAnswered => "already-answered",
            QuizError::InvalidOption(_) => "invalid-option",
            QuizError::Unauthorized(_) => "unauthorized",
            QuizError::NotFound(_) => "not-found",
            QuizError::InvalidConfiguration(_) => "invalid-configuration",
            QuizError::SerializationFailed(_) => "serialization-failed",
            QuizError::Internal(_) => "internal",
        }
    }
}
