//! Error types for AI-assisted editing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SessionError;

pub type Result<T> = std::result::Result<T, AssistError>;

/// How a failure is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Refused locally before any request was sent.
    Input,
    /// Connection refused or timed out; the user may resubmit.
    Connection,
    /// Credentials rejected (HTTP 401).
    Authentication,
    /// Anything else the service or document reported.
    Generic,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Generic => "generic",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssistError {
    /// Selection covers an atomic non-text node.
    #[error("Selection contains {0}, which cannot be rewritten")]
    InvalidTarget(String),

    #[error("Please enter a prompt")]
    EmptyPrompt,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Non-2xx response other than 401.
    #[error("API error ({}): {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()))]
    Service { status: Option<u16>, message: String },

    /// Stream ended abnormally; `partial` holds whatever was received.
    #[error("Response interrupted: {message}")]
    StreamInterrupted { message: String, partial: String },

    #[error("Insertion failed: {0}")]
    Insertion(String),

    #[error("Nothing to regenerate yet")]
    NoPriorRequest,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AssistError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn service(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AssistError::InvalidTarget(_)
            | AssistError::EmptyPrompt
            | AssistError::InvalidState(_)
            | AssistError::NoPriorRequest => ErrorCategory::Input,
            AssistError::ServiceUnavailable(_) => ErrorCategory::Connection,
            AssistError::Authentication(_) => ErrorCategory::Authentication,
            AssistError::Service { .. }
            | AssistError::StreamInterrupted { .. }
            | AssistError::Insertion(_)
            | AssistError::Config(_) => ErrorCategory::Generic,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AssistError::ServiceUnavailable(_)
                | AssistError::StreamInterrupted { .. }
                | AssistError::Service { .. }
        )
    }

    /// The single message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            AssistError::ServiceUnavailable(_) => {
                "Could not reach the AI service. Check your connection and try again.".to_string()
            }
            AssistError::Authentication(_) => {
                "The AI service rejected your API key. Update it in Settings.".to_string()
            }
            AssistError::Service { message, .. } => format!("AI request failed: {}", message),
            AssistError::StreamInterrupted { .. } => {
                "The response was cut off. You can retry or insert the partial text.".to_string()
            }
            AssistError::Insertion(_) => {
                "Could not insert the result. It is still available in the preview for copying."
                    .to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn to_session_error(&self) -> SessionError {
        SessionError {
            message: self.user_message(),
            category: self.category().as_str().to_string(),
        }
    }
}

/// Rejection reported by a document model for a transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("position {pos} is outside the document (size {size})")]
    OutOfBounds { pos: usize, size: usize },

    #[error("document is read-only")]
    ReadOnly,

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl From<DocumentError> for AssistError {
    fn from(err: DocumentError) -> Self {
        AssistError::Insertion(err.to_string())
    }
}
