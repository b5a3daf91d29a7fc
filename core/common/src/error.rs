//! Common error types for ossportable.

use thiserror::Error;

/// Top-level error type for storage client operations.
///
/// `Transport` and `Status` display their message verbatim: the text a
/// server sends back is exactly what the user gets to see.
#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced an HTTP response (DNS, refused, reset).
    #[error("{0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("{body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text, unmodified.
        body: String,
    },

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a protocol failure from a status code and body text.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// HTTP status of a protocol failure, if this is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the request failed before any response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_displays_body_verbatim() {
        let err = Error::status(400, "bucket name invalid");
        assert_eq!(err.to_string(), "bucket name invalid");
        assert_eq!(err.status_code(), Some(400));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_displays_message_verbatim() {
        let err = Error::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "connection refused");
        assert!(err.is_transport());
        assert_eq!(err.status_code(), None);
    }
}
