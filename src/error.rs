use thiserror::Error;

/// Every failure the sync layer reports to its callers.
///
/// Messages are kept as plain strings so the error can be cloned into view
/// state and compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteError {
    /// Rejected locally before any remote call was made.
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("CONFLICT: {0}")]
    Conflict(String),
    /// No response was received from the remote store.
    #[error("TRANSPORT: {0}")]
    Transport(String),
    /// The bearer credential was rejected. Never retried here.
    #[error("AUTH: {0}")]
    Auth(String),
    /// The remote store answered with a failure; the message is verbatim.
    #[error("REMOTE: {0}")]
    Remote(String),
    #[error("CONFIG: {0}")]
    Config(String),
}

impl NoteError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<std::io::Error> for NoteError {
    fn from(value: std::io::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<serde_json::Error> for NoteError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<reqwest::Error> for NoteError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Remote(format!("Invalid response from server: {}", value))
        } else {
            Self::Transport(format!(
                "Network error - please check your internet connection: {}",
                value
            ))
        }
    }
}

pub type NoteResult<T> = Result<T, NoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_kind_prefix() {
        let err = NoteError::conflict("Folder /Work already exists");
        assert_eq!(err.to_string(), "CONFLICT: Folder /Work already exists");
    }

    #[test]
    fn test_io_error_maps_to_config() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(NoteError::from(io), NoteError::Config(_)));
    }

    #[test]
    fn test_kind_predicates() {
        assert!(NoteError::validation("x").is_validation());
        assert!(NoteError::Auth("expired".to_string()).is_auth());
        assert!(!NoteError::not_found("x").is_auth());
    }
}
