use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl ClipError {
    /// Clipboard read failures are skipped by the monitor without noise.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClipError::Clipboard(_))
    }
}

impl From<serde_json::Error> for ClipError {
    fn from(e: serde_json::Error) -> Self {
        ClipError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_clipboard_errors_are_transient() {
        assert!(ClipError::Clipboard("locked".into()).is_transient());
        assert!(!ClipError::NotFound("x".into()).is_transient());
        assert!(!ClipError::LockPoisoned.is_transient());
    }

    #[test]
    fn test_serde_error_becomes_parse() {
        let err: ClipError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ClipError::Parse(_)));
    }
}
