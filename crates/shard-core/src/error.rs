use thiserror::Error;

pub type ShardResult<T> = Result<T, ShardError>;

#[derive(Debug, Error)]
pub enum ShardError {
    /// A key, padding, cipher or password was missing or unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("range error: {0}")]
    Range(String),

    /// Malformed container, pad length, ciphertext or catalog
    #[error("format error: {0}")]
    Format(String),

    /// Wrong password; deliberately carries no detail about which check failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShardError {
    /// Errors that come from the storage side rather than from the data itself.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            ShardError::Backend(_) | ShardError::NotFound(_) | ShardError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ShardError::Format("bad pad length".into());
        assert_eq!(err.to_string(), "format error: bad pad length");

        let err = ShardError::Authentication("unlock failed".into());
        assert_eq!(err.to_string(), "authentication failed: unlock failed");
    }

    #[test]
    fn test_io_conversion_is_backend() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ShardError = io.into();
        assert!(err.is_backend());
        assert!(!ShardError::Range("x".into()).is_backend());
        assert!(ShardError::NotFound("k".into()).is_backend());
    }
}
