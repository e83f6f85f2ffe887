//! Error types for the playground engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlaygroundError>;

/// A proposed file or directory name broke one of the naming rules
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Name must not contain a path separator")]
    PathSeparator,

    #[error("File name must end with {0}")]
    MissingExtension(String),

    #[error("File name needs a stem before {0}")]
    MissingStem(String),
}

#[derive(Error, Debug)]
pub enum PlaygroundError {
    #[error("Invalid name: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Defect: {0}")]
    Defect(String),
}

impl PlaygroundError {
    /// Map an IO error for `path` onto the sandbox error taxonomy
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => PlaygroundError::NotFound(path.to_string()),
            std::io::ErrorKind::AlreadyExists => PlaygroundError::AlreadyExists(path.to_string()),
            _ => PlaygroundError::Io(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlaygroundError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, PlaygroundError::AlreadyExists(_))
    }

    /// Transient failures worth another attempt. Defects never are.
    pub fn is_retryable(&self) -> bool {
        self.is_not_found()
    }
}

impl From<serde_json::Error> for PlaygroundError {
    fn from(e: serde_json::Error) -> Self {
        PlaygroundError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for PlaygroundError {
    fn from(e: serde_yaml::Error) -> Self {
        PlaygroundError::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for PlaygroundError {
    fn from(e: base64::DecodeError) -> Self {
        PlaygroundError::Serialization(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for PlaygroundError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        PlaygroundError::Timeout(e.to_string())
    }
}

impl From<tokio::task::JoinError> for PlaygroundError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            PlaygroundError::Cancelled
        } else {
            PlaygroundError::Defect(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_map_to_taxonomy() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        let err = PlaygroundError::from_io(missing, "app/src");
        assert!(err.is_not_found());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Not found: app/src");

        let exists = std::io::Error::from(std::io::ErrorKind::AlreadyExists);
        assert!(PlaygroundError::from_io(exists, "app").is_already_exists());

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            PlaygroundError::from_io(denied, "app"),
            PlaygroundError::Io(_)
        ));
    }

    #[test]
    fn test_defects_are_not_retried() {
        assert!(!PlaygroundError::Defect("bad state".into()).is_retryable());
        assert!(!PlaygroundError::Validation(ValidationError::EmptyName).is_retryable());
    }
}
