use std::io;
use thiserror::Error;

/// Errors shared by the sdav crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The request path resolves outside the sandbox root.
    ///
    /// Deliberately carries no path so the resolved location never leaks.
    #[error("forbidden: path escapes the sandbox root")]
    SandboxViolation,

    /// The addressed resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The requested operation is not implemented.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// TOML parsing error.
    #[error("toml parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error means "the resource is not there".
    ///
    /// Covers both a pre-flight miss and an `ENOENT` raised mid-operation when
    /// the entry vanished between the existence check and the action.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for sdav-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_counts_as_not_found() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
        assert!(Error::NotFound("/a".into()).is_not_found());
    }

    #[test]
    fn other_errors_are_not_not_found() {
        let err = Error::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(!err.is_not_found());
        assert!(!Error::SandboxViolation.is_not_found());
    }

    #[test]
    fn sandbox_violation_message_has_no_path() {
        let message = Error::SandboxViolation.to_string();
        assert_eq!(message, "forbidden: path escapes the sandbox root");
    }
}
