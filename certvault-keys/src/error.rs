use thiserror::Error;

/// Error types for the certvault-keys crate
#[derive(Error, Debug)]
pub enum CertError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Wrong password: {0}")]
    WrongPassword(String),

    #[error("Certificate and private key do not match")]
    KeyMismatch,

    #[error("Alias not found in keystore container")]
    AliasNotFound,

    #[error("Access denied")]
    AccessDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Persisted record and keystore container disagree
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    #[error("Internal failure: {0}")]
    InternalFailure(String),
}

impl CertError {
    /// True when the caller can retry with corrected input
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CertError::InvalidArgument(_)
                | CertError::UnsupportedAlgorithm(_)
                | CertError::InvalidSubject(_)
                | CertError::MalformedInput(_)
                | CertError::WrongPassword(_)
                | CertError::KeyMismatch
        )
    }
}

impl From<openssl::error::ErrorStack> for CertError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        CertError::InternalFailure(format!("OpenSSL error: {err}"))
    }
}

impl From<std::io::Error> for CertError {
    fn from(err: std::io::Error) -> Self {
        CertError::InternalFailure(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for CertError {
    fn from(err: serde_json::Error) -> Self {
        CertError::InternalFailure(format!("JSON error: {err}"))
    }
}

impl From<bincode::Error> for CertError {
    fn from(err: bincode::Error) -> Self {
        CertError::InternalFailure(format!("Serialization error: {err}"))
    }
}

/// Result type for certvault-keys operations
pub type Result<T> = std::result::Result<T, CertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_and_format_errors_are_recoverable() {
        assert!(CertError::WrongPassword("x".into()).is_recoverable());
        assert!(CertError::KeyMismatch.is_recoverable());
        assert!(!CertError::Inconsistent("record without container".into()).is_recoverable());
        assert!(!CertError::AccessDenied.is_recoverable());
    }
}
