//! Error taxonomy for the entropy pipeline, generator and services.

use randomtrust_tests::BatteryError;
use thiserror::Error;

/// A caller-supplied value violated a documented constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {constraint}")]
pub struct InvalidInput {
    pub field: String,
    pub constraint: String,
}

impl InvalidInput {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

/// Failures of the entropy mixer. Any of these aborts the mix.
#[derive(Debug, Error)]
pub enum MixError {
    #[error("seed derivation failed: {0}")]
    KeyDerivation(String),
}

/// Failures of counter, artifact and record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Unavailable(format!("corrupt document: {err}"))
    }
}

/// Failures of [`crate::rng::StreamRng`].
#[derive(Debug, Error)]
pub enum RngError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("run {0} is not registered with the counter store")]
    UnknownRun(uuid::Uuid),
    #[error("keystream exhausted for this key/nonce pair")]
    KeystreamExhausted,
}

/// Errors surfaced by the service layer.
///
/// Collaborator failures are collapsed into [`ServiceError::DataUnavailable`]
/// with a generic message; the underlying cause is logged.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Invalid(#[from] InvalidInput),
    #[error(transparent)]
    Battery(#[from] BatteryError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error("available bits {available} less than required {required}")]
    InsufficientBits { available: usize, required: usize },
    #[error(transparent)]
    Mix(#[from] MixError),
    #[error(transparent)]
    Rng(#[from] RngError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = InvalidInput::new("duration_ms", "must be within [50, 1000]");
        assert_eq!(err.to_string(), "invalid duration_ms: must be within [50, 1000]");
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(StoreError::from(io), StoreError::NotFound(_)));
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(StoreError::from(io), StoreError::Unavailable(_)));
    }

    #[test]
    fn test_insufficient_bits_display() {
        let err = ServiceError::InsufficientBits {
            available: 800,
            required: 1_000_000,
        };
        assert_eq!(
            err.to_string(),
            "available bits 800 less than required 1000000"
        );
    }
}
