//! Aggregate error type for pass publishing.

use thiserror::Error;

use crate::blob::BlobError;
use crate::bundle::BundleError;
use crate::config::ConfigError;
use crate::deadline::DeadlineExceeded;
use crate::push::PushError;
use crate::registry::RegistryError;
use crate::signer::SigningError;
use crate::validator::ValidationError;

/// Result type for publishing and service wiring.
pub type Result<T> = std::result::Result<T, PassError>;

/// Errors surfaced by the update orchestrator and service construction.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("Push configuration error: {0}")]
    Push(#[from] PushError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl From<DeadlineExceeded> for PassError {
    fn from(_: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded
    }
}

impl PassError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Registry(e) => e.is_retryable(),
            Self::Blob(BlobError::Io(_)) | Self::Blob(BlobError::DeadlineExceeded) => true,
            Self::DeadlineExceeded => true,
            _ => false,
        }
    }
}
