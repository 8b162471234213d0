//! Key to bytes storage for finished bundles.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use thiserror::Error;

use crate::deadline::{Deadline, DeadlineExceeded};

/// Bucket holding signed pass bundles.
pub const PASS_BUCKET: &str = "passes";

/// Blob key of the bundle for a serial number.
pub fn bundle_key(serial_number: &str) -> String {
    format!("{}.pkpass", serial_number)
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid blob key: {0:?}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl From<DeadlineExceeded> for BlobError {
    fn from(_: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded
    }
}

/// Bucketed blob storage.
///
/// Writes replace the whole value atomically: readers see either the old
/// bytes or the new bytes, never a mix.
pub trait BlobStore: Send + Sync {
    fn get(&self, deadline: Deadline, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError>;

    fn put(
        &self,
        deadline: Deadline,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BlobError>;

    /// Values of every key in `bucket` starting with `prefix`, in key order.
    fn list(&self, deadline: Deadline, bucket: &str, prefix: &str)
        -> Result<Vec<Vec<u8>>, BlobError>;

    /// Remove a key. Returns whether anything was removed.
    fn delete(&self, deadline: Deadline, bucket: &str, key: &str) -> Result<bool, BlobError>;
}

/// Buckets and keys are single path components that never start with a
/// dot, so they cannot escape the store root or collide with sidecars.
pub(crate) fn check_key(key: &str) -> Result<(), BlobError> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0'])
        || key.contains("..");
    if bad {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}
