//! In-memory blob store test double.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{check_key, BlobError, BlobStore};
use crate::deadline::Deadline;

type Key = (String, String);

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<BTreeMap<Key, (Vec<u8>, String)>>>,
    fail_puts: Arc<Mutex<bool>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail with an IO error.
    pub fn fail_puts(&self, fail: bool) {
        *self.fail_puts.lock() = fail;
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.blobs
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(_, content_type)| content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_of(bucket: &str, key: &str) -> Result<Key, BlobError> {
    check_key(bucket)?;
    check_key(key)?;
    Ok((bucket.to_string(), key.to_string()))
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, deadline: Deadline, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        let k = key_of(bucket, key)?;
        deadline.check()?;
        self.blobs
            .lock()
            .get(&k)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn put(
        &self,
        deadline: Deadline,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BlobError> {
        let k = key_of(bucket, key)?;
        deadline.check()?;
        if *self.fail_puts.lock() {
            return Err(BlobError::Io(std::io::Error::other("injected put failure")));
        }
        self.blobs
            .lock()
            .insert(k, (bytes.to_vec(), content_type.to_string()));
        Ok(())
    }

    fn list(
        &self,
        deadline: Deadline,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<Vec<u8>>, BlobError> {
        check_key(bucket)?;
        deadline.check()?;
        Ok(self
            .blobs
            .lock()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|(_, (bytes, _))| bytes.clone())
            .collect())
    }

    fn delete(&self, deadline: Deadline, bucket: &str, key: &str) -> Result<bool, BlobError> {
        let k = key_of(bucket, key)?;
        deadline.check()?;
        Ok(self.blobs.lock().remove(&k).is_some())
    }
}
