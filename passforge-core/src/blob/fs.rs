//! Filesystem blob store: `<root>/<bucket>/<key>`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{check_key, BlobError, BlobStore};
use crate::deadline::Deadline;

/// Stores each blob as a file, with its content type in a hidden
/// `.<key>.content-type` sidecar.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::info!(root = %root.display(), "Opened blob store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content type recorded for a key, if any.
    pub fn content_type(&self, bucket: &str, key: &str) -> Result<Option<String>, BlobError> {
        let (dir, _) = self.locate(bucket, key)?;
        match fs::read_to_string(dir.join(sidecar_name(key))) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, bucket: &str, key: &str) -> Result<(PathBuf, PathBuf), BlobError> {
        check_key(bucket)?;
        check_key(key)?;
        let dir = self.root.join(bucket);
        let path = dir.join(key);
        Ok((dir, path))
    }
}

fn sidecar_name(key: &str) -> String {
    format!(".{}.content-type", key)
}

/// Write via a temp file in the same directory, then rename over `path`.
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), BlobError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| BlobError::Io(e.error))?;
    Ok(())
}

impl BlobStore for FsBlobStore {
    fn get(&self, deadline: Deadline, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        deadline.check()?;
        let (_, path) = self.locate(bucket, key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => BlobError::Io(e),
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
        let (dir, path) = self.locate(bucket, key)?;
        deadline.check()?;
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &dir.join(sidecar_name(key)), content_type.as_bytes())?;
        write_atomic(&dir, &path, bytes)?;
        tracing::debug!(bucket, key, size = bytes.len(), "Stored blob");
        Ok(())
    }

    fn list(
        &self,
        deadline: Deadline,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<Vec<u8>>, BlobError> {
        deadline.check()?;
        check_key(bucket)?;
        let dir = self.root.join(bucket);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with('.') && name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();

        names
            .iter()
            .map(|name| fs::read(dir.join(name)).map_err(BlobError::from))
            .collect()
    }

    fn delete(&self, deadline: Deadline, bucket: &str, key: &str) -> Result<bool, BlobError> {
        let (dir, path) = self.locate(bucket, key)?;
        deadline.check()?;
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(dir.join(sidecar_name(key))) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{conformance, PASS_BUCKET};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn conforms() {
        let dir = tempfile::tempdir().unwrap();
        let next = AtomicUsize::new(0);
        conformance::run_all(|| {
            let sub = dir.path().join(next.fetch_add(1, Ordering::SeqCst).to_string());
            Box::new(FsBlobStore::open(sub).unwrap())
        });
    }

    #[test]
    fn records_content_type_and_hides_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        let d = Deadline::none();
        store
            .put(d, PASS_BUCKET, "S1.pkpass", b"zip", "application/vnd.apple.pkpass")
            .unwrap();

        assert_eq!(
            store.content_type(PASS_BUCKET, "S1.pkpass").unwrap().as_deref(),
            Some("application/vnd.apple.pkpass")
        );
        assert!(dir.path().join("passes/S1.pkpass").is_file());
        assert_eq!(store.list(d, PASS_BUCKET, "").unwrap(), vec![b"zip".to_vec()]);
        assert_eq!(store.content_type(PASS_BUCKET, "S2.pkpass").unwrap(), None);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        for i in 0..3 {
            store
                .put(Deadline::none(), PASS_BUCKET, "S1.pkpass", &[i], "a/b")
                .unwrap();
        }
        let files = fs::read_dir(dir.path().join(PASS_BUCKET)).unwrap().count();
        assert_eq!(files, 2);
    }
}
