//! Pass bundle packaging.
//!
//! A bundle is a zip archive holding the content document, any assets, a
//! `manifest.json` mapping every entry name to its SHA-1 digest, and a
//! detached `signature` over the manifest bytes.
//!
//! Building is pure: identical inputs (names, bytes, order) always produce
//! byte-identical manifests and archives. Entry timestamps are pinned to the
//! zip epoch so the wall clock never leaks into the output.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use sha1::{Digest, Sha1};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::content::PassContent;

/// Name of the content document entry.
pub const CONTENT_ENTRY: &str = "pass.json";
/// Name of the generated manifest entry.
pub const MANIFEST_ENTRY: &str = "manifest.json";
/// Name of the detached signature entry.
pub const SIGNATURE_ENTRY: &str = "signature";
/// MIME type of a finished bundle.
pub const BUNDLE_CONTENT_TYPE: &str = "application/vnd.apple.pkpass";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("bundle has no entries")]
    Empty,

    #[error("duplicate bundle entry: {0}")]
    DuplicateEntry(String),

    #[error("reserved bundle entry name: {0}")]
    ReservedName(String),

    #[error("invalid bundle entry name: {0:?}")]
    InvalidName(String),

    #[error("content serialization failed: {0}")]
    Content(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named file inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BundleEntry {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// An unsigned bundle: entries and manifest are archived, the signature is
/// appended by [`Bundle::seal`] once signing succeeds.
#[derive(Debug, Clone)]
pub struct Bundle {
    manifest: BTreeMap<String, String>,
    manifest_bytes: Vec<u8>,
    archive: Vec<u8>,
}

impl Bundle {
    /// Entry name to hex SHA-1 digest.
    pub fn manifest(&self) -> &BTreeMap<String, String> {
        &self.manifest
    }

    /// The exact `manifest.json` bytes, which is what gets signed.
    pub fn manifest_bytes(&self) -> &[u8] {
        &self.manifest_bytes
    }

    /// Archive without the signature entry.
    pub fn archive(&self) -> &[u8] {
        &self.archive
    }

    /// Append the detached signature and return the finished archive.
    pub fn seal(self, signature: &[u8]) -> Result<Vec<u8>, BundleError> {
        let mut writer = ZipWriter::new_append(Cursor::new(self.archive))?;
        writer.start_file(SIGNATURE_ENTRY, entry_options())?;
        writer.write_all(signature)?;
        Ok(writer.finish()?.into_inner())
    }
}

/// Build a bundle from `content` (serialized to `pass.json`) and assets.
pub fn build_pass(content: &PassContent, assets: &[BundleEntry]) -> Result<Bundle, BundleError> {
    let mut entries = Vec::with_capacity(assets.len() + 1);
    entries.push(BundleEntry::new(CONTENT_ENTRY, content.to_json()?));
    entries.extend_from_slice(assets);
    build(&entries)
}

/// Build a bundle from raw entries. The first entry is the content
/// document; the rest are assets in call order.
pub fn build(entries: &[BundleEntry]) -> Result<Bundle, BundleError> {
    if entries.is_empty() {
        return Err(BundleError::Empty);
    }

    let mut manifest = BTreeMap::new();
    for entry in entries {
        check_name(&entry.name)?;
        let digest = hex::encode(Sha1::digest(&entry.bytes));
        if manifest.insert(entry.name.clone(), digest).is_some() {
            return Err(BundleError::DuplicateEntry(entry.name.clone()));
        }
    }
    let manifest_bytes = serde_json::to_vec(&manifest)?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        writer.start_file(entry.name.as_str(), entry_options())?;
        writer.write_all(&entry.bytes)?;
    }
    writer.start_file(MANIFEST_ENTRY, entry_options())?;
    writer.write_all(&manifest_bytes)?;
    let archive = writer.finish()?.into_inner();

    Ok(Bundle {
        manifest,
        manifest_bytes,
        archive,
    })
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

fn check_name(name: &str) -> Result<(), BundleError> {
    if name == MANIFEST_ENTRY || name == SIGNATURE_ENTRY {
        return Err(BundleError::ReservedName(name.to_string()));
    }
    let traversal = name
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..");
    if traversal || name.contains('\\') {
        return Err(BundleError::InvalidName(name.to_string()));
    }
    Ok(())
}
