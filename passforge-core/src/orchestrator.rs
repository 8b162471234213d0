//! Update orchestrator: content change to persisted bundle to push.
//!
//! `publish` runs validation, packaging and signing first; none of those
//! touch shared state, so a failure there leaves the old bundle and the old
//! `updatedAt` authoritative. Persisting happens under a per-serial lock:
//! the bundle is written, then the registry record is created or advanced.
//! If the registry step fails the previous bundle is put back. Push
//! delivery runs last and never fails the publish.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::blob::{bundle_key, BlobError, BlobStore, PASS_BUCKET};
use crate::bundle::{self, BundleEntry, BUNDLE_CONTENT_TYPE};
use crate::catalog::PassTypeCatalog;
use crate::content::PassContent;
use crate::deadline::Deadline;
use crate::error::{PassError, Result};
use crate::registry::{PassCredentials, PassRegistry, RegistryError};
use crate::signer::ManifestSigner;
use crate::validator::validate;

const LOCK_STRIPES: usize = 64;

/// What a successful publish did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub serial_number: String,
    pub updated_at: DateTime<Utc>,
    /// True when this publish issued the pass.
    pub created: bool,
    pub notified: usize,
    pub failed_notifications: usize,
    pub bundle_size: usize,
}

pub struct UpdateOrchestrator {
    registry: Arc<dyn PassRegistry>,
    blobs: Arc<dyn BlobStore>,
    signer: Arc<dyn ManifestSigner>,
    catalog: Arc<PassTypeCatalog>,
    serial_locks: Vec<Mutex<()>>,
}

impl UpdateOrchestrator {
    pub fn new(
        registry: Arc<dyn PassRegistry>,
        blobs: Arc<dyn BlobStore>,
        signer: Arc<dyn ManifestSigner>,
        catalog: Arc<PassTypeCatalog>,
    ) -> Self {
        Self {
            registry,
            blobs,
            signer,
            catalog,
            serial_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Validate, package, sign and persist `content`, then nudge every
    /// registered device.
    ///
    /// The first publish for a serial number issues the pass; later ones
    /// must carry the same authentication token and type identifier.
    /// `deadline` bounds everything up to the start of persistence; once
    /// persisting starts it runs to completion.
    pub fn publish(
        &self,
        deadline: Deadline,
        content: &PassContent,
        assets: &[BundleEntry],
    ) -> Result<PublishOutcome> {
        validate(content)?;
        self.catalog.check_style(content)?;

        let unsigned = bundle::build_pass(content, assets)?;
        let signature = self.signer.sign(unsigned.manifest_bytes())?;
        let sealed = unsigned.seal(&signature)?;

        let serial = content.serial_number.as_str();
        let credentials = PassCredentials::new(
            serial,
            &content.authentication_token,
            &content.pass_type_identifier,
        );

        let guard = self.lock_serial(deadline, serial)?;
        let existing = self.registry.get_pass(deadline, serial)?;
        if let Some(pass) = &existing {
            if !pass.matches(&credentials) {
                return Err(RegistryError::Conflict(format!(
                    "pass {} was issued with a different token or type",
                    serial
                ))
                .into());
            }
        }
        deadline.check()?;

        let (updated_at, created) = self.persist(&credentials, &sealed, existing.is_none())?;
        drop(guard);

        let (notified, failed_notifications) =
            self.notify(serial, &content.pass_type_identifier);

        tracing::info!(
            serial,
            pass_type = %content.pass_type_identifier,
            created,
            notified,
            failed = failed_notifications,
            "Published pass"
        );

        Ok(PublishOutcome {
            serial_number: serial.to_string(),
            updated_at,
            created,
            notified,
            failed_notifications,
            bundle_size: sealed.len(),
        })
    }

    fn lock_serial(&self, deadline: Deadline, serial: &str) -> Result<MutexGuard<'_, ()>> {
        let mut hasher = DefaultHasher::new();
        serial.hash(&mut hasher);
        let stripe = &self.serial_locks[(hasher.finish() as usize) % LOCK_STRIPES];

        deadline.check()?;
        match deadline.remaining() {
            None => Ok(stripe.lock()),
            Some(left) => stripe.try_lock_for(left).ok_or(PassError::DeadlineExceeded),
        }
    }

    /// Store the bundle and advance the registry as one unit.
    fn persist(
        &self,
        credentials: &PassCredentials<'_>,
        bundle: &[u8],
        create: bool,
    ) -> Result<(DateTime<Utc>, bool)> {
        let d = Deadline::none();
        let key = bundle_key(credentials.serial_number);

        let previous = match self.blobs.get(d, PASS_BUCKET, &key) {
            Ok(bytes) => Some(bytes),
            Err(BlobError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        self.blobs
            .put(d, PASS_BUCKET, &key, bundle, BUNDLE_CONTENT_TYPE)?;

        let recorded = if create {
            self.registry
                .insert_pass(d, *credentials)
                .map(|pass| (pass.updated_at, true))
        } else {
            self.registry
                .update_pass(d, credentials.serial_number)
                .map(|ts| (ts, false))
        };

        match recorded {
            Ok(result) => Ok(result),
            Err(e) => {
                self.restore(&key, previous);
                Err(e.into())
            }
        }
    }

    fn restore(&self, key: &str, previous: Option<Vec<u8>>) {
        let d = Deadline::none();
        let restored = match previous {
            Some(bytes) => self
                .blobs
                .put(d, PASS_BUCKET, key, &bytes, BUNDLE_CONTENT_TYPE),
            None => self.blobs.delete(d, PASS_BUCKET, key).map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::error!(key, error = %e, "Failed to restore previous bundle");
        }
    }

    /// Deliver to every registered push token. Returns (delivered, failed).
    fn notify(&self, serial: &str, pass_type: &str) -> (usize, usize) {
        let tokens = match self.registry.push_tokens(Deadline::none(), serial) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(serial, error = %e, "Could not load push tokens");
                return (0, 0);
            }
        };

        let notifier = self.catalog.notifier_for(pass_type);
        let mut delivered = 0;
        let mut failed = 0;
        for token in &tokens {
            match notifier.deliver(token) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(serial, error = %e, "Push delivery failed");
                }
            }
        }
        (delivered, failed)
    }
}
