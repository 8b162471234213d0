mod common;

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use common::{content, StubSigner, PASS_TYPE};
use passforge_core::blob::{bundle_key, PASS_BUCKET};
use passforge_core::bundle::{BundleEntry, CONTENT_ENTRY, MANIFEST_ENTRY, SIGNATURE_ENTRY};
use passforge_core::push::RecordingNotifier;
use passforge_core::{
    BlobStore, Deadline, DeviceRegistration, MemoryBlobStore, MemoryRegistry, Pass,
    PassCredentials, PassError, PassRegistry, PassTypeCatalog, RegistrationOutcome,
    RegistryError, Services, SqliteRegistry, UpdatedSerials,
};

/// Delegates to a memory registry but can refuse timestamp updates.
#[derive(Default)]
struct FlakyRegistry {
    inner: MemoryRegistry,
    fail_updates: AtomicBool,
}

impl PassRegistry for FlakyRegistry {
    fn insert_pass(&self, d: Deadline, c: PassCredentials<'_>) -> Result<Pass, RegistryError> {
        self.inner.insert_pass(d, c)
    }

    fn update_pass(&self, d: Deadline, serial: &str) -> Result<DateTime<Utc>, RegistryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RegistryError::ConflictingWrite("database is locked".into()));
        }
        self.inner.update_pass(d, serial)
    }

    fn get_pass(&self, d: Deadline, serial: &str) -> Result<Option<Pass>, RegistryError> {
        self.inner.get_pass(d, serial)
    }

    fn find_pass(&self, d: Deadline, c: PassCredentials<'_>) -> Result<bool, RegistryError> {
        self.inner.find_pass(d, c)
    }

    fn register(
        &self,
        d: Deadline,
        r: &DeviceRegistration,
    ) -> Result<RegistrationOutcome, RegistryError> {
        self.inner.register(d, r)
    }

    fn unregister(
        &self,
        d: Deadline,
        device: &str,
        serial: &str,
        pass_type: &str,
    ) -> Result<bool, RegistryError> {
        self.inner.unregister(d, device, serial, pass_type)
    }

    fn find_serials(
        &self,
        d: Deadline,
        device: &str,
        pass_type: &str,
        since: &str,
    ) -> Result<UpdatedSerials, RegistryError> {
        self.inner.find_serials(d, device, pass_type, since)
    }

    fn latest_timestamp(
        &self,
        d: Deadline,
        c: PassCredentials<'_>,
    ) -> Result<DateTime<Utc>, RegistryError> {
        self.inner.latest_timestamp(d, c)
    }

    fn push_tokens(&self, d: Deadline, serial: &str) -> Result<Vec<String>, RegistryError> {
        self.inner.push_tokens(d, serial)
    }
}

struct Harness {
    registry: Arc<FlakyRegistry>,
    blobs: MemoryBlobStore,
    signer: Arc<StubSigner>,
    push: RecordingNotifier,
    services: Services,
}

fn harness() -> Harness {
    let registry = Arc::new(FlakyRegistry::default());
    let blobs = MemoryBlobStore::new();
    let signer = Arc::new(StubSigner::default());
    let push = RecordingNotifier::new();
    let services = Services::new(
        registry.clone(),
        Arc::new(blobs.clone()),
        signer.clone(),
        Arc::new(PassTypeCatalog::new(Arc::new(push.clone()))),
    );
    Harness {
        registry,
        blobs,
        signer,
        push,
        services,
    }
}

fn register(registry: &dyn PassRegistry, device: &str, push: &str, serial: &str) {
    registry
        .register(
            Deadline::none(),
            &DeviceRegistration {
                device_id: device.into(),
                push_token: push.into(),
                serial_number: serial.into(),
                type_identifier: PASS_TYPE.into(),
            },
        )
        .unwrap();
}

fn stored(blobs: &MemoryBlobStore, serial: &str) -> Vec<u8> {
    blobs
        .get(Deadline::none(), PASS_BUCKET, &bundle_key(serial))
        .unwrap()
}

const TOKEN: &str = "a1b2c3d4e5f6a7b8c9d0";

#[test]
fn published_bundle_has_manifest_and_signature() {
    let h = harness();
    let assets = [BundleEntry::new("icon.png", vec![1, 2, 3])];
    h.services
        .orchestrator()
        .publish(Deadline::none(), &content("S1", TOKEN), &assets)
        .unwrap();

    let mut zip = zip::ZipArchive::new(Cursor::new(stored(&h.blobs, "S1"))).unwrap();
    let names: Vec<String> = zip.file_names().map(str::to_string).collect();
    assert_eq!(
        names,
        vec![CONTENT_ENTRY, "icon.png", MANIFEST_ENTRY, SIGNATURE_ENTRY]
    );

    let mut signature = Vec::new();
    zip.by_name(SIGNATURE_ENTRY)
        .unwrap()
        .read_to_end(&mut signature)
        .unwrap();
    assert_eq!(signature, b"detached-signature");
}

#[test]
fn signing_failure_keeps_previous_bundle_and_timestamp() {
    let h = harness();
    let d = Deadline::none();
    let orchestrator = h.services.orchestrator();
    let first = orchestrator.publish(d, &content("S1", TOKEN), &[]).unwrap();
    let before = stored(&h.blobs, "S1");

    h.signer.failing.store(true, Ordering::SeqCst);
    let mut changed = content("S1", TOKEN);
    changed.description = "Rescheduled".into();
    let err = orchestrator.publish(d, &changed, &[]).unwrap_err();
    assert!(matches!(err, PassError::Signing(_)));

    assert_eq!(stored(&h.blobs, "S1"), before);
    let pass = h.registry.get_pass(d, "S1").unwrap().unwrap();
    assert_eq!(pass.updated_at, first.updated_at);
}

#[test]
fn registry_failure_restores_previous_bundle() {
    let h = harness();
    let d = Deadline::none();
    let orchestrator = h.services.orchestrator();
    orchestrator.publish(d, &content("S1", TOKEN), &[]).unwrap();
    let before = stored(&h.blobs, "S1");

    h.registry.fail_updates.store(true, Ordering::SeqCst);
    let mut changed = content("S1", TOKEN);
    changed.description = "Rescheduled".into();
    let err = orchestrator.publish(d, &changed, &[]).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(stored(&h.blobs, "S1"), before);
}

#[test]
fn push_failures_do_not_fail_publish() {
    let h = harness();
    let d = Deadline::none();
    let orchestrator = h.services.orchestrator();
    orchestrator.publish(d, &content("S1", TOKEN), &[]).unwrap();
    register(h.registry.as_ref(), "D1", "P1", "S1");
    register(h.registry.as_ref(), "D2", "P2", "S1");
    register(h.registry.as_ref(), "D3", "P3", "S1");
    h.push.fail_token("P2");

    let outcome = orchestrator.publish(d, &content("S1", TOKEN), &[]).unwrap();
    assert_eq!(outcome.notified, 2);
    assert_eq!(outcome.failed_notifications, 1);
    assert_eq!(h.push.delivered(), vec!["P1", "P3"]);
}

#[test]
fn publish_and_protocol_round_trip_on_sqlite() {
    let registry = Arc::new(SqliteRegistry::in_memory().unwrap());
    let blobs = Arc::new(MemoryBlobStore::new());
    let services = Services::new(
        registry.clone(),
        blobs,
        Arc::new(StubSigner::default()),
        Arc::new(PassTypeCatalog::default()),
    );
    let d = Deadline::none();
    let orchestrator = services.orchestrator();

    let issued = orchestrator.publish(d, &content("S1", TOKEN), &[]).unwrap();
    assert!(issued.created);
    register(registry.as_ref(), "D1", "P1", "S1");

    let listed = registry.find_serials(d, "D1", PASS_TYPE, "").unwrap();
    let tag = passforge_core::freshness::format_update_tag(listed.last_updated.unwrap());

    thread::sleep(std::time::Duration::from_millis(2));
    let updated = orchestrator.publish(d, &content("S1", TOKEN), &[]).unwrap();
    assert!(updated.updated_at > issued.updated_at);

    let changed = registry.find_serials(d, "D1", PASS_TYPE, &tag).unwrap();
    assert_eq!(changed.serial_numbers, vec!["S1"]);
    let creds = PassCredentials::new("S1", TOKEN, PASS_TYPE);
    assert_eq!(registry.latest_timestamp(d, creds).unwrap(), updated.updated_at);
}

#[test]
fn concurrent_publishes_of_one_serial_issue_once() {
    let h = harness();
    let orchestrator = h.services.orchestrator();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || {
                orchestrator
                    .publish(Deadline::none(), &content("S1", TOKEN), &[])
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);

    let mut stamps: Vec<_> = outcomes.iter().map(|o| o.updated_at).collect();
    stamps.sort();
    stamps.dedup();
    assert_eq!(stamps.len(), outcomes.len());

    let pass = h.registry.get_pass(Deadline::none(), "S1").unwrap().unwrap();
    assert_eq!(Some(&pass.updated_at), stamps.last());
}
