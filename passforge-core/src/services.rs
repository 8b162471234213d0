//! Startup wiring: picks concrete backends once and hands out trait objects.

use std::sync::Arc;
use std::time::Duration;

use crate::blob::{BlobError, BlobStore, FsBlobStore};
use crate::catalog::{PassTypeCatalog, PassTypeProfile};
use crate::config::{ConfigError, ServiceConfig};
use crate::error::Result;
use crate::orchestrator::UpdateOrchestrator;
use crate::push::{ApnsNotifier, NoopNotifier, PushError, PushNotifier};
use crate::registry::{PassRegistry, RegistryError, SqliteRegistry};
use crate::signer::{self, ManifestSigner};

/// Every capability the publishing side needs.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<dyn PassRegistry>,
    pub blobs: Arc<dyn BlobStore>,
    pub signer: Arc<dyn ManifestSigner>,
    pub catalog: Arc<PassTypeCatalog>,
    orchestrator: Arc<UpdateOrchestrator>,
}

impl Services {
    pub fn new(
        registry: Arc<dyn PassRegistry>,
        blobs: Arc<dyn BlobStore>,
        signer: Arc<dyn ManifestSigner>,
        catalog: Arc<PassTypeCatalog>,
    ) -> Self {
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&blobs),
            Arc::clone(&signer),
            Arc::clone(&catalog),
        ));
        Self {
            registry,
            blobs,
            signer,
            catalog,
            orchestrator,
        }
    }

    /// Open the durable backends and load the signing identity. Bad
    /// certificate material fails here.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let signing = config.signing.as_ref().ok_or_else(|| {
            ConfigError::Invalid("a [signing] section is required to publish passes".to_string())
        })?;

        let registry = open_registry(config)?;
        let blobs = open_blob_store(config)?;
        let signer = signer::from_config(signing)?;
        let catalog = build_catalog(config)?;
        Ok(Self::new(registry, blobs, signer, Arc::new(catalog)))
    }

    /// Shared orchestrator. Its per-serial locks only order publishes that
    /// go through the same instance.
    pub fn orchestrator(&self) -> Arc<UpdateOrchestrator> {
        Arc::clone(&self.orchestrator)
    }
}

pub fn open_registry(
    config: &ServiceConfig,
) -> std::result::Result<Arc<dyn PassRegistry>, RegistryError> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RegistryError::Storage(e.to_string()))?;
        }
    }
    Ok(Arc::new(SqliteRegistry::open(&config.database_path)?))
}

pub fn open_blob_store(
    config: &ServiceConfig,
) -> std::result::Result<Arc<dyn BlobStore>, BlobError> {
    Ok(Arc::new(FsBlobStore::open(&config.blob_root)?))
}

/// One profile per configured pass type. With push enabled each type gets
/// a gateway client using its identifier as topic; otherwise pushes are
/// dropped.
pub fn build_catalog(config: &ServiceConfig) -> std::result::Result<PassTypeCatalog, PushError> {
    let mut catalog = PassTypeCatalog::new(Arc::new(NoopNotifier));
    let timeout = Duration::from_secs(config.push.timeout_secs);

    for pass_type in &config.pass_types {
        let notifier: Arc<dyn PushNotifier> = if config.push.enabled {
            Arc::new(ApnsNotifier::new(
                &config.push.gateway_url,
                &pass_type.identifier,
                config.push.identity_path.as_deref(),
                timeout,
            )?)
        } else {
            Arc::new(NoopNotifier)
        };
        catalog.insert(
            pass_type.identifier.clone(),
            PassTypeProfile::new(pass_type.style, notifier),
        );
    }

    if config.push.enabled && config.pass_types.is_empty() {
        tracing::warn!("Push is enabled but no pass types are configured; pushes will be dropped");
    }
    Ok(catalog)
}
