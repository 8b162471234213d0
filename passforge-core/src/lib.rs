//! PassForge Core Library
//!
//! Everything needed to issue and serve wallet passes: content validation,
//! deterministic bundle packaging, manifest signing, the pass/device
//! registration registry, blob storage, push delivery, and the update
//! orchestrator that ties them together.

pub mod blob;
pub mod bundle;
pub mod catalog;
pub mod config;
pub mod content;
pub mod deadline;
pub mod error;
pub mod freshness;
pub mod orchestrator;
pub mod push;
pub mod registry;
pub mod services;
pub mod signer;
pub mod token;
pub mod validator;

pub use blob::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use bundle::{Bundle, BundleEntry, BundleError};
pub use catalog::{PassTypeCatalog, PassTypeProfile};
pub use config::{ConfigError, ServiceConfig};
pub use content::{PassContent, PassStyle};
pub use deadline::{Deadline, DeadlineExceeded};
pub use error::{PassError, Result};
pub use orchestrator::{PublishOutcome, UpdateOrchestrator};
pub use push::{PushError, PushNotifier};
pub use registry::{
    DeviceRegistration, MemoryRegistry, Pass, PassCredentials, PassRegistry, RegistrationOutcome,
    RegistryError, SqliteRegistry, UpdatedSerials,
};
pub use services::Services;
pub use signer::{ManifestSigner, SigningError, SigningIdentity};
pub use validator::{validate, ValidationError};
