//! Detached manifest signatures.
//!
//! Two interchangeable strategies implement [`ManifestSigner`]:
//! - [`InProcessSigner`]: PKCS#7 signing through the linked OpenSSL library
//! - [`ExternalSigner`]: delegates to a signing executable (`openssl smime`)
//!
//! Both load and check the certificate material when constructed, so a bad
//! certificate, key, or passphrase fails at startup rather than on the first
//! pass update.

mod external;
mod in_process;

pub use external::ExternalSigner;
pub use in_process::InProcessSigner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{SigningConfig, SigningMode};

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("certificate material error: {0}")]
    Certificate(String),

    #[error("signing failed: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("signing tool exited with {status}: {stderr}")]
    Tool { status: String, stderr: String },

    #[error("signing produced an empty signature")]
    EmptySignature,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces a detached signature over manifest bytes.
pub trait ManifestSigner: Send + Sync {
    fn sign(&self, manifest: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// Signing identity: certificate, private key, intermediate (chain of
/// trust) certificate and the passphrase protecting the key. Built once at
/// startup and handed to whichever signer is configured.
#[derive(Clone)]
pub struct SigningIdentity {
    pub certificate_path: PathBuf,
    /// PEM private key. `None` when `certificate_path` is a PKCS#12 bundle
    /// holding both certificate and key.
    pub key_path: Option<PathBuf>,
    pub intermediate_path: PathBuf,
    passphrase: Zeroizing<String>,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("certificate_path", &self.certificate_path)
            .field("key_path", &self.key_path)
            .field("intermediate_path", &self.intermediate_path)
            .finish_non_exhaustive()
    }
}

impl SigningIdentity {
    pub fn new(
        certificate_path: impl Into<PathBuf>,
        key_path: Option<PathBuf>,
        intermediate_path: impl Into<PathBuf>,
        passphrase: &str,
    ) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            key_path,
            intermediate_path: intermediate_path.into(),
            passphrase: Zeroizing::new(passphrase.to_string()),
        }
    }

    pub fn from_config(config: &SigningConfig) -> Self {
        Self::new(
            &config.certificate_path,
            config.key_path.clone(),
            &config.intermediate_path,
            &config.passphrase,
        )
    }

    pub(crate) fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Load and cross-check the certificate material.
    pub(crate) fn load(&self) -> Result<SigningMaterial, SigningError> {
        let (certificate, key) = match &self.key_path {
            Some(key_path) => {
                let certificate = X509::from_pem(&read(&self.certificate_path)?)
                    .map_err(|e| certificate_error(&self.certificate_path, e))?;
                let pem = read(key_path)?;
                let key = if self.passphrase.is_empty() {
                    PKey::private_key_from_pem(&pem)
                } else {
                    PKey::private_key_from_pem_passphrase(&pem, self.passphrase.as_bytes())
                }
                .map_err(|e| certificate_error(key_path, e))?;
                (certificate, key)
            }
            None => {
                let parsed = Pkcs12::from_der(&read(&self.certificate_path)?)
                    .and_then(|p12| p12.parse2(&self.passphrase))
                    .map_err(|e| certificate_error(&self.certificate_path, e))?;
                match (parsed.cert, parsed.pkey) {
                    (Some(cert), Some(key)) => (cert, key),
                    _ => {
                        return Err(SigningError::Certificate(format!(
                            "{} does not contain both a certificate and a private key",
                            self.certificate_path.display()
                        )))
                    }
                }
            }
        };

        let certificate_key = certificate.public_key()?;
        if !certificate_key.public_eq(&key) {
            return Err(SigningError::Certificate(
                "private key does not match signing certificate".to_string(),
            ));
        }

        let intermediate = X509::from_pem(&read(&self.intermediate_path)?)
            .map_err(|e| certificate_error(&self.intermediate_path, e))?;

        Ok(SigningMaterial {
            certificate,
            key,
            intermediate,
        })
    }
}

/// Parsed certificate material.
pub(crate) struct SigningMaterial {
    pub certificate: X509,
    pub key: PKey<Private>,
    pub intermediate: X509,
}

impl SigningMaterial {
    pub fn chain(&self) -> Result<Stack<X509>, SigningError> {
        let mut chain = Stack::new()?;
        chain.push(self.intermediate.clone())?;
        Ok(chain)
    }
}

/// Build the signer selected by configuration.
pub fn from_config(config: &SigningConfig) -> Result<Arc<dyn ManifestSigner>, SigningError> {
    let identity = SigningIdentity::from_config(config);
    let signer: Arc<dyn ManifestSigner> = match config.mode {
        SigningMode::InProcess => Arc::new(InProcessSigner::new(&identity)?),
        SigningMode::External => Arc::new(ExternalSigner::new(&identity, &config.tool_path)?),
    };
    tracing::info!(mode = ?config.mode, "Manifest signer ready");
    Ok(signer)
}

fn read(path: &Path) -> Result<Vec<u8>, SigningError> {
    std::fs::read(path).map_err(|e| {
        SigningError::Certificate(format!("cannot read {}: {}", path.display(), e))
    })
}

fn certificate_error(path: &Path, err: openssl::error::ErrorStack) -> SigningError {
    SigningError::Certificate(format!("cannot parse {}: {}", path.display(), err))
}
