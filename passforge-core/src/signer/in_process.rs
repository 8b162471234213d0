//! PKCS#7 signing through the linked OpenSSL library.

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;

use super::{ManifestSigner, SigningError, SigningIdentity};

/// Signs manifests in-process with a loaded certificate and key. Holds only
/// immutable material, so one instance is shared across threads.
pub struct InProcessSigner {
    certificate: X509,
    key: PKey<Private>,
    chain: Stack<X509>,
}

impl InProcessSigner {
    pub fn new(identity: &SigningIdentity) -> Result<Self, SigningError> {
        let material = identity.load()?;
        let chain = material.chain()?;
        Ok(Self {
            certificate: material.certificate,
            key: material.key,
            chain,
        })
    }
}

impl ManifestSigner for InProcessSigner {
    fn sign(&self, manifest: &[u8]) -> Result<Vec<u8>, SigningError> {
        let pkcs7 = Pkcs7::sign(
            &self.certificate,
            &self.key,
            &self.chain,
            manifest,
            Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
        )?;
        let der = pkcs7.to_der()?;
        if der.is_empty() {
            return Err(SigningError::EmptySignature);
        }
        Ok(der)
    }
}
