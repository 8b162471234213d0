//! Signing by delegation to an external executable.
//!
//! The manifest is written to a fresh temporary directory, the tool is run
//! as `<tool> smime -binary -sign ... -outform DER`, and the signature is read
//! back from the same directory. Each call gets its own directory, so
//! concurrent signatures never share files.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{ManifestSigner, SigningError, SigningIdentity};

/// Environment variable used to hand the key passphrase to the tool, which
/// keeps it off the process command line.
const PASSPHRASE_ENV: &str = "PASSFORGE_SIGNING_PASSPHRASE";

pub struct ExternalSigner {
    tool: PathBuf,
    identity: SigningIdentity,
}

impl ExternalSigner {
    /// Checks the certificate material up front. A PEM private key is
    /// required because the tool receives the key as a file path.
    pub fn new(identity: &SigningIdentity, tool: &Path) -> Result<Self, SigningError> {
        if identity.key_path.is_none() {
            return Err(SigningError::Certificate(
                "external signing requires a PEM key_path".to_string(),
            ));
        }
        identity.load()?;
        Ok(Self {
            tool: tool.to_path_buf(),
            identity: identity.clone(),
        })
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.tool);
        command
            .arg("smime")
            .arg("-binary")
            .arg("-sign")
            .arg("-certfile")
            .arg(&self.identity.intermediate_path)
            .arg("-signer")
            .arg(&self.identity.certificate_path)
            .arg("-in")
            .arg(input)
            .arg("-out")
            .arg(output)
            .arg("-outform")
            .arg("DER");
        if let Some(key_path) = &self.identity.key_path {
            command.arg("-inkey").arg(key_path);
        }
        if !self.identity.passphrase().is_empty() {
            command
                .arg("-passin")
                .arg(format!("env:{}", PASSPHRASE_ENV))
                .env(PASSPHRASE_ENV, self.identity.passphrase());
        }
        command
    }
}

impl ManifestSigner for ExternalSigner {
    fn sign(&self, manifest: &[u8]) -> Result<Vec<u8>, SigningError> {
        let workdir = tempfile::Builder::new()
            .prefix("passforge-sign-")
            .tempdir()?;
        let input = workdir.path().join("manifest.json");
        let output = workdir.path().join("signature");
        std::fs::write(&input, manifest)?;

        let result = self.command(&input, &output).output()?;
        if !result.status.success() {
            return Err(SigningError::Tool {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let signature = match std::fs::read(&output) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if signature.is_empty() {
            return Err(SigningError::EmptySignature);
        }
        tracing::debug!(bytes = signature.len(), "External signer produced signature");
        Ok(signature)
    }
}
