//! Service configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::content::PassStyle;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml_dep::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen_addr: String,
    pub database_path: PathBuf,
    pub blob_root: PathBuf,
    /// Scheme expected in the device `Authorization` header.
    pub auth_scheme: String,
    pub max_payload_size: usize,
    pub request_timeout_secs: u64,
    pub log_rate_limit_per_minute: u32,
    pub max_log_lines: usize,
    pub web_service_url: String,
    pub signing: Option<SigningConfig>,
    pub push: PushConfig,
    pub pass_types: Vec<PassTypeConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8744".to_string(),
            database_path: PathBuf::from("passforge.db"),
            blob_root: PathBuf::from("blobs"),
            auth_scheme: "ApplePass".to_string(),
            max_payload_size: 65_536,
            request_timeout_secs: 10,
            log_rate_limit_per_minute: 30,
            max_log_lines: 200,
            web_service_url: "http://127.0.0.1:8744/".to_string(),
            signing: None,
            push: PushConfig::default(),
            pass_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    #[default]
    InProcess,
    External,
}

/// Certificate material for manifest signing. The passphrase buffer is
/// wiped when the config is dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub mode: SigningMode,
    /// PEM certificate, or a PKCS#12 bundle when `key_path` is unset.
    pub certificate_path: PathBuf,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    pub intermediate_path: PathBuf,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("openssl")
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("mode", &self.mode)
            .field("certificate_path", &self.certificate_path)
            .field("key_path", &self.key_path)
            .field("intermediate_path", &self.intermediate_path)
            .field("tool_path", &self.tool_path)
            .finish_non_exhaustive()
    }
}

impl Drop for SigningConfig {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub gateway_url: String,
    /// PEM client certificate + key presented to the gateway.
    pub identity_path: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_url: "https://api.push.apple.com".to_string(),
            identity_path: None,
            timeout_secs: 10,
        }
    }
}

/// A known pass type and the style its content must use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassTypeConfig {
    pub identifier: String,
    #[serde(default)]
    pub style: Option<PassStyle>,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml_dep::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_scheme.trim().is_empty() || self.auth_scheme.contains(' ') {
            return Err(ConfigError::Invalid(
                "auth_scheme must be a single non-empty word".to_string(),
            ));
        }
        if self.max_log_lines == 0 {
            return Err(ConfigError::Invalid("max_log_lines must be positive".to_string()));
        }
        if self.push.enabled && self.push.gateway_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "push.gateway_url is required when push is enabled".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pass_type in &self.pass_types {
            if pass_type.identifier.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "pass_types entry without identifier".to_string(),
                ));
            }
            if !seen.insert(pass_type.identifier.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pass type {}",
                    pass_type.identifier
                )));
            }
        }
        Ok(())
    }
}
