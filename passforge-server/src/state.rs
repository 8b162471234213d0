//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;

use passforge_core::{BlobStore, Deadline, PassRegistry, ServiceConfig};

use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn PassRegistry>,
    pub blobs: Arc<dyn BlobStore>,
    pub auth_scheme: Arc<str>,
    pub request_timeout: Duration,
    pub max_log_lines: usize,
    pub log_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn PassRegistry>,
        blobs: Arc<dyn BlobStore>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            registry,
            blobs,
            auth_scheme: Arc::from(config.auth_scheme.as_str()),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_log_lines: config.max_log_lines,
            log_limiter: RateLimiter::new(config.log_rate_limit_per_minute),
        }
    }

    /// Deadline for the registry and blob calls of one request.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }

    /// Run blocking registry/blob work off the async workers.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(AppState) -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || f(state)).await?
    }
}
