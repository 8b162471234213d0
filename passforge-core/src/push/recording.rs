use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{PushError, PushNotifier};

/// Drops every push. Used when push delivery is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl PushNotifier for NoopNotifier {
    fn deliver(&self, push_token: &str) -> Result<(), PushError> {
        tracing::debug!(push_token, "Push delivery disabled, skipping");
        Ok(())
    }
}

/// Records delivered tokens; tokens marked as failing are rejected.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_token(&self, push_token: &str) {
        self.failing.lock().insert(push_token.to_string());
    }

    /// Tokens delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }
}

impl PushNotifier for RecordingNotifier {
    fn deliver(&self, push_token: &str) -> Result<(), PushError> {
        if self.failing.lock().contains(push_token) {
            return Err(PushError::Rejected {
                status: 410,
                reason: "Unregistered".to_string(),
            });
        }
        self.delivered.lock().push(push_token.to_string());
        Ok(())
    }
}
