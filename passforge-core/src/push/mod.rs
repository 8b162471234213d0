//! Push delivery: nudges a device to re-fetch its passes.
//!
//! A wallet push carries no payload. The device reacts by listing its
//! updated serials and fetching the new bundles, so a lost push only delays
//! the update until the device polls on its own.

mod apns;
mod recording;

pub use apns::ApnsNotifier;
pub use recording::{NoopNotifier, RecordingNotifier};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PushError {
    #[error("push gateway rejected token with {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("push transport error: {0}")]
    Transport(String),

    #[error("push configuration error: {0}")]
    Config(String),
}

/// Delivers an update nudge to one device push token.
pub trait PushNotifier: Send + Sync {
    fn deliver(&self, push_token: &str) -> Result<(), PushError>;
}
