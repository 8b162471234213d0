#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use passforge_core::content::{Field, StyleFields};
use passforge_core::{ManifestSigner, PassContent, SigningError};

pub const PASS_TYPE: &str = "com.example.pass";

pub fn content(serial: &str, token: &str) -> PassContent {
    PassContent {
        description: "Event ticket".into(),
        format_version: 1,
        organization_name: "Example Events".into(),
        pass_type_identifier: PASS_TYPE.into(),
        serial_number: serial.into(),
        team_identifier: "TEAM123456".into(),
        web_service_url: "https://passes.example.com/".into(),
        authentication_token: token.into(),
        event_ticket: Some(StyleFields {
            primary_fields: vec![Field::new("event", "Concert")],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Signs with a constant, or fails while `failing` is set.
#[derive(Default)]
pub struct StubSigner {
    pub failing: AtomicBool,
}

impl ManifestSigner for StubSigner {
    fn sign(&self, _manifest: &[u8]) -> Result<Vec<u8>, SigningError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SigningError::Tool {
                status: "exit status: 1".into(),
                stderr: "unable to load signing key".into(),
            });
        }
        Ok(b"detached-signature".to_vec())
    }
}
