//! Per pass type behaviour, looked up by type identifier.

use std::collections::HashMap;
use std::sync::Arc;

use crate::content::{PassContent, PassStyle};
use crate::push::{NoopNotifier, PushNotifier};
use crate::validator::ValidationError;

/// What the service knows about one pass type.
#[derive(Clone)]
pub struct PassTypeProfile {
    /// Style every pass of this type must use, when pinned.
    pub style: Option<PassStyle>,
    pub notifier: Arc<dyn PushNotifier>,
}

impl PassTypeProfile {
    pub fn new(style: Option<PassStyle>, notifier: Arc<dyn PushNotifier>) -> Self {
        Self { style, notifier }
    }
}

/// Pass type identifier to profile, with a fallback notifier for types
/// that are not catalogued.
#[derive(Clone)]
pub struct PassTypeCatalog {
    profiles: HashMap<String, PassTypeProfile>,
    fallback: Arc<dyn PushNotifier>,
}

impl Default for PassTypeCatalog {
    fn default() -> Self {
        Self::new(Arc::new(NoopNotifier))
    }
}

impl PassTypeCatalog {
    pub fn new(fallback: Arc<dyn PushNotifier>) -> Self {
        Self {
            profiles: HashMap::new(),
            fallback,
        }
    }

    pub fn with_type(mut self, identifier: impl Into<String>, profile: PassTypeProfile) -> Self {
        self.insert(identifier, profile);
        self
    }

    pub fn insert(&mut self, identifier: impl Into<String>, profile: PassTypeProfile) {
        self.profiles.insert(identifier.into(), profile);
    }

    pub fn profile(&self, identifier: &str) -> Option<&PassTypeProfile> {
        self.profiles.get(identifier)
    }

    pub fn notifier_for(&self, identifier: &str) -> Arc<dyn PushNotifier> {
        self.profiles
            .get(identifier)
            .map(|profile| Arc::clone(&profile.notifier))
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Reject content whose style disagrees with its catalogued type.
    pub fn check_style(&self, content: &PassContent) -> Result<(), ValidationError> {
        let Some(expected) = self
            .profiles
            .get(&content.pass_type_identifier)
            .and_then(|profile| profile.style)
        else {
            return Ok(());
        };
        match content.pass_style() {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(ValidationError::new(format!(
                "pass type {} requires style {}, found {}",
                content.pass_type_identifier, expected, actual
            ))),
            None => Err(ValidationError::new(format!(
                "pass type {} requires style {}",
                content.pass_type_identifier, expected
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::StyleFields;
    use crate::push::RecordingNotifier;

    fn content(type_id: &str) -> PassContent {
        PassContent {
            pass_type_identifier: type_id.into(),
            coupon: Some(StyleFields::default()),
            ..Default::default()
        }
    }

    #[test]
    fn routes_notifier_by_type() {
        let boarding = RecordingNotifier::new();
        let fallback = RecordingNotifier::new();
        let catalog = PassTypeCatalog::new(Arc::new(fallback.clone())).with_type(
            "pass.boarding",
            PassTypeProfile::new(None, Arc::new(boarding.clone())),
        );

        catalog.notifier_for("pass.boarding").deliver("P1").unwrap();
        catalog.notifier_for("pass.unknown").deliver("P2").unwrap();
        assert_eq!(boarding.delivered(), vec!["P1"]);
        assert_eq!(fallback.delivered(), vec!["P2"]);
    }

    #[test]
    fn pinned_style_is_enforced() {
        let catalog = PassTypeCatalog::default()
            .with_type(
                "pass.coupon",
                PassTypeProfile::new(Some(PassStyle::Coupon), Arc::new(NoopNotifier)),
            )
            .with_type(
                "pass.boarding",
                PassTypeProfile::new(Some(PassStyle::BoardingPass), Arc::new(NoopNotifier)),
            );

        assert!(catalog.check_style(&content("pass.coupon")).is_ok());
        assert!(catalog.check_style(&content("pass.unlisted")).is_ok());
        let err = catalog.check_style(&content("pass.boarding")).unwrap_err();
        assert_eq!(
            err.reason(),
            "pass type pass.boarding requires style boardingPass, found coupon"
        );
    }
}
