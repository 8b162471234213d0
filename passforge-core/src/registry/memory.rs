//! In-memory registry for tests and single-process tooling.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use super::{
    from_micros, next_timestamp_micros, not_found, since_filter, DeviceRegistration, Pass,
    PassCredentials, PassRegistry, RegistrationOutcome, RegistryError, UpdatedSerials,
};
use crate::deadline::Deadline;

#[derive(Default)]
struct State {
    passes: HashMap<String, StoredPass>,
    /// Keyed by (device, serial).
    registrations: BTreeMap<(String, String), Registration>,
}

struct StoredPass {
    authentication_token: String,
    type_identifier: String,
    updated_at: i64,
}

struct Registration {
    type_identifier: String,
    push_token: String,
}

/// Registry held in a single mutex-guarded map.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored registrations.
    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    fn lock(&self, deadline: Deadline) -> Result<MutexGuard<'_, State>, RegistryError> {
        deadline.check()?;
        match deadline.remaining() {
            None => Ok(self.state.lock()),
            Some(left) => self
                .state
                .try_lock_for(left)
                .ok_or(RegistryError::DeadlineExceeded),
        }
    }
}

impl State {
    fn authorized(&self, credentials: PassCredentials<'_>) -> Option<&StoredPass> {
        self.passes
            .get(credentials.serial_number)
            .filter(|pass| {
                pass.authentication_token == credentials.authentication_token
                    && pass.type_identifier == credentials.type_identifier
            })
    }
}

impl PassRegistry for MemoryRegistry {
    fn insert_pass(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<Pass, RegistryError> {
        let mut state = self.lock(deadline)?;
        if state.passes.contains_key(credentials.serial_number) {
            return Err(RegistryError::Conflict(format!(
                "pass {} already exists",
                credentials.serial_number
            )));
        }

        let now = next_timestamp_micros(None);
        state.passes.insert(
            credentials.serial_number.to_string(),
            StoredPass {
                authentication_token: credentials.authentication_token.to_string(),
                type_identifier: credentials.type_identifier.to_string(),
                updated_at: now,
            },
        );
        Ok(Pass {
            serial_number: credentials.serial_number.to_string(),
            authentication_token: credentials.authentication_token.to_string(),
            type_identifier: credentials.type_identifier.to_string(),
            updated_at: from_micros(now)?,
        })
    }

    fn update_pass(
        &self,
        deadline: Deadline,
        serial_number: &str,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let mut state = self.lock(deadline)?;
        let pass = state.passes.get_mut(serial_number).ok_or_else(not_found)?;
        pass.updated_at = next_timestamp_micros(Some(pass.updated_at));
        from_micros(pass.updated_at)
    }

    fn get_pass(
        &self,
        deadline: Deadline,
        serial_number: &str,
    ) -> Result<Option<Pass>, RegistryError> {
        let state = self.lock(deadline)?;
        state
            .passes
            .get(serial_number)
            .map(|pass| {
                Ok(Pass {
                    serial_number: serial_number.to_string(),
                    authentication_token: pass.authentication_token.clone(),
                    type_identifier: pass.type_identifier.clone(),
                    updated_at: from_micros(pass.updated_at)?,
                })
            })
            .transpose()
    }

    fn find_pass(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<bool, RegistryError> {
        let state = self.lock(deadline)?;
        Ok(state.authorized(credentials).is_some())
    }

    fn register(
        &self,
        deadline: Deadline,
        registration: &DeviceRegistration,
    ) -> Result<RegistrationOutcome, RegistryError> {
        let mut state = self.lock(deadline)?;
        let known = state
            .passes
            .get(&registration.serial_number)
            .is_some_and(|pass| pass.type_identifier == registration.type_identifier);
        if !known {
            return Err(not_found());
        }

        let key = (
            registration.device_id.clone(),
            registration.serial_number.clone(),
        );
        match state.registrations.get_mut(&key) {
            Some(existing) => {
                existing.push_token.clone_from(&registration.push_token);
                Ok(RegistrationOutcome::AlreadyRegistered)
            }
            None => {
                state.registrations.insert(
                    key,
                    Registration {
                        type_identifier: registration.type_identifier.clone(),
                        push_token: registration.push_token.clone(),
                    },
                );
                Ok(RegistrationOutcome::Created)
            }
        }
    }

    fn unregister(
        &self,
        deadline: Deadline,
        device_id: &str,
        serial_number: &str,
        type_identifier: &str,
    ) -> Result<bool, RegistryError> {
        let mut state = self.lock(deadline)?;
        let key = (device_id.to_string(), serial_number.to_string());
        let matches = state
            .registrations
            .get(&key)
            .is_some_and(|r| r.type_identifier == type_identifier);
        if matches {
            state.registrations.remove(&key);
        }
        Ok(matches)
    }

    fn find_serials(
        &self,
        deadline: Deadline,
        device_id: &str,
        type_identifier: &str,
        since_tag: &str,
    ) -> Result<UpdatedSerials, RegistryError> {
        let since = since_filter(since_tag).map(|ts| ts.timestamp_micros());
        let state = self.lock(deadline)?;

        let mut result = UpdatedSerials::default();
        let mut latest = None;
        // BTreeMap order keeps serials sorted per device
        for ((device, serial), registration) in &state.registrations {
            if device != device_id || registration.type_identifier != type_identifier {
                continue;
            }
            let Some(pass) = state.passes.get(serial) else {
                continue;
            };
            if since.is_some_and(|since| pass.updated_at <= since) {
                continue;
            }
            result.serial_numbers.push(serial.clone());
            latest = latest.max(Some(pass.updated_at));
        }
        result.last_updated = latest.map(from_micros).transpose()?;
        Ok(result)
    }

    fn latest_timestamp(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let state = self.lock(deadline)?;
        match state.authorized(credentials) {
            Some(pass) => from_micros(pass.updated_at),
            None => Err(not_found()),
        }
    }

    fn push_tokens(
        &self,
        deadline: Deadline,
        serial_number: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let state = self.lock(deadline)?;
        Ok(state
            .registrations
            .iter()
            .filter(|((_, serial), r)| serial == serial_number && !r.push_token.is_empty())
            .map(|(_, r)| r.push_token.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::conformance;

    #[test]
    fn conforms() {
        conformance::run_all(|| Box::new(MemoryRegistry::new()));
    }

    #[test]
    fn counts_registrations() {
        let registry = MemoryRegistry::new();
        let d = Deadline::none();
        registry
            .insert_pass(d, PassCredentials::new("S1", "T1", "com.example.pass"))
            .unwrap();
        for device in ["D1", "D2", "D1"] {
            registry
                .register(
                    d,
                    &DeviceRegistration {
                        device_id: device.into(),
                        push_token: format!("push-{}", device),
                        serial_number: "S1".into(),
                        type_identifier: "com.example.pass".into(),
                    },
                )
                .unwrap();
        }
        assert_eq!(registry.registration_count(), 2);
    }
}
