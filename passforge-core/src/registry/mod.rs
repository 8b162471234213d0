//! Pass and device registration registry.
//!
//! A pass is either unknown (no record) or active (record exists); there is
//! no terminal state. `updated_at` advances strictly monotonically on every
//! update. Device registrations may only reference active passes.
//!
//! Every operation takes a [`Deadline`]. Backends give up with
//! [`RegistryError::DeadlineExceeded`] before touching state when the
//! deadline has passed or their lock cannot be acquired in time; once a
//! mutation starts it runs to completion as a single unit.

mod memory;
mod sqlite;

pub use memory::MemoryRegistry;
pub use sqlite::SqliteRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deadline::{Deadline, DeadlineExceeded};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflicting write, retry later: {0}")]
    ConflictingWrite(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl RegistryError {
    /// Transient failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConflictingWrite(_) | Self::DeadlineExceeded)
    }
}

impl From<DeadlineExceeded> for RegistryError {
    fn from(_: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded
    }
}

/// An issued pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pass {
    pub serial_number: String,
    pub authentication_token: String,
    pub type_identifier: String,
    pub updated_at: DateTime<Utc>,
}

impl Pass {
    /// All three credential components match.
    pub fn matches(&self, credentials: &PassCredentials<'_>) -> bool {
        self.serial_number == credentials.serial_number
            && self.authentication_token == credentials.authentication_token
            && self.type_identifier == credentials.type_identifier
    }
}

/// The three values a device presents to prove it holds a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassCredentials<'a> {
    pub serial_number: &'a str,
    pub authentication_token: &'a str,
    pub type_identifier: &'a str,
}

impl<'a> PassCredentials<'a> {
    pub fn new(
        serial_number: &'a str,
        authentication_token: &'a str,
        type_identifier: &'a str,
    ) -> Self {
        Self {
            serial_number,
            authentication_token,
            type_identifier,
        }
    }
}

/// A device's subscription to updates for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub push_token: String,
    pub serial_number: String,
    pub type_identifier: String,
}

/// Result of an idempotent register call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created,
    AlreadyRegistered,
}

/// Serials registered to a device that changed since a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatedSerials {
    pub serial_numbers: Vec<String>,
    /// Latest `updated_at` among the returned passes; the next tag.
    pub last_updated: Option<DateTime<Utc>>,
}

impl UpdatedSerials {
    pub fn is_empty(&self) -> bool {
        self.serial_numbers.is_empty()
    }
}

/// Durable store for passes and device registrations.
pub trait PassRegistry: Send + Sync {
    /// Create an active pass. `Conflict` if the serial number exists.
    fn insert_pass(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<Pass, RegistryError>;

    /// Advance `updated_at`. `NotFound` if the pass does not exist.
    fn update_pass(
        &self,
        deadline: Deadline,
        serial_number: &str,
    ) -> Result<DateTime<Utc>, RegistryError>;

    /// Look up a pass by serial number alone. Not for device-facing use.
    fn get_pass(&self, deadline: Deadline, serial_number: &str)
        -> Result<Option<Pass>, RegistryError>;

    /// Whether a pass matching all three credentials exists.
    fn find_pass(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<bool, RegistryError>;

    /// Idempotently register a device. A repeated call refreshes the push
    /// token and reports `AlreadyRegistered`. `NotFound` if no pass with that
    /// serial number and type exists.
    fn register(
        &self,
        deadline: Deadline,
        registration: &DeviceRegistration,
    ) -> Result<RegistrationOutcome, RegistryError>;

    /// Remove a registration. Returns whether a row was removed.
    fn unregister(
        &self,
        deadline: Deadline,
        device_id: &str,
        serial_number: &str,
        type_identifier: &str,
    ) -> Result<bool, RegistryError>;

    /// Serials registered to the device under the type, limited to passes
    /// updated strictly after `since_tag` unless the tag is empty.
    fn find_serials(
        &self,
        deadline: Deadline,
        device_id: &str,
        type_identifier: &str,
        since_tag: &str,
    ) -> Result<UpdatedSerials, RegistryError>;

    /// `updated_at` of the pass matching all three credentials. Any mismatch
    /// is `NotFound`, indistinguishable from an unknown serial.
    fn latest_timestamp(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<DateTime<Utc>, RegistryError>;

    /// Push tokens of every device registered for the serial number.
    fn push_tokens(
        &self,
        deadline: Deadline,
        serial_number: &str,
    ) -> Result<Vec<String>, RegistryError>;
}

/// Interpret a `passesUpdatedSince` tag. Empty means everything; a tag we
/// cannot parse is treated the same way so the device resynchronizes.
pub(crate) fn since_filter(since_tag: &str) -> Option<DateTime<Utc>> {
    if since_tag.trim().is_empty() {
        return None;
    }
    let parsed = crate::freshness::parse_update_tag(since_tag);
    if parsed.is_none() {
        tracing::warn!(tag = since_tag, "Unparseable update tag, returning all serials");
    }
    parsed
}

/// Next `updated_at` in microseconds: now, but always past `previous`.
pub(crate) fn next_timestamp_micros(previous: Option<i64>) -> i64 {
    let now = Utc::now().timestamp_micros();
    match previous {
        Some(prev) if prev >= now => prev + 1,
        _ => now,
    }
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| RegistryError::Storage(format!("timestamp out of range: {}", micros)))
}

fn not_found() -> RegistryError {
    RegistryError::NotFound("pass not found".to_string())
}
