//! SQLite registry backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::{
    from_micros, next_timestamp_micros, not_found, since_filter, DeviceRegistration, Pass,
    PassCredentials, PassRegistry, RegistrationOutcome, RegistryError, UpdatedSerials,
};
use crate::deadline::Deadline;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe SQLite registry.
///
/// One connection behind a mutex; every mutation is a single immediate
/// transaction, which gives per-serial writes at-most-one-writer ordering.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.initialize_schema()?;
        tracing::info!(path = %path.display(), "Opened pass registry");
        Ok(registry)
    }

    pub fn in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.initialize_schema()?;
        Ok(registry)
    }

    fn initialize_schema(&self) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS passes (
                serial_number TEXT PRIMARY KEY,
                authentication_token TEXT NOT NULL,
                type_identifier TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS registrations (
                device_id TEXT NOT NULL,
                serial_number TEXT NOT NULL,
                type_identifier TEXT NOT NULL,
                push_token TEXT NOT NULL,
                registered_at INTEGER NOT NULL,
                PRIMARY KEY (device_id, serial_number),
                FOREIGN KEY (serial_number) REFERENCES passes(serial_number)
            );

            CREATE INDEX IF NOT EXISTS idx_registrations_device_type
                ON registrations(device_id, type_identifier);
            CREATE INDEX IF NOT EXISTS idx_registrations_serial
                ON registrations(serial_number);",
        )?;
        Ok(())
    }

    /// Acquire the connection, waiting no longer than the deadline allows.
    fn lock(&self, deadline: Deadline) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        deadline.check()?;
        match deadline.remaining() {
            None => Ok(self.conn.lock()),
            Some(left) => self
                .conn
                .try_lock_for(left)
                .ok_or(RegistryError::DeadlineExceeded),
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                RegistryError::ConflictingWrite(err.to_string())
            }
            _ => RegistryError::Storage(err.to_string()),
        }
    }
}

impl PassRegistry for SqliteRegistry {
    fn insert_pass(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<Pass, RegistryError> {
        let conn = self.lock(deadline)?;
        let now = next_timestamp_micros(None);
        let inserted = conn.execute(
            "INSERT INTO passes
                (serial_number, authentication_token, type_identifier, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(serial_number) DO NOTHING",
            params![
                credentials.serial_number,
                credentials.authentication_token,
                credentials.type_identifier,
                now,
            ],
        )?;
        if inserted == 0 {
            return Err(RegistryError::Conflict(format!(
                "pass {} already exists",
                credentials.serial_number
            )));
        }

        tracing::debug!(serial = credentials.serial_number, "Inserted pass");
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
        let mut conn = self.lock(deadline)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous: Option<i64> = tx
            .query_row(
                "SELECT updated_at FROM passes WHERE serial_number = ?1",
                params![serial_number],
                |row| row.get(0),
            )
            .optional()?;
        let Some(previous) = previous else {
            return Err(not_found());
        };

        let next = next_timestamp_micros(Some(previous));
        tx.execute(
            "UPDATE passes SET updated_at = ?1 WHERE serial_number = ?2",
            params![next, serial_number],
        )?;
        tx.commit()?;
        from_micros(next)
    }

    fn get_pass(
        &self,
        deadline: Deadline,
        serial_number: &str,
    ) -> Result<Option<Pass>, RegistryError> {
        let conn = self.lock(deadline)?;
        let row = conn
            .query_row(
                "SELECT serial_number, authentication_token, type_identifier, updated_at
                 FROM passes WHERE serial_number = ?1",
                params![serial_number],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(serial_number, authentication_token, type_identifier, updated_at)| {
            Ok(Pass {
                serial_number,
                authentication_token,
                type_identifier,
                updated_at: from_micros(updated_at)?,
            })
        })
        .transpose()
    }

    fn find_pass(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<bool, RegistryError> {
        let conn = self.lock(deadline)?;
        Ok(query_updated_at(&conn, credentials)?.is_some())
    }

    fn register(
        &self,
        deadline: Deadline,
        registration: &DeviceRegistration,
    ) -> Result<RegistrationOutcome, RegistryError> {
        let mut conn = self.lock(deadline)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM passes WHERE serial_number = ?1 AND type_identifier = ?2",
                params![registration.serial_number, registration.type_identifier],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(not_found());
        }

        let created = tx.execute(
            "INSERT INTO registrations
                (device_id, serial_number, type_identifier, push_token, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(device_id, serial_number) DO NOTHING",
            params![
                registration.device_id,
                registration.serial_number,
                registration.type_identifier,
                registration.push_token,
                Utc::now().timestamp_micros(),
            ],
        )? == 1;

        if !created {
            tx.execute(
                "UPDATE registrations SET push_token = ?1
                 WHERE device_id = ?2 AND serial_number = ?3",
                params![
                    registration.push_token,
                    registration.device_id,
                    registration.serial_number,
                ],
            )?;
        }
        tx.commit()?;

        Ok(if created {
            RegistrationOutcome::Created
        } else {
            RegistrationOutcome::AlreadyRegistered
        })
    }

    fn unregister(
        &self,
        deadline: Deadline,
        device_id: &str,
        serial_number: &str,
        type_identifier: &str,
    ) -> Result<bool, RegistryError> {
        let conn = self.lock(deadline)?;
        let removed = conn.execute(
            "DELETE FROM registrations
             WHERE device_id = ?1 AND serial_number = ?2 AND type_identifier = ?3",
            params![device_id, serial_number, type_identifier],
        )?;
        Ok(removed > 0)
    }

    fn find_serials(
        &self,
        deadline: Deadline,
        device_id: &str,
        type_identifier: &str,
        since_tag: &str,
    ) -> Result<UpdatedSerials, RegistryError> {
        let since = since_filter(since_tag).map(|ts| ts.timestamp_micros());
        let conn = self.lock(deadline)?;
        let mut stmt = conn.prepare(
            "SELECT p.serial_number, p.updated_at
             FROM registrations r
             JOIN passes p ON p.serial_number = r.serial_number
             WHERE r.device_id = ?1
               AND r.type_identifier = ?2
               AND (?3 IS NULL OR p.updated_at > ?3)
             ORDER BY p.serial_number",
        )?;
        let rows = stmt
            .query_map(params![device_id, type_identifier, since], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = UpdatedSerials::default();
        let mut latest = None;
        for (serial, updated_at) in rows {
            result.serial_numbers.push(serial);
            latest = latest.max(Some(updated_at));
        }
        result.last_updated = latest.map(from_micros).transpose()?;
        Ok(result)
    }

    fn latest_timestamp(
        &self,
        deadline: Deadline,
        credentials: PassCredentials<'_>,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let conn = self.lock(deadline)?;
        match query_updated_at(&conn, credentials)? {
            Some(micros) => from_micros(micros),
            None => Err(not_found()),
        }
    }

    fn push_tokens(
        &self,
        deadline: Deadline,
        serial_number: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let conn = self.lock(deadline)?;
        let mut stmt = conn.prepare(
            "SELECT push_token FROM registrations
             WHERE serial_number = ?1 AND push_token != ''
             ORDER BY device_id",
        )?;
        let tokens = stmt
            .query_map(params![serial_number], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tokens)
    }
}

fn query_updated_at(
    conn: &Connection,
    credentials: PassCredentials<'_>,
) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        "SELECT updated_at FROM passes
         WHERE serial_number = ?1 AND authentication_token = ?2 AND type_identifier = ?3",
        params![
            credentials.serial_number,
            credentials.authentication_token,
            credentials.type_identifier,
        ],
        |row| row.get(0),
    )
    .optional()
}
