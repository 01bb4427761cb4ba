//! Encrypted session persistence using SQLite.
//!
//! Holds the serialized credential record so a session survives restarts.
//! The record is encrypted at rest using AES-256-GCM.

use super::encryption::{self, EncryptionKey, Sealed};
use super::persistence::Persistence;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Slot holding the current credential record.
const TOKENS_SLOT: &str = "auth_tokens";

/// Slots written by the legacy single-token client. Never migrated.
const LEGACY_SLOTS: [&str; 2] = ["token", "user"];

/// Encrypted session persistence backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE session_state (
///     slot TEXT PRIMARY KEY,       -- "auth_tokens", or a legacy slot
///     value TEXT NOT NULL,         -- Encrypted record (base64)
///     nonce TEXT NOT NULL,         -- Nonce for value (base64)
///     updated_at TEXT NOT NULL     -- ISO 8601 timestamp
/// );
/// ```
///
/// The record is written with a single upsert, so the table always holds the
/// last complete record or nothing.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
    key: EncryptionKey,
}

impl SqlitePersistence {
    /// Creates or opens the session database.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key = EncryptionKey::from_base64(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open session database")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS session_state (
                slot TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                nonce TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create session_state table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            key,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("session database lock poisoned"))
    }

    /// Writes a plaintext value into an arbitrary slot.
    ///
    /// Only used to reproduce state left by older clients.
    #[cfg(test)]
    pub(crate) fn write_raw(&self, slot: &str, value: &str, nonce: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO session_state (slot, value, nonce, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![slot, value, nonce, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn raw_value(&self, slot: &str) -> Result<Option<String>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT value FROM session_state WHERE slot = ?1",
                params![slot],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl Persistence for SqlitePersistence {
    fn read_pair(&self) -> Result<Option<String>> {
        let sealed = self
            .conn()?
            .query_row(
                "SELECT value, nonce FROM session_state WHERE slot = ?1",
                params![TOKENS_SLOT],
                |row| {
                    Ok(Sealed {
                        ciphertext: row.get(0)?,
                        nonce: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read credential record")?;

        sealed
            .map(|sealed| {
                encryption::open(&sealed, &self.key).context("Failed to decrypt credential record")
            })
            .transpose()
    }

    fn write_pair(&self, record: &str) -> Result<()> {
        let sealed =
            encryption::seal(record, &self.key).context("Failed to encrypt credential record")?;

        self.conn()?
            .execute(
                r#"
                INSERT INTO session_state (slot, value, nonce, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(slot) DO UPDATE SET
                    value = excluded.value,
                    nonce = excluded.nonce,
                    updated_at = excluded.updated_at
                "#,
                params![TOKENS_SLOT, sealed.ciphertext, sealed.nonce, Utc::now().to_rfc3339()],
            )
            .context("Failed to store credential record")?;

        Ok(())
    }

    fn erase_pair(&self) -> Result<()> {
        self.conn()?
            .execute(
                "DELETE FROM session_state WHERE slot = ?1",
                params![TOKENS_SLOT],
            )
            .context("Failed to erase credential record")?;
        Ok(())
    }

    fn purge_legacy(&self) -> Result<bool> {
        let conn = self.conn()?;
        let token_found: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM session_state WHERE slot = ?1)",
                params![LEGACY_SLOTS[0]],
                |row| row.get(0),
            )
            .context("Failed to check for legacy session state")?;

        if !token_found {
            return Ok(false);
        }

        for slot in LEGACY_SLOTS {
            conn.execute("DELETE FROM session_state WHERE slot = ?1", params![slot])
                .context("Failed to purge legacy session state")?;
        }

        Ok(true)
    }
}
