//! Durable storage seam for the credential record.

use anyhow::{anyhow, Result};
use std::sync::Mutex;

/// Durable key-value backing for the serialized credential record.
///
/// Backends store the record opaquely; parsing and corruption handling live in
/// [`CredentialStore`](super::CredentialStore). A failed read is treated by the
/// store as corrupt state, never surfaced to callers.
pub trait Persistence: Send + Sync {
    /// Returns the persisted record, if one exists.
    fn read_pair(&self) -> Result<Option<String>>;

    /// Atomically replaces the persisted record.
    fn write_pair(&self, record: &str) -> Result<()>;

    /// Removes the persisted record. Removing nothing is not an error.
    fn erase_pair(&self) -> Result<()>;

    /// Deletes state left behind by the legacy single-token format.
    ///
    /// Returns `true` if any legacy state was found.
    fn purge_legacy(&self) -> Result<bool>;
}

/// In-process backend, used by tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    inner: Mutex<MemorySlots>,
}

#[derive(Debug, Default)]
struct MemorySlots {
    record: Option<String>,
    legacy_token: Option<String>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the backend with a raw record, bypassing serialization.
    pub fn with_record(record: impl Into<String>) -> Self {
        let persistence = Self::default();
        if let Ok(mut slots) = persistence.inner.lock() {
            slots.record = Some(record.into());
        }
        persistence
    }

    /// Seeds the backend with a legacy single-token entry.
    pub fn with_legacy_token(token: impl Into<String>) -> Self {
        let persistence = Self::default();
        if let Ok(mut slots) = persistence.inner.lock() {
            slots.legacy_token = Some(token.into());
        }
        persistence
    }

    /// Raw record currently held, for inspection.
    pub fn raw_record(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|slots| slots.record.clone())
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, MemorySlots>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory persistence lock poisoned"))
    }
}

impl Persistence for MemoryPersistence {
    fn read_pair(&self) -> Result<Option<String>> {
        Ok(self.slots()?.record.clone())
    }

    fn write_pair(&self, record: &str) -> Result<()> {
        self.slots()?.record = Some(record.to_string());
        Ok(())
    }

    fn erase_pair(&self) -> Result<()> {
        self.slots()?.record = None;
        Ok(())
    }

    fn purge_legacy(&self) -> Result<bool> {
        Ok(self.slots()?.legacy_token.take().is_some())
    }
}
