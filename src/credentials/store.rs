//! Process-wide holder of the active credential pair.

use super::{now_millis, CredentialPair, Persistence};
use crate::error::{SessionError, SessionResult};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct StoreState {
    pair: Option<CredentialPair>,
    /// Advanced by every save and clear. Lets a renewal detect that the
    /// session it started from has since been replaced or ended.
    generation: u64,
}

/// Holds the active credential pair and mirrors it to persistence.
///
/// Readers are the dispatcher and the session manager; writes go through the
/// renewal coordinator so that a logout and an in-flight renewal cannot
/// overwrite each other.
pub struct CredentialStore {
    persistence: Arc<dyn Persistence>,
    state: RwLock<StoreState>,
}

impl CredentialStore {
    /// Restores the persisted pair.
    ///
    /// Legacy state is purged and yields no session. A record that cannot be
    /// read or parsed is erased and likewise yields no session.
    pub fn load(persistence: Arc<dyn Persistence>) -> Self {
        let pair = match restore(persistence.as_ref()) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "Discarding persisted session state");
                if let Err(e) = persistence.erase_pair() {
                    warn!(error = %e, "Failed to erase corrupt session state");
                }
                None
            }
        };

        if pair.is_some() {
            info!("Restored persisted session");
        }

        Self {
            persistence,
            state: RwLock::new(StoreState {
                pair,
                generation: 0,
            }),
        }
    }

    /// Replaces the whole pair, in persistence first and then in memory.
    pub fn save(&self, pair: &CredentialPair) -> SessionResult<()> {
        let mut state = self.write_state();
        self.persist(pair)?;
        state.pair = Some(pair.clone());
        state.generation += 1;
        Ok(())
    }

    /// Replaces the pair only if no save or clear happened since `generation`.
    ///
    /// Returns `false` without touching anything when the session moved on.
    pub fn save_if_generation(&self, generation: u64, pair: &CredentialPair) -> SessionResult<bool> {
        let mut state = self.write_state();
        if state.generation != generation {
            return Ok(false);
        }
        self.persist(pair)?;
        state.pair = Some(pair.clone());
        state.generation += 1;
        Ok(true)
    }

    /// Removes the pair from memory and persistence.
    ///
    /// Returns `true` if a session was active.
    pub fn clear(&self) -> bool {
        let mut state = self.write_state();
        if let Err(e) = self.persistence.erase_pair() {
            warn!(error = %e, "Failed to erase persisted session state");
        }
        state.generation += 1;
        state.pair.take().is_some()
    }

    /// Clears the pair only if no save or clear happened since `generation`.
    ///
    /// Returns `true` if a session was active and has been cleared.
    pub fn clear_if_generation(&self, generation: u64) -> bool {
        let mut state = self.write_state();
        if state.generation != generation {
            return false;
        }
        if let Err(e) = self.persistence.erase_pair() {
            warn!(error = %e, "Failed to erase persisted session state");
        }
        state.generation += 1;
        state.pair.take().is_some()
    }

    /// True if there is no pair, or the access credential expires within
    /// `threshold_ms` from now.
    pub fn is_expiring_soon(&self, threshold_ms: i64) -> bool {
        self.is_expiring_soon_at(now_millis(), threshold_ms)
    }

    pub fn is_expiring_soon_at(&self, now_ms: i64, threshold_ms: i64) -> bool {
        match &self.read_state().pair {
            Some(pair) => now_ms > pair.expires_at.saturating_sub(threshold_ms),
            None => true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_state().pair.is_some()
    }

    pub fn access_credential(&self) -> Option<String> {
        self.read_state()
            .pair
            .as_ref()
            .map(|pair| pair.access_token.clone())
    }

    pub fn renewal_credential(&self) -> Option<String> {
        self.read_state()
            .pair
            .as_ref()
            .map(|pair| pair.refresh_token.clone())
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.read_state().pair.as_ref().map(|pair| pair.expires_at)
    }

    pub fn current(&self) -> Option<CredentialPair> {
        self.read_state().pair.clone()
    }

    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    fn persist(&self, pair: &CredentialPair) -> SessionResult<()> {
        let record = serde_json::to_string(pair).map_err(|e| SessionError::Persistence {
            reason: format!("Failed to serialize credential record: {}", e),
        })?;
        self.persistence.write_pair(&record)?;
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn restore(persistence: &dyn Persistence) -> SessionResult<Option<CredentialPair>> {
    if persistence.purge_legacy()? {
        info!("Found legacy single-token session state, discarded");
        return Ok(None);
    }

    let Some(record) = persistence.read_pair().map_err(|e| SessionError::CorruptState {
        reason: format!("{e:#}"),
    })?
    else {
        return Ok(None);
    };

    let pair: CredentialPair =
        serde_json::from_str(&record).map_err(|e| SessionError::CorruptState {
            reason: e.to_string(),
        })?;

    if !pair.is_well_formed() {
        return Err(SessionError::CorruptState {
            reason: "credential record has empty fields".to_string(),
        });
    }

    Ok(Some(pair))
}
