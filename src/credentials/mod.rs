//! Credential pair, persistence backends, and the in-memory credential store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - active pair + generation counter      │
//! │  - expiry checks                         │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!   (serialize record)   (parse or purge)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Persistence (trait)                │
//! │  - MemoryPersistence                     │
//! │  - SqlitePersistence (AES-256-GCM)       │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use clinic_session::credentials::{CredentialStore, SqlitePersistence};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("CLINIC_ENCRYPTION_KEY")?;
//! let persistence = SqlitePersistence::new("session.db", &key)?;
//! let store = CredentialStore::load(Arc::new(persistence));
//!
//! if store.is_expiring_soon(60_000) {
//!     println!("session needs renewal");
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::fmt;

mod encryption;
mod persistence;
mod storage;
mod store;

pub use encryption::{open, seal, EncryptionKey, Sealed};
pub use persistence::{MemoryPersistence, Persistence};
pub use storage::SqlitePersistence;
pub use store::CredentialStore;

/// Token payload returned by the login and renewal exchanges.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// The active credential pair of a session.
///
/// A pair is only ever replaced as a whole. The renewal credential is
/// single-use: once exchanged, the pair it belonged to is discarded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived bearer token attached to API requests
    pub access_token: String,

    /// Single-use token exchanged for the next pair
    pub refresh_token: String,

    /// Absolute expiry of `access_token`, milliseconds since the epoch
    pub expires_at: i64,
}

impl CredentialPair {
    /// Builds a pair from a grant issued at `issued_at_ms`.
    ///
    /// Rejects a grant whose lifetime is not positive or does not fit an
    /// absolute millisecond timestamp.
    pub fn issue(grant: TokenGrant, issued_at_ms: i64) -> SessionResult<Self> {
        let expires_at = Some(grant.expires_in)
            .filter(|secs| *secs > 0)
            .and_then(|secs| secs.checked_mul(1000))
            .and_then(|ms| issued_at_ms.checked_add(ms))
            .ok_or_else(|| SessionError::InvalidResponse {
                reason: format!("grant lifetime out of range: {}s", grant.expires_in),
            })?;

        Ok(Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at,
        })
    }

    /// Builds a pair from a grant issued now.
    pub fn issue_now(grant: TokenGrant) -> SessionResult<Self> {
        Self::issue(grant, now_millis())
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty() && self.expires_at > 0
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
