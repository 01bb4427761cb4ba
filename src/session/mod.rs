//! Application-facing session lifecycle.
//!
//! `SessionManager` wires the credential store, the renewal coordinator and the
//! dispatcher together, and exposes the account operations built on them.

use crate::config::SessionConfig;
use crate::credentials::{CredentialPair, CredentialStore, Persistence};
use crate::dispatch::{Dispatcher, RoutePolicy};
use crate::error::SessionResult;
use crate::exchange::{AuthExchange, HttpAuthExchange};
use crate::renewal::RenewalCoordinator;
use crate::signals::{OutageSignal, SessionEndedNotifier};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

pub const LOGOUT_ALL_PATH: &str = "/v2/auth/logout-all";
pub const SESSIONS_PATH: &str = "/v2/auth/sessions";
pub const ME_PATH: &str = "/v2/auth/me";

/// The signed-in user as returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: serde_json::Value,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub clinic: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One of the user's open sessions, on this device or another.
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveSession {
    pub id: serde_json::Value,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ActiveSession {
    /// The id as used in the revoke path.
    pub fn id_string(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SessionList {
    #[serde(default)]
    sessions: Vec<ActiveSession>,
}

#[derive(Deserialize)]
struct LogoutAllResult {
    #[serde(default)]
    sessions_revoked: u64,
}

pub struct SessionManager {
    store: Arc<CredentialStore>,
    exchange: Arc<dyn AuthExchange>,
    renewal: Arc<RenewalCoordinator>,
    dispatcher: Dispatcher,
    outage: OutageSignal,
    expiry_threshold_ms: i64,
}

impl SessionManager {
    /// Restores any persisted session and wires the session layer over
    /// `transport`.
    pub fn new(
        config: &SessionConfig,
        persistence: Arc<dyn Persistence>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn SessionEndedNotifier>,
    ) -> Self {
        let store = Arc::new(CredentialStore::load(persistence));
        let exchange: Arc<dyn AuthExchange> = Arc::new(HttpAuthExchange::new(transport.clone()));
        let renewal = Arc::new(RenewalCoordinator::new(
            store.clone(),
            exchange.clone(),
            notifier,
        ));
        let outage = OutageSignal::new();
        let dispatcher = Dispatcher::new(
            transport,
            store.clone(),
            renewal.clone(),
            outage.clone(),
            RoutePolicy::from_config(&config.api),
            config.renewal.expiry_threshold_ms,
        );

        Self {
            store,
            exchange,
            renewal,
            dispatcher,
            outage,
            expiry_threshold_ms: config.renewal.expiry_threshold_ms,
        }
    }

    /// Signs in, replacing any previous session.
    pub async fn login(&self, identifier: &str, secret: &str) -> SessionResult<()> {
        self.logout().await;

        let grant = self.exchange.login(identifier, secret).await.map_err(|e| {
            warn!(error = %e, "Login failed");
            e
        })?;
        self.renewal.install(&CredentialPair::issue_now(grant)?)?;

        info!("Signed in");
        Ok(())
    }

    /// Ends the session voluntarily.
    ///
    /// The remote termination is best effort; local state is cleared whatever
    /// its outcome. Does not fire the session-ended notification.
    pub async fn logout(&self) {
        if let Some(renewal_credential) = self.store.renewal_credential() {
            if let Err(e) = self.exchange.terminate(&renewal_credential).await {
                warn!(error = %e, "Failed to terminate session remotely");
            }
        }

        if self.renewal.clear() {
            info!("Signed out");
        }
    }

    /// Revalidates a restored session at application start.
    ///
    /// Renews it if it is about to expire and returns whether a session is
    /// active afterwards. A renewal that fails transiently keeps the session.
    pub async fn check_auth(&self) -> bool {
        if !self.store.is_authenticated() {
            return false;
        }

        if self.store.is_expiring_soon(self.expiry_threshold_ms) {
            if let Err(e) = self.dispatcher.renew().await {
                warn!(error = %e, "Could not renew restored session");
            }
        }

        self.store.is_authenticated()
    }

    /// Revokes every session of the user, this one included.
    ///
    /// Returns the number of sessions the API revoked. Local state is kept if
    /// the request fails.
    pub async fn logout_all(&self) -> SessionResult<u64> {
        let result: LogoutAllResult = self
            .request(ApiRequest::post(LOGOUT_ALL_PATH))
            .await?
            .data()?;

        self.renewal.clear();
        info!(sessions_revoked = result.sessions_revoked, "Signed out of all sessions");
        Ok(result.sessions_revoked)
    }

    pub async fn sessions(&self) -> SessionResult<Vec<ActiveSession>> {
        let list: SessionList = self.request(ApiRequest::get(SESSIONS_PATH)).await?.data()?;
        Ok(list.sessions)
    }

    pub async fn revoke_session(&self, session_id: &str) -> SessionResult<()> {
        let path = format!("{}/{}", SESSIONS_PATH, urlencoding::encode(session_id));
        self.request(ApiRequest::delete(path)).await?;
        Ok(())
    }

    pub async fn current_user(&self) -> SessionResult<UserProfile> {
        self.request(ApiRequest::get(ME_PATH)).await?.data()
    }

    /// Sends an arbitrary API request through the dispatcher.
    pub async fn request(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        self.dispatcher.dispatch(request).await
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn outage(&self) -> &OutageSignal {
        &self.outage
    }
}
