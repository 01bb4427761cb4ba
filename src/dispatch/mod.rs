//! Request dispatcher: credential attachment, proactive and reactive renewal.
//!
//! Every request passes through [`Dispatcher::dispatch`]:
//!
//! ```text
//! CREATED → credential check → SENT → SUCCEEDED
//!                                   → FAILED_NETWORK (outage flag set)
//!                                   → FAILED_AUTH → RENEWING → RETRIED → SUCCEEDED | FAILED
//!                                   → FAILED_OTHER
//! ```
//!
//! Requests to the authentication-exchange endpoints skip the credential logic
//! entirely, so the renewal endpoint can never trigger a renewal of its own.

use crate::config::ApiConfig;
use crate::credentials::CredentialStore;
use crate::error::{SessionError, SessionResult};
use crate::renewal::RenewalCoordinator;
use crate::signals::OutageSignal;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;


/// Path conventions of the API.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    default_version: String,
    auth_exchange_paths: Vec<String>,
}

impl RoutePolicy {
    pub fn new(default_version: impl Into<String>, auth_exchange_paths: Vec<String>) -> Self {
        Self {
            default_version: default_version.into(),
            auth_exchange_paths,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(
            config.default_version.clone(),
            config.auth_exchange_paths.clone(),
        )
    }

    /// Prefixes the default API version unless the path carries one.
    ///
    /// `patients/7` → `/v1/patients/7`; `/v2/auth/me` is left as is.
    pub fn normalize(&self, path: &str) -> String {
        if has_version_prefix(path) {
            return path.to_string();
        }

        let path = path.trim_start_matches('/');
        format!("/{}/{}", self.default_version, path)
    }

    /// True if the path is one of the authentication-exchange endpoints.
    ///
    /// Matches the endpoint itself or anything beneath it, never a sibling
    /// sharing a prefix (`/v2/auth/logout-all` is a regular request).
    pub fn is_auth_exchange(&self, path: &str) -> bool {
        self.auth_exchange_paths.iter().any(|exempt| {
            path.strip_prefix(exempt.as_str()).is_some_and(|rest| {
                rest.is_empty() || rest.starts_with(['/', '?', '#'])
            })
        })
    }
}

/// `v<digits>` as the first segment, with or without a leading slash.
fn has_version_prefix(path: &str) -> bool {
    let path = path.strip_prefix('/').unwrap_or(path);
    let Some(rest) = path.strip_prefix('v') else {
        return false;
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && (rest.len() == digits || rest.as_bytes()[digits] == b'/')
}

/// Sends API requests on behalf of the application, keeping them authorized.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    renewal: Arc<RenewalCoordinator>,
    outage: OutageSignal,
    routes: RoutePolicy,
    expiry_threshold_ms: i64,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        renewal: Arc<RenewalCoordinator>,
        outage: OutageSignal,
        routes: RoutePolicy,
        expiry_threshold_ms: i64,
    ) -> Self {
        Self {
            transport,
            store,
            renewal,
            outage,
            routes,
            expiry_threshold_ms,
        }
    }

    pub fn routes(&self) -> &RoutePolicy {
        &self.routes
    }

    /// Sends a request and returns the successful response.
    ///
    /// A failure status, a missing response, or a failed renewal is returned as
    /// the error; the last error encountered is never swallowed.
    pub async fn dispatch(&self, mut request: ApiRequest) -> SessionResult<ApiResponse> {
        request.path = self.routes.normalize(&request.path);
        let exempt = self.routes.is_auth_exchange(&request.path);
        let request_id = Uuid::new_v4();

        if !exempt {
            let credential = self.current_credential(request_id, &request).await?;
            request.set_bearer(credential);
        }

        loop {
            let err = match self.send(request_id, &request).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            // Without a session there is nothing to renew
            if exempt
                || request.bearer().is_none()
                || request.attempt() > 0
                || !err.is_auth_rejected()
            {
                return Err(err);
            }

            request.mark_retried();

            if err.is_renewal_credential_invalid() {
                warn!(
                    request_id = %request_id,
                    path = %request.path,
                    "Renewal credential rejected, ending session"
                );
                self.renewal.end_session();
                return Err(err);
            }

            info!(
                request_id = %request_id,
                path = %request.path,
                "Authorization rejected, renewing credentials and retrying once"
            );
            let credential = self.renew().await?;
            request.set_bearer(Some(credential));
        }
    }

    /// Renews the session through the coordinator.
    ///
    /// The renewal exchange bypasses [`Dispatcher::send`], so its outcome
    /// drives the outage flag here: no response sets it, any response from
    /// the renewal endpoint clears it.
    pub async fn renew(&self) -> SessionResult<String> {
        let outcome = self.renewal.renew().await;
        match &outcome {
            Ok(_)
            | Err(SessionError::RenewalFailed { .. })
            | Err(SessionError::RenewalCredentialInvalid)
            | Err(SessionError::InvalidResponse { .. }) => self.outage.set_offline(false),
            Err(err) if err.is_network() => {
                error!(error = %err, "No response from API during renewal");
                self.outage.set_offline(true);
            }
            Err(_) => {}
        }
        outcome
    }

    /// Credential to attach before the first send.
    ///
    /// Without a session the request goes out bare. Otherwise the credential
    /// is renewed first when it is about to expire.
    async fn current_credential(
        &self,
        request_id: Uuid,
        request: &ApiRequest,
    ) -> SessionResult<Option<String>> {
        if self.store.renewal_credential().is_none() {
            debug!(
                request_id = %request_id,
                path = %request.path,
                "No active session, sending without credentials"
            );
            return Ok(None);
        }

        if !self.store.is_expiring_soon(self.expiry_threshold_ms) {
            return Ok(self.store.access_credential());
        }

        debug!(
            request_id = %request_id,
            path = %request.path,
            "Access credential expiring, renewing before send"
        );
        self.renew().await.map(Some)
    }

    async fn send(&self, request_id: Uuid, request: &ApiRequest) -> SessionResult<ApiResponse> {
        debug!(
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
            attempt = request.attempt(),
            "Sending request"
        );

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) if err.is_network() => {
                error!(
                    request_id = %request_id,
                    path = %request.path,
                    error = %err,
                    "No response from API"
                );
                self.outage.set_offline(true);
                return Err(err);
            }
            Err(err) => {
                warn!(
                    request_id = %request_id,
                    path = %request.path,
                    error = %err,
                    "Request not sent"
                );
                return Err(err);
            }
        };

        self.outage.set_offline(false);

        if response.status.is_success() {
            return Ok(response);
        }

        let err = SessionError::from_status(response.status, &response.body);
        if err.is_subscription_required() {
            warn!(request_id = %request_id, path = %request.path, "Subscription required");
        } else {
            debug!(
                request_id = %request_id,
                path = %request.path,
                status = %response.status,
                "Request failed"
            );
        }
        Err(err)
    }
}
