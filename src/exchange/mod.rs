//! Authentication exchange endpoints: login, renewal, and termination.
//!
//! The access credential is never sent to these endpoints. Renewal and
//! termination carry only the renewal credential in the body.

use crate::credentials::TokenGrant;
use crate::error::{SessionError, SessionResult, INVALID_REFRESH_TOKEN_CODE};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub const LOGIN_PATH: &str = "/v2/auth/login";
pub const RENEW_PATH: &str = "/v2/auth/refresh";
pub const LOGOUT_PATH: &str = "/v2/auth/logout";

/// Remote operations that create, rotate, and end a credential pair.
#[async_trait]
pub trait AuthExchange: Send + Sync {
    /// Exchanges a user identifier and secret for a fresh pair.
    async fn login(&self, identifier: &str, secret: &str) -> SessionResult<TokenGrant>;

    /// Exchanges a renewal credential for the next pair.
    ///
    /// Fails with `SessionError::RenewalCredentialInvalid` when the remote end
    /// refuses the credential itself.
    async fn renew(&self, renewal_credential: &str) -> SessionResult<TokenGrant>;

    /// Asks the remote end to invalidate a renewal credential. Best effort.
    async fn terminate(&self, renewal_credential: &str) -> SessionResult<()>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RenewalRequest<'a> {
    refresh_token: &'a str,
}

/// `AuthExchange` over the versioned auth endpoints of the API.
pub struct HttpAuthExchange {
    transport: Arc<dyn Transport>,
}

impl HttpAuthExchange {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn post(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        let response = self.transport.send(&request).await?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(SessionError::from_status(response.status, &response.body))
        }
    }
}

#[async_trait]
impl AuthExchange for HttpAuthExchange {
    async fn login(&self, identifier: &str, secret: &str) -> SessionResult<TokenGrant> {
        tracing::debug!(path = LOGIN_PATH, "Exchanging login for credentials");

        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest {
            email: identifier,
            password: secret,
        })?;
        self.post(request).await?.data()
    }

    async fn renew(&self, renewal_credential: &str) -> SessionResult<TokenGrant> {
        tracing::debug!(path = RENEW_PATH, "Exchanging renewal credential");

        let request = ApiRequest::post(RENEW_PATH).json(&RenewalRequest {
            refresh_token: renewal_credential,
        })?;

        match self.post(request).await {
            Ok(response) => response.data(),
            Err(err) if err.code() == Some(INVALID_REFRESH_TOKEN_CODE) => {
                Err(SessionError::RenewalCredentialInvalid)
            }
            Err(SessionError::Status {
                status, message, ..
            }) => Err(SessionError::RenewalFailed {
                reason: match message {
                    Some(message) => format!("{}: {}", status, message),
                    None => status.to_string(),
                },
            }),
            Err(err) => Err(err),
        }
    }

    async fn terminate(&self, renewal_credential: &str) -> SessionResult<()> {
        tracing::debug!(path = LOGOUT_PATH, "Terminating session remotely");

        let request = ApiRequest::post(LOGOUT_PATH).json(&RenewalRequest {
            refresh_token: renewal_credential,
        })?;
        self.post(request).await.map(|_| ())
    }
}
