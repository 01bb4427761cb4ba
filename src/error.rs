//! Error taxonomy for the session layer.
//!
//! `SessionError` is `Clone` because a single renewal outcome is handed to every
//! caller that queued behind it.

use reqwest::StatusCode;
use serde::Deserialize;

/// Server error code carried by a rejected renewal credential.
pub const INVALID_REFRESH_TOKEN_CODE: &str = "AUTH_INVALID_REFRESH_TOKEN";

/// Server error code returned when the clinic's plan does not cover a feature.
pub const SUBSCRIPTION_REQUIRED_CODE: &str = "SUBSCRIPTION_REQUIRED";

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// No response was obtained from the remote end.
    #[error("API unreachable: {reason}")]
    NetworkUnreachable { reason: String },

    /// The remote end answered with a failure status.
    #[error("request failed with status {status}{}", describe(.code, .message))]
    Status {
        status: StatusCode,
        code: Option<String>,
        message: Option<String>,
        body: String,
    },

    /// The renewal credential was refused; the session cannot continue.
    #[error("renewal credential is invalid, session ended")]
    RenewalCredentialInvalid,

    /// Renewal failed for a reason that leaves the session intact.
    #[error("credential renewal failed: {reason}")]
    RenewalFailed { reason: String },

    /// There is no renewal credential to exchange.
    #[error("no active session")]
    NotAuthenticated,

    /// The task driving a renewal was dropped before it finished.
    #[error("credential renewal was abandoned")]
    RenewalAbandoned,

    /// The session was cleared or replaced while a renewal was in flight.
    #[error("session ended while renewal was in flight")]
    SessionEnded,

    #[error("persisted session state is corrupt: {reason}")]
    CorruptState { reason: String },

    #[error("session persistence failed: {reason}")]
    Persistence { reason: String },

    #[error("invalid response from API: {reason}")]
    InvalidResponse { reason: String },

    /// The request could not be built locally; nothing was sent.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

fn describe(code: &Option<String>, message: &Option<String>) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!(" ({code}): {message}"),
        (Some(code), None) => format!(" ({code})"),
        (None, Some(message)) => format!(": {message}"),
        (None, None) => String::new(),
    }
}

/// Error envelope used by the API: `{"error": {"code", "message"}}`, with
/// older endpoints putting `code`/`message` at the top level.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorDetail>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl SessionError {
    /// Builds a `Status` error from a failure response body.
    pub fn from_status(status: StatusCode, body: &[u8]) -> Self {
        let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
        let (nested_code, nested_message) = match envelope.error {
            Some(detail) => (detail.code, detail.message),
            None => (None, None),
        };

        SessionError::Status {
            status,
            code: nested_code.or(envelope.code),
            message: nested_message.or(envelope.message),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Server error code, if the failure carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            SessionError::Status { code, .. } => code.as_deref(),
            SessionError::RenewalCredentialInvalid => Some(INVALID_REFRESH_TOKEN_CODE),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SessionError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for an authorization rejection from the remote end.
    pub fn is_auth_rejected(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// True when the failure means the renewal credential can never be used again.
    pub fn is_renewal_credential_invalid(&self) -> bool {
        self.code() == Some(INVALID_REFRESH_TOKEN_CODE)
    }

    pub fn is_subscription_required(&self) -> bool {
        self.code() == Some(SUBSCRIPTION_REQUIRED_CODE)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, SessionError::NetworkUnreachable { .. })
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Persistence {
            reason: format!("{err:#}"),
        }
    }
}
