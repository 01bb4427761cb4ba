//! Request/response model and the HTTP transport underneath the dispatcher.

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// An outgoing API call.
///
/// `attempt` counts how many times the call has been sent after a renewal;
/// retry eligibility is computed from it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    bearer: Option<String>,
    attempt: u32,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
            attempt: 0,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> SessionResult<Self> {
        let value = serde_json::to_value(body).map_err(|e| SessionError::InvalidRequest {
            reason: format!("Failed to serialize request body: {}", e),
        })?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn set_bearer(&mut self, token: Option<String>) {
        self.bearer = token;
    }

    pub(crate) fn mark_retried(&mut self) {
        self.attempt += 1;
    }
}

/// A response that arrived from the API, successful or not.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> SessionResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| SessionError::InvalidResponse {
            reason: format!("Failed to parse response body: {}", e),
        })
    }

    /// Decodes the `data` member of a `{"success": .., "data": ..}` envelope.
    pub fn data<T: DeserializeOwned>(&self) -> SessionResult<T> {
        #[derive(serde::Deserialize)]
        struct Envelope<T> {
            data: T,
        }

        self.json::<Envelope<T>>().map(|envelope| envelope.data)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request and returns whatever the remote end answered.
///
/// Failure statuses are returned as `Ok`; only the absence of a response is an
/// error, and it must be `SessionError::NetworkUnreachable`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> SessionResult<ApiResponse>;
}

/// HTTP transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("clinic-session/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::InvalidResponse {
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> SessionResult<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header("Accept", "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = request.bearer() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                SessionError::InvalidRequest {
                    reason: "access credential is not a valid header value".to_string(),
                }
            })?;
            builder = builder.header(AUTHORIZATION, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SessionError::NetworkUnreachable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::NetworkUnreachable {
                reason: format!("Failed to read response body: {}", e),
            })?
            .to_vec();

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
