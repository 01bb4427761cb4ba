// Configuration (TOML + environment)
pub mod config;

// Credential pair, persistence backends, and the credential store
pub mod credentials;

// Request dispatch with credential attachment and replay
pub mod dispatch;

// Error taxonomy
pub mod error;

// Login, renewal, and termination endpoints
pub mod exchange;

// Single-flight renewal
pub mod renewal;

// Session lifecycle and account endpoints
pub mod session;

// Outage flag and session-ended notification
pub mod signals;

// HTTP transport
pub mod transport;

pub use config::SessionConfig;
pub use credentials::{CredentialPair, CredentialStore, MemoryPersistence, SqlitePersistence};
pub use dispatch::Dispatcher;
pub use error::{SessionError, SessionResult};
pub use session::SessionManager;
pub use signals::{OutageSignal, SessionEndedNotifier};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
