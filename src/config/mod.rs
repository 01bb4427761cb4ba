use crate::exchange::{LOGIN_PATH, LOGOUT_PATH, RENEW_PATH};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Complete session layer configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// API endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Version prefix applied to paths that do not carry one
    #[serde(default = "default_version")]
    pub default_version: String,
    /// Authentication-exchange endpoints, sent without credential logic
    #[serde(default = "default_auth_exchange_paths")]
    pub auth_exchange_paths: Vec<String>,
    /// Per-request timeout; also the only bound on a pending renewal
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_auth_exchange_paths() -> Vec<String> {
    vec![
        LOGIN_PATH.to_string(),
        RENEW_PATH.to_string(),
        LOGOUT_PATH.to_string(),
    ]
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_version: default_version(),
            auth_exchange_paths: default_auth_exchange_paths(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Renewal configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalConfig {
    /// Renew proactively when the access credential expires within this window
    #[serde(default = "default_expiry_threshold_ms")]
    pub expiry_threshold_ms: i64,
}

fn default_expiry_threshold_ms() -> i64 {
    60_000
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            expiry_threshold_ms: default_expiry_threshold_ms(),
        }
    }
}

/// Credential storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_credentials_db")]
    pub credentials_db: String,
}

fn default_credentials_db() -> String {
    "session.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            credentials_db: default_credentials_db(),
        }
    }
}

impl SessionConfig {
    /// Override fields from `CLINIC_*` env vars. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CLINIC_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("CLINIC_API_DEFAULT_VERSION") {
            self.api.default_version = v;
        }
        if let Some(v) = lookup("CLINIC_REQUEST_TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(n) => self.api.request_timeout_secs = n,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid CLINIC_REQUEST_TIMEOUT_SECS"),
            }
        }
        if let Some(v) = lookup("CLINIC_EXPIRY_THRESHOLD_MS") {
            match v.parse::<i64>() {
                Ok(n) => self.renewal.expiry_threshold_ms = n,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid CLINIC_EXPIRY_THRESHOLD_MS"),
            }
        }
        if let Some(v) = lookup("CLINIC_CREDENTIALS_DB") {
            self.storage.credentials_db = v;
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SessionConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: SessionConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.api.default_version, "v1");
        assert_eq!(config.api.auth_exchange_paths.len(), 3);
        assert_eq!(config.api.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.renewal.expiry_threshold_ms, 60_000);
        assert_eq!(config.storage.credentials_db, "session.db");
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [api]
            base_url = "https://api.clinic.test"
            default_version = "v2"
            auth_exchange_paths = ["/v2/auth/login"]
            request_timeout_secs = 10

            [renewal]
            expiry_threshold_ms = 120000

            [storage]
            credentials_db = "/var/lib/clinic/session.db"
        "#;

        let config: SessionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.api.base_url, "https://api.clinic.test");
        assert_eq!(config.api.default_version, "v2");
        assert_eq!(config.api.auth_exchange_paths, vec!["/v2/auth/login"]);
        assert_eq!(config.api.request_timeout_secs, 10);
        assert_eq!(config.renewal.expiry_threshold_ms, 120_000);
        assert_eq!(config.storage.credentials_db, "/var/lib/clinic/session.db");
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [renewal]
            expiry_threshold_ms = 30000
        "#;

        let config: SessionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.renewal.expiry_threshold_ms, 30_000);
        assert_eq!(config.api.default_version, "v1"); // Default
        assert!(config
            .api
            .auth_exchange_paths
            .contains(&"/v2/auth/refresh".to_string()));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CLINIC_API_BASE_URL", "http://10.0.0.5:8080"),
            ("CLINIC_REQUEST_TIMEOUT_SECS", "not-a-number"),
            ("CLINIC_EXPIRY_THRESHOLD_MS", "5000"),
        ]
        .into_iter()
        .collect();

        let mut config = SessionConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.api.base_url, "http://10.0.0.5:8080");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.renewal.expiry_threshold_ms, 5_000);
        assert_eq!(config.storage.credentials_db, "session.db");
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nbase_url = \"http://clinic.local\"").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.api.base_url, "http://clinic.local");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/clinic.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/clinic.toml"));
    }
}
