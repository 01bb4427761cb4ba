use anyhow::{Context, Result};
use clinic_session::config::{load_config, SessionConfig};
use clinic_session::{ReqwestTransport, SessionManager, SqlitePersistence};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinic_session=info".into()),
        )
        .init();

    info!("Clinic session starting...");

    let mut config = match std::env::var("CLINIC_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        Err(_) => SessionConfig::default(),
    };
    config.apply_env();

    let encryption_key = std::env::var("CLINIC_ENCRYPTION_KEY")
        .context("CLINIC_ENCRYPTION_KEY must be set (base64, 32 bytes)")?;
    let persistence = Arc::new(
        SqlitePersistence::new(&config.storage.credentials_db, &encryption_key)
            .context("Failed to open credential database")?,
    );
    let transport = Arc::new(ReqwestTransport::new(
        config.api.base_url.clone(),
        config.api.request_timeout(),
    )?);

    let session = SessionManager::new(
        &config,
        persistence,
        transport,
        Arc::new(|| warn!("Session ended, sign in again")),
    );

    if session.check_auth().await {
        info!("Restored session is active");
    } else if let (Ok(email), Ok(password)) = (
        std::env::var("CLINIC_LOGIN_EMAIL"),
        std::env::var("CLINIC_LOGIN_PASSWORD"),
    ) {
        session.login(&email, &password).await?;
    } else {
        info!("No active session; set CLINIC_LOGIN_EMAIL and CLINIC_LOGIN_PASSWORD to sign in");
        return Ok(());
    }

    match session.current_user().await {
        Ok(user) => info!(
            id = %user.id,
            email = user.email.as_deref().unwrap_or("-"),
            name = user.name.as_deref().unwrap_or("-"),
            "Signed in user"
        ),
        Err(e) if e.is_subscription_required() => warn!("Clinic subscription required"),
        Err(e) => error!(error = %e, "Failed to fetch current user"),
    }

    Ok(())
}
