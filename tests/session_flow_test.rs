// Integration tests for the session lifecycle against a mock API

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clinic_session::config::SessionConfig;
use clinic_session::credentials::{now_millis, Persistence};
use clinic_session::{MemoryPersistence, ReqwestTransport, SessionManager, SqlitePersistence};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LOGIN_OK: &str = r#"{"success": true, "data": {"access_token": "access-1", "refresh_token": "refresh-1", "expires_in": 900, "token_type": "Bearer"}}"#;

fn test_key() -> String {
    BASE64.encode([7u8; 32])
}

fn manager(
    server: &ServerGuard,
    persistence: Arc<dyn Persistence>,
) -> (SessionManager, Arc<AtomicUsize>) {
    let mut config = SessionConfig::default();
    config.api.base_url = server.url();

    let transport =
        Arc::new(ReqwestTransport::new(server.url(), Duration::from_secs(5)).unwrap());
    let ended = Arc::new(AtomicUsize::new(0));
    let counter = ended.clone();

    let session = SessionManager::new(
        &config,
        persistence,
        transport,
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    (session, ended)
}

async fn mock_login(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/v2/auth/login")
        .match_body(Matcher::Json(
            json!({"email": "recepcao@clinic.test", "password": "s3cret"}),
        ))
        .with_status(200)
        .with_body(LOGIN_OK)
        .create_async()
        .await
}

#[tokio::test]
async fn test_login_survives_restart() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let me = server
        .mock("GET", "/v2/auth/me")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"id": 12, "email": "recepcao@clinic.test", "name": "Recepção", "role": "staff"}}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.db");

    {
        let persistence = Arc::new(SqlitePersistence::new(&db_path, &test_key()).unwrap());
        let (session, _) = manager(&server, persistence);
        session.login("recepcao@clinic.test", "s3cret").await.unwrap();
        assert!(session.is_authenticated());
    }

    let persistence = Arc::new(SqlitePersistence::new(&db_path, &test_key()).unwrap());
    let (session, _) = manager(&server, persistence);
    assert!(session.check_auth().await);

    let user = session.current_user().await.unwrap();
    assert_eq!(user.id, json!(12));
    assert_eq!(user.email.as_deref(), Some("recepcao@clinic.test"));
    assert_eq!(user.extra["role"], "staff");
    me.assert_async().await;
}

#[tokio::test]
async fn test_login_failure_reports_server_message() {
    let mut server = Server::new_async().await;
    let _login = server
        .mock("POST", "/v2/auth/login")
        .with_status(401)
        .with_body(r#"{"success": false, "error": {"code": "AUTH_INVALID_CREDENTIALS", "message": "Email ou senha incorretos"}}"#)
        .create_async()
        .await;

    let (session, ended) = manager(&server, Arc::new(MemoryPersistence::new()));
    let err = session
        .login("recepcao@clinic.test", "wrong")
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("AUTH_INVALID_CREDENTIALS"));
    assert!(err.to_string().contains("Email ou senha incorretos"));
    assert!(!session.is_authenticated());
    assert_eq!(ended.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_login_ends_previous_session() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let terminate = server
        .mock("POST", "/v2/auth/logout")
        .match_body(Matcher::Json(json!({"refresh_token": "refresh-1"})))
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"message": "ok"}}"#)
        .expect(1)
        .create_async()
        .await;

    let (session, _) = manager(&server, Arc::new(MemoryPersistence::new()));
    session.login("recepcao@clinic.test", "s3cret").await.unwrap();
    session.login("recepcao@clinic.test", "s3cret").await.unwrap();

    assert!(session.is_authenticated());
    terminate.assert_async().await;
}

#[tokio::test]
async fn test_logout_terminates_and_clears_without_notification() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let terminate = server
        .mock("POST", "/v2/auth/logout")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({"refresh_token": "refresh-1"})))
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"message": "ok"}}"#)
        .expect(1)
        .create_async()
        .await;

    let persistence = Arc::new(MemoryPersistence::new());
    let (session, ended) = manager(&server, persistence.clone());
    session.login("recepcao@clinic.test", "s3cret").await.unwrap();
    session.logout().await;

    assert!(!session.is_authenticated());
    assert!(persistence.raw_record().is_none());
    assert_eq!(ended.load(Ordering::SeqCst), 0);
    terminate.assert_async().await;
}

#[tokio::test]
async fn test_logout_clears_when_remote_termination_fails() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let _terminate = server
        .mock("POST", "/v2/auth/logout")
        .with_status(500)
        .create_async()
        .await;

    let (session, _) = manager(&server, Arc::new(MemoryPersistence::new()));
    session.login("recepcao@clinic.test", "s3cret").await.unwrap();
    session.logout().await;

    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_logout_all() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let logout_all = server
        .mock("POST", "/v2/auth/logout-all")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"message": "ok", "sessions_revoked": 3}}"#)
        .expect(1)
        .create_async()
        .await;

    let (session, ended) = manager(&server, Arc::new(MemoryPersistence::new()));
    session.login("recepcao@clinic.test", "s3cret").await.unwrap();

    assert_eq!(session.logout_all().await.unwrap(), 3);
    assert!(!session.is_authenticated());
    assert_eq!(ended.load(Ordering::SeqCst), 0);
    logout_all.assert_async().await;
}

#[tokio::test]
async fn test_list_and_revoke_sessions() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let _sessions = server
        .mock("GET", "/v2/auth/sessions")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"count": 2, "sessions": [
            {"id": "a1b2", "device_info": "Firefox", "is_current": true},
            {"id": 42, "device_info": "Android"}
        ]}}"#)
        .create_async()
        .await;
    let revoke = server
        .mock("DELETE", "/v2/auth/sessions/42")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"message": "revoked"}}"#)
        .expect(1)
        .create_async()
        .await;

    let (session, _) = manager(&server, Arc::new(MemoryPersistence::new()));
    session.login("recepcao@clinic.test", "s3cret").await.unwrap();

    let sessions = session.sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id_string(), "a1b2");
    assert_eq!(sessions[0].details["is_current"], true);

    session.revoke_session(&sessions[1].id_string()).await.unwrap();
    revoke.assert_async().await;
    assert!(session.is_authenticated());
}

fn restored(expires_at: i64) -> Arc<MemoryPersistence> {
    Arc::new(MemoryPersistence::with_record(
        json!({
            "access_token": "access-0",
            "refresh_token": "refresh-0",
            "expires_at": expires_at,
        })
        .to_string(),
    ))
}

#[tokio::test]
async fn test_check_auth_renews_expiring_session() {
    let mut server = Server::new_async().await;
    let renew = server
        .mock("POST", "/v2/auth/refresh")
        .match_body(Matcher::Json(json!({"refresh_token": "refresh-0"})))
        .with_status(200)
        .with_body(r#"{"success": true, "data": {"access_token": "access-1", "refresh_token": "refresh-1", "expires_in": 900}}"#)
        .expect(1)
        .create_async()
        .await;

    let persistence = restored(now_millis() + 5_000);
    let (session, _) = manager(&server, persistence.clone());

    assert!(session.check_auth().await);
    renew.assert_async().await;
    assert!(persistence.raw_record().unwrap().contains("refresh-1"));
}

#[tokio::test]
async fn test_check_auth_skips_renewal_for_fresh_session() {
    let mut server = Server::new_async().await;
    let renew = server
        .mock("POST", "/v2/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let (session, _) = manager(&server, restored(now_millis() + 15 * 60 * 1000));

    assert!(session.check_auth().await);
    renew.assert_async().await;
}

#[tokio::test]
async fn test_check_auth_with_revoked_renewal_credential() {
    let mut server = Server::new_async().await;
    let _renew = server
        .mock("POST", "/v2/auth/refresh")
        .with_status(401)
        .with_body(r#"{"success": false, "error": {"code": "AUTH_INVALID_REFRESH_TOKEN", "message": "Refresh token revoked"}}"#)
        .create_async()
        .await;

    let persistence = restored(now_millis() - 1_000);
    let (session, ended) = manager(&server, persistence.clone());

    assert!(!session.check_auth().await);
    assert!(persistence.raw_record().is_none());
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_check_auth_keeps_session_when_api_is_down() {
    let mut server = Server::new_async().await;
    let _renew = server
        .mock("POST", "/v2/auth/refresh")
        .with_status(503)
        .create_async()
        .await;

    let (session, ended) = manager(&server, restored(now_millis() - 1_000));

    assert!(session.check_auth().await);
    assert_eq!(ended.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_legacy_state_starts_signed_out() {
    let server = Server::new_async().await;
    let persistence = Arc::new(MemoryPersistence::with_legacy_token("legacy-jwt"));
    let (session, _) = manager(&server, persistence);

    assert!(!session.check_auth().await);
}

#[tokio::test]
async fn test_corrupt_state_starts_signed_out() {
    let server = Server::new_async().await;
    let persistence = Arc::new(MemoryPersistence::with_record("{\"access_token\": 5"));
    let (session, ended) = manager(&server, persistence.clone());

    assert!(!session.is_authenticated());
    assert!(persistence.raw_record().is_none());
    assert_eq!(ended.load(Ordering::SeqCst), 0);
}
