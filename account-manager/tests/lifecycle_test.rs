// End-to-end account lifecycle against a mocked token endpoint

use account_manager::registry::Registry;
use account_manager::session::{ExchangeKind, SessionContext, SessionState};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use fleettrack::oauth::parse_callback;
use fleettrack::{CredentialStore, TrackerConfig};
use std::sync::Arc;

#[tokio::test]
async fn test_new_account_reaches_authorized_and_persists() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            mockito::Matcher::UrlEncoded("code".into(), "abc".into()),
            mockito::Matcher::UrlEncoded("client_id".into(), "client-1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"A","refresh_token":"R","expires_in":7200}"#)
        .expect(1)
        .create_async()
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("accounts.db");
    let key = BASE64.encode([7u8; 32]);
    let store = Arc::new(CredentialStore::new(&db_path, &key).unwrap());

    let mut config = TrackerConfig::default();
    config.oauth.client_id = "client-1".to_string();
    config.oauth.token_url = format!("{}/token", server.url());
    config.api.base_url = server.url();
    let ctx = Arc::new(SessionContext::new(Arc::clone(&store), &config).unwrap());

    let registry = Registry::load_all(Arc::clone(&ctx)).unwrap();
    assert!(registry.is_empty().await);

    let handle = registry.add("Cmdr1").await.unwrap();
    let mut session = handle.lock().await;
    assert_eq!(session.state(), SessionState::NeedsSetup);

    let uri = session.begin_authorization().unwrap();
    let state_token = session.state_token().unwrap().to_string();
    assert!(uri.contains("client_id=client-1"));
    assert!(uri.contains(&state_token));
    assert_eq!(session.state(), SessionState::AwaitingAuth);

    // The redirect helper runs as a separate process against the same store
    let redirect = format!("edft://redirect?code=abc&state={}", state_token);
    let callback = parse_callback(&redirect, &config.oauth.redirect_uri).unwrap();
    {
        let helper_store = CredentialStore::new(&db_path, &key).unwrap();
        assert!(helper_store
            .record_authorization_code(&callback.state, &callback.code)
            .unwrap());
    }

    let code = store.pending_authorization_code("Cmdr1").unwrap().unwrap();
    session.set_authorization_code(code);
    session.exchange_tokens(ExchangeKind::Initial).await.unwrap();

    token.assert_async().await;
    assert_eq!(session.state(), SessionState::Authorized);
    assert!(session.is_dirty());

    assert!(session.sync().unwrap());
    assert!(!session.is_dirty());

    let row = store.load("Cmdr1").unwrap().unwrap();
    assert!(!row.auth_required);
    assert!(row.auth_code.is_none());
    let tokens = store.decrypt_tokens(&row).unwrap();
    assert_eq!(tokens.access_token.as_deref(), Some("A"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("R"));
    drop(session);

    // A restart hydrates straight into AUTHORIZED
    let reloaded = Registry::load_all(ctx).unwrap();
    assert_eq!(reloaded.count_authorized().await, 1);
}
