mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockServer, PASSWORD, TOTP_CODE, USERNAME, USER_ID};
use concierge_core::{
    ApiClient, Credential, CredentialStore, EncryptedFileStore, Identity, LoginError,
    LoginRequest, MemoryStore, SessionEvent, SessionManager, SessionStatus, SignOutReason,
};

const PASSPHRASE: &str = "front desk night shift";

fn frontdesk() -> Identity {
    Identity {
        user_id: USER_ID,
        username: USERNAME.to_string(),
    }
}

#[tokio::test]
async fn test_login_seeds_session_and_store() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let manager = server.manager_with_store(store.clone(), Duration::from_secs(5));
    let mut events = manager.subscribe();

    let identity = manager
        .login(LoginRequest::new(USERNAME, PASSWORD))
        .await
        .expect("login");

    assert_eq!(identity, frontdesk());
    let session = manager.current();
    assert_eq!(session.status, SessionStatus::SignedIn);
    assert_eq!(session.identity, Some(frontdesk()));
    assert_eq!(
        store.load().expect("load"),
        Some(Credential::new("access-1", "refresh-1"))
    );
    assert_eq!(events.try_recv(), Some(SessionEvent::SignedIn(frontdesk())));
}

#[tokio::test]
async fn test_login_with_wrong_password_stays_signed_out() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let manager = server.manager_with_store(store.clone(), Duration::from_secs(5));

    let err = manager
        .login(LoginRequest::new(USERNAME, "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::InvalidCredentials(_)));
    assert_eq!(manager.current().status, SessionStatus::SignedOut);
    assert_eq!(store.load().expect("load"), None);
}

#[tokio::test]
async fn test_login_requires_totp_when_enabled() {
    let server = MockServer::start().await;
    server.backend.require_totp();
    let manager = server.manager_with_store(Arc::new(MemoryStore::new()), Duration::from_secs(5));

    let err = manager
        .login(LoginRequest::new(USERNAME, PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::TwoFactorRequired));

    let identity = manager
        .login(LoginRequest::new(USERNAME, PASSWORD).with_totp(TOTP_CODE))
        .await
        .expect("login with totp");
    assert_eq!(identity, frontdesk());
}

#[tokio::test]
async fn test_logout_revokes_and_clears() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let manager = server.manager_with_store(store.clone(), Duration::from_secs(5));
    manager
        .login(LoginRequest::new(USERNAME, PASSWORD))
        .await
        .expect("login");
    let mut events = manager.subscribe();

    manager.logout().await;

    assert!(server.backend.is_revoked("refresh-1"));
    assert_eq!(manager.current().status, SessionStatus::SignedOut);
    assert_eq!(manager.current().credential, None);
    assert_eq!(store.load().expect("load"), None);
    assert_eq!(
        events.try_recv(),
        Some(SessionEvent::SignedOut {
            reason: SignOutReason::UserLogout
        })
    );

    // Signing out again is harmless and makes no network call
    manager.logout().await;
    assert_eq!(
        server.backend.logout_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(manager.current().status, SessionStatus::SignedOut);
}

#[tokio::test]
async fn test_login_replaces_existing_session() {
    let server = MockServer::start().await;
    let (manager, store) = server.signed_in_manager();
    let before = manager.current().generation;

    manager
        .login(LoginRequest::new(USERNAME, PASSWORD))
        .await
        .expect("login");

    assert!(manager.current().generation > before);
    assert_eq!(
        store.load().expect("load"),
        Some(Credential::new("access-2", "refresh-2"))
    );
}

#[tokio::test]
async fn test_restart_recovery_without_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("credentials.bin");
    let credential = Credential::new("access-7", "refresh-7");

    EncryptedFileStore::open(&path, PASSPHRASE)
        .expect("open")
        .save(&credential)
        .expect("save");

    // Nothing listens on this port
    let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).expect("client");
    let store = Arc::new(EncryptedFileStore::open(&path, PASSPHRASE).expect("reopen"));
    let manager = SessionManager::with_client(api, store, Duration::from_secs(1));

    let session = manager.current();
    assert_eq!(session.status, SessionStatus::SignedIn);
    assert_eq!(session.credential, Some(credential));
    assert_eq!(session.identity, None);
}

#[tokio::test]
async fn test_rotated_pair_survives_restart() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("credentials.bin");

    {
        let store = Arc::new(EncryptedFileStore::open(&path, PASSPHRASE).expect("open"));
        store.save(&server.backend.issue()).expect("seed");
        let manager = server.manager_with_store(store, Duration::from_secs(5));
        manager.ensure_fresh_credential().await.expect("refresh");
    }

    let store = Arc::new(EncryptedFileStore::open(&path, PASSPHRASE).expect("reopen"));
    let manager = server.manager_with_store(store, Duration::from_secs(5));
    assert_eq!(manager.current().access_token(), Some("access-2"));

    // The restored pair is the one the backend expects next
    let rotated = manager.ensure_fresh_credential().await.expect("refresh");
    assert_eq!(rotated, Credential::new("access-3", "refresh-3"));
}

#[tokio::test]
async fn test_refresh_identity_after_restart() {
    let server = MockServer::start().await;
    let (manager, _store) = server.signed_in_manager();
    assert_eq!(manager.current().identity, None);
    let mut events = manager.subscribe();

    let identity = manager.refresh_identity().await.expect("profile");

    assert_eq!(identity, frontdesk());
    assert_eq!(manager.current().identity, Some(frontdesk()));
    assert_eq!(events.try_recv(), Some(SessionEvent::SignedIn(frontdesk())));
}

#[tokio::test]
async fn test_refresh_identity_across_expired_token() {
    let server = MockServer::start().await;
    let (manager, _store) = server.signed_in_manager();
    server.backend.expire_access();

    let identity = manager.refresh_identity().await.expect("profile");
    assert_eq!(identity, frontdesk());
    assert_eq!(manager.current().identity, Some(frontdesk()));
    assert_eq!(server.backend.refresh_count(), 1);
}
