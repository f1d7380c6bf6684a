//! In-process hotel backend for integration tests.
//!
//! Issues rotating token pairs (`access-N` / `refresh-N`), rejects any
//! access token other than the current one, and counts every call so tests
//! can assert how often the client reached each endpoint.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use concierge_core::{ApiClient, Credential, CredentialStore, MemoryStore, SessionManager};

pub const USERNAME: &str = "frontdesk";
pub const PASSWORD: &str = "correct-horse";
pub const TOTP_CODE: &str = "123456";
pub const USER_ID: i64 = 42;

/// How the refresh endpoint answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Rotate,
    Reject,
    Unavailable,
}

struct Tokens {
    serial: u32,
    access: String,
    refresh: String,
    access_valid: bool,
    revoked: Vec<String>,
}

impl Tokens {
    fn rotate(&mut self) -> Credential {
        self.serial += 1;
        self.access = format!("access-{}", self.serial);
        self.refresh = format!("refresh-{}", self.serial);
        self.access_valid = true;
        Credential::new(self.access.clone(), self.refresh.clone())
    }
}

pub struct Backend {
    tokens: Mutex<Tokens>,
    refresh_mode: Mutex<RefreshMode>,
    refresh_delay: Mutex<Duration>,
    reject_all: AtomicBool,
    require_totp: AtomicBool,
    saw_auth_on_public: AtomicBool,
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub protected_calls: AtomicU32,
}

impl Backend {
    fn new() -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                serial: 0,
                access: String::new(),
                refresh: String::new(),
                access_valid: false,
                revoked: Vec::new(),
            }),
            refresh_mode: Mutex::new(RefreshMode::Rotate),
            refresh_delay: Mutex::new(Duration::ZERO),
            reject_all: AtomicBool::new(false),
            require_totp: AtomicBool::new(false),
            saw_auth_on_public: AtomicBool::new(false),
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            protected_calls: AtomicU32::new(0),
        }
    }

    /// Issue a fresh pair as if the user had logged in earlier
    pub fn issue(&self) -> Credential {
        self.tokens.lock().rotate()
    }

    /// Make the current access token stale without touching the refresh token
    pub fn expire_access(&self) {
        self.tokens.lock().access_valid = false;
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.refresh_mode.lock() = mode;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn reject_all_requests(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    pub fn require_totp(&self) {
        self.require_totp.store(true, Ordering::SeqCst);
    }

    pub fn is_revoked(&self, refresh_token: &str) -> bool {
        self.tokens.lock().revoked.iter().any(|t| t == refresh_token)
    }

    pub fn saw_auth_on_public(&self) -> bool {
        self.saw_auth_on_public.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn protected_count(&self) -> u32 {
        self.protected_calls.load(Ordering::SeqCst)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all.load(Ordering::SeqCst) {
            return false;
        }
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let tokens = self.tokens.lock();
        tokens.access_valid && presented == Some(tokens.access.as_str())
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub backend: Arc<Backend>,
}

impl MockServer {
    pub async fn start() -> Self {
        let backend = Arc::new(Backend::new());

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout", post(logout))
            .route("/profile", get(profile))
            .route("/bookings", get(list_bookings).post(create_booking))
            .route("/health", get(health))
            .with_state(Arc::clone(&backend));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, backend }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(self.base_url(), Duration::from_secs(5)).expect("client")
    }

    /// A manager whose store already holds a pair the backend accepts.
    pub fn signed_in_manager(&self) -> (Arc<SessionManager>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_credential(self.backend.issue()));
        let manager = self.manager_with_store(store.clone(), Duration::from_secs(5));
        (manager, store)
    }

    pub fn manager_with_store(
        &self,
        store: Arc<dyn CredentialStore>,
        refresh_timeout: Duration,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::with_client(self.client(), store, refresh_timeout))
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "Invalid or expired token")
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.login_calls.fetch_add(1, Ordering::SeqCst);

    if body["username"] != USERNAME || body["password"] != PASSWORD {
        return error(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    if backend.require_totp.load(Ordering::SeqCst) && body["totp_code"] != TOTP_CODE {
        return error(
            StatusCode::UNAUTHORIZED,
            "2FA required. Please provide a TOTP code.",
        );
    }

    let credential = backend.issue();
    Json(json!({
        "access_token": credential.access_token,
        "refresh_token": credential.refresh_token,
        "user": {
            "id": USER_ID,
            "username": USERNAME,
            "email": "desk@hotel.example",
            "full_name": "Front Desk",
            "is_active": true,
            "is_verified": true
        },
        "roles": ["receptionist"],
        "permissions": ["bookings:read", "bookings:write"],
        "is_first_login": false
    }))
    .into_response()
}

async fn refresh(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = *backend.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mode = *backend.refresh_mode.lock();
    match mode {
        RefreshMode::Reject => return error(StatusCode::UNAUTHORIZED, "Invalid refresh token"),
        RefreshMode::Unavailable => {
            return error(StatusCode::SERVICE_UNAVAILABLE, "Database unavailable")
        }
        RefreshMode::Rotate => {}
    }

    let presented = body["refresh_token"].as_str().unwrap_or_default();
    let mut tokens = backend.tokens.lock();
    if presented != tokens.refresh {
        return error(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    let rotated = tokens.rotate();
    Json(json!({
        "access_token": rotated.access_token,
        "refresh_token": rotated.refresh_token,
    }))
    .into_response()
}

async fn logout(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.logout_calls.fetch_add(1, Ordering::SeqCst);

    if let Some(token) = body["refresh_token"].as_str() {
        let mut tokens = backend.tokens.lock();
        tokens.revoked.push(token.to_string());
        if tokens.refresh == token {
            tokens.refresh.clear();
            tokens.access_valid = false;
        }
    }
    Json(json!({ "message": "Logged out successfully" })).into_response()
}

async fn profile(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.protected_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "id": USER_ID,
        "username": USERNAME,
        "email": "desk@hotel.example",
        "full_name": "Front Desk"
    }))
    .into_response()
}

async fn list_bookings(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.protected_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    Json(json!([
        { "id": 1, "room_id": 101, "guest_name": "Ada" },
        { "id": 2, "room_id": 204, "guest_name": "Grace" }
    ]))
    .into_response()
}

async fn create_booking(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    backend.protected_calls.fetch_add(1, Ordering::SeqCst);
    if !backend.authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::CREATED, Json(json!({ "id": 3, "booking": body }))).into_response()
}

async fn health(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if headers.contains_key(header::AUTHORIZATION) {
        backend.saw_auth_on_public.store(true, Ordering::SeqCst);
    }
    Json(json!({ "status": "ok" })).into_response()
}
