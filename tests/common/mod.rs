#![allow(dead_code)]

//! In-process stand-in for the time tracking API.
//!
//! Serves the four auth endpoints under `/api` on a random local port and
//! exposes knobs for token lifetime, refresh failures and holding refresh
//! responses back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use timetrack::session::{
    ACCESS_TOKEN_KEY, CURRENT_USER_KEY, HttpAuthClient, LocalStorage, REFRESH_TOKEN_KEY,
    RefreshPolicy, SessionController, TokenStore, UserProfile,
};
use tokio::sync::{Notify, Semaphore};
use url::Url;

const JWT_SECRET: &[u8] = b"test-jwt-secret-for-testing";

pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ALICE_PASSWORD: &str = "correct horse battery staple";

/// How `/auth/refresh` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Ok,
    Reject,
    Status(u16),
}

#[derive(Clone)]
struct MockUser {
    password: String,
    profile: UserProfile,
}

#[derive(Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    exp: i64,
    jti: String,
}

pub struct MockState {
    users: Mutex<HashMap<String, MockUser>>,
    refresh_tokens: Mutex<HashMap<String, String>>,
    access_ttl_secs: AtomicI64,
    refresh_mode: Mutex<RefreshMode>,
    refresh_calls: AtomicUsize,
    refresh_started: Notify,
    hold_refresh: AtomicBool,
    refresh_gate: Semaphore,
}

impl MockState {
    fn new() -> Self {
        let mut users = HashMap::new();
        users.insert(
            ALICE_EMAIL.to_string(),
            MockUser {
                password: ALICE_PASSWORD.to_string(),
                profile: alice(),
            },
        );

        Self {
            users: Mutex::new(users),
            refresh_tokens: Mutex::new(HashMap::new()),
            access_ttl_secs: AtomicI64::new(30 * 60),
            refresh_mode: Mutex::new(RefreshMode::Ok),
            refresh_calls: AtomicUsize::new(0),
            refresh_started: Notify::new(),
            hold_refresh: AtomicBool::new(false),
            refresh_gate: Semaphore::new(0),
        }
    }

    fn mint_access_token(&self, email: &str) -> String {
        mint_access_token(email, self.access_ttl_secs.load(Ordering::SeqCst))
    }

    fn issue_refresh_token(&self, email: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.refresh_tokens
            .lock()
            .unwrap()
            .insert(token.clone(), email.to_string());
        token
    }
}

pub fn alice() -> UserProfile {
    UserProfile {
        id: "1".to_string(),
        email: ALICE_EMAIL.to_string(),
        full_name: "Alice Liddell".to_string(),
    }
}

/// Mint an access token the mock accepts, expiring `ttl_secs` from now.
pub fn mint_access_token(email: &str, ttl_secs: i64) -> String {
    let claims = AccessClaims {
        sub: email.to_string(),
        exp: jsonwebtoken::get_current_timestamp() as i64 + ttl_secs,
        jti: uuid::Uuid::new_v4().to_string(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET),
    )
    .expect("Failed to encode token")
}

pub struct MockBackend {
    pub state: Arc<MockState>,
    pub api_url: Url,
    server_handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::new());

        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/auth/register", post(register))
            .route("/users/me", get(me))
            .with_state(state.clone());
        let app = Router::new().nest("/api", api);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local address");

        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let api_url = Url::parse(&format!("http://{}/api", addr)).expect("Invalid URL");

        Self {
            state,
            api_url,
            server_handle,
        }
    }

    pub fn client(&self) -> HttpAuthClient {
        HttpAuthClient::new(self.api_url.clone(), Duration::from_secs(5))
            .expect("Failed to build client")
    }

    pub fn controller(&self, storage: impl LocalStorage + 'static) -> SessionController {
        self.controller_with_policy(storage, RefreshPolicy::default())
    }

    pub fn controller_with_policy(
        &self,
        storage: impl LocalStorage + 'static,
        policy: RefreshPolicy,
    ) -> SessionController {
        SessionController::new(
            Arc::new(self.client()),
            TokenStore::open(storage),
            policy,
        )
    }

    /// Lifetime of access tokens minted from now on. May be negative.
    pub fn set_access_ttl(&self, secs: i64) {
        self.state.access_ttl_secs.store(secs, Ordering::SeqCst);
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.state.refresh_mode.lock().unwrap() = mode;
    }

    /// Make refresh requests wait until [`release_refresh`](Self::release_refresh).
    pub fn hold_refreshes(&self) {
        self.state.hold_refresh.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.state.refresh_gate.add_permits(1);
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// Wait until a refresh request reaches the server.
    pub async fn wait_for_refresh(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.state.refresh_started.notified())
            .await
            .expect("No refresh request arrived");
    }

    /// Write a session for alice straight into `storage`, as a previous run
    /// would have left it, with an access token expiring in `ttl_secs`.
    pub fn seed_session(&self, storage: &dyn LocalStorage, ttl_secs: i64) -> (String, String) {
        let access_token = mint_access_token(ALICE_EMAIL, ttl_secs);
        let refresh_token = self.state.issue_refresh_token(ALICE_EMAIL);
        let user = serde_json::to_string(&alice()).expect("Failed to serialize user");
        storage
            .set_items(&[
                (ACCESS_TOKEN_KEY, access_token.as_str()),
                (REFRESH_TOKEN_KEY, refresh_token.as_str()),
                (CURRENT_USER_KEY, user.as_str()),
            ])
            .expect("Failed to seed session");
        (access_token, refresh_token)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// Fresh temp path for a session file.
pub fn temp_state_file() -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("timetrack-test-{}", uuid::Uuid::new_v4()))
        .join("session.json")
}

// ==================== Handlers ====================

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(State(state): State<Arc<MockState>>, Form(form): Form<LoginForm>) -> Response {
    let user = state.users.lock().unwrap().get(&form.username).cloned();
    match user {
        Some(user) if user.password == form.password => {
            let access_token = state.mint_access_token(&form.username);
            let refresh_token = state.issue_refresh_token(&form.username);
            Json(serde_json::json!({
                "access_token": access_token,
                "refresh_token": refresh_token,
                "token_type": "bearer",
            }))
            .into_response()
        }
        // Unknown user and wrong password look the same
        _ => (StatusCode::NOT_FOUND, "User not found").into_response(),
    }
}

#[derive(Deserialize)]
struct RefreshBody {
    #[serde(rename = "refreshToken")]
    refresh_token: String,
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<RefreshBody>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    state.refresh_started.notify_one();

    if state.hold_refresh.load(Ordering::SeqCst) {
        state
            .refresh_gate
            .acquire()
            .await
            .expect("Refresh gate closed")
            .forget();
    }

    let mode = *state.refresh_mode.lock().unwrap();
    match mode {
        RefreshMode::Reject => return StatusCode::UNAUTHORIZED.into_response(),
        RefreshMode::Status(code) => {
            return StatusCode::from_u16(code)
                .expect("Invalid status")
                .into_response();
        }
        RefreshMode::Ok => {}
    }

    let email = state
        .refresh_tokens
        .lock()
        .unwrap()
        .get(&body.refresh_token)
        .cloned();
    match email {
        Some(email) => Json(serde_json::json!({
            "accessToken": state.mint_access_token(&email),
        }))
        .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

#[derive(Deserialize)]
struct RegisterBody {
    full_name: String,
    email: String,
    password: String,
}

async fn register(State(state): State<Arc<MockState>>, Json(body): Json<RegisterBody>) -> Response {
    let mut users = state.users.lock().unwrap();
    if users.contains_key(&body.email) {
        return (StatusCode::CONFLICT, "Email already registered").into_response();
    }

    let profile = UserProfile {
        id: (users.len() + 1).to_string(),
        email: body.email.clone(),
        full_name: body.full_name,
    };
    users.insert(
        body.email,
        MockUser {
            password: body.password,
            profile: profile.clone(),
        },
    );

    Json(profile).into_response()
}

async fn me(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let mut validation = Validation::default();
    validation.leeway = 0;
    let claims = match jsonwebtoken::decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET),
        &validation,
    ) {
        Ok(data) => data.claims,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let user = state.users.lock().unwrap().get(&claims.sub).cloned();
    match user {
        Some(user) => Json(user.profile).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
