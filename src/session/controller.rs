//! Session lifecycle.
//!
//! The controller is the only writer of the [`TokenStore`]. It owns the
//! session state machine:
//!
//! - `Unauthenticated --login--> Authenticated`
//! - `Authenticated --check, token expiring--> Refreshing --ok--> Authenticated`
//! - `Refreshing --any failure--> Unauthenticated`
//! - `Authenticated --unreadable token--> Unauthenticated`
//! - `any --logout--> Unauthenticated`
//!
//! At most one refresh is in flight. Callers that find one running await
//! the same attempt. A refresh response is applied only if the session it
//! was issued for is still the current one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::AuthApi;
use super::errors::ClientError;
use super::gate::{self, Admission, View};
use super::scheduler::spawn_check_scheduler;
use super::store::TokenStore;
use super::types::{Session, UserProfile};
use crate::jwt;

/// Refresh when the access token expires within this window.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Interval between checks while a protected view is mounted.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub buffer: Duration,
    pub check_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_REFRESH_BUFFER,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Refreshing => write!(f, "refreshing"),
        }
    }
}

/// A refresh in flight. Resolves to whether the session survived it.
type RefreshAttempt = Shared<BoxFuture<'static, bool>>;

enum Phase {
    Unauthenticated,
    Authenticated,
    Refreshing(RefreshAttempt),
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Unauthenticated => SessionState::Unauthenticated,
            Phase::Authenticated => SessionState::Authenticated,
            Phase::Refreshing(_) => SessionState::Refreshing,
        }
    }
}

struct ControllerState {
    phase: Phase,
    /// Bumped whenever the session identity changes (login, logout, forced
    /// expiry). Refresh responses from an older generation are dropped.
    generation: u64,
    mounted_views: usize,
    timer: Option<JoinHandle<()>>,
}

/// What a check should do with an `Authenticated` session.
enum Plan {
    Keep,
    Refresh(String),
    Expire(&'static str),
}

struct Inner {
    client: Arc<dyn AuthApi>,
    store: TokenStore,
    policy: RefreshPolicy,
    state: Mutex<ControllerState>,
    state_tx: watch::Sender<SessionState>,
}

impl Inner {
    // Never held across an await.
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plan(&self) -> Plan {
        let session = self.store.get();
        let Some(access_token) = session.access_token() else {
            return Plan::Expire("no access token");
        };

        let claims = match jwt::decode(access_token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Access token cannot be decoded");
                return Plan::Expire("unreadable access token");
            }
        };

        if !claims.expires_within(self.policy.buffer) {
            return Plan::Keep;
        }

        match session.refresh_token() {
            Some(refresh_token) => Plan::Refresh(refresh_token.to_string()),
            None => Plan::Expire("no refresh token"),
        }
    }

    /// Apply a refresh response if it still belongs to the current session.
    fn finish_refresh(&self, generation: u64, result: Result<String, ClientError>) -> bool {
        let mut state = self.lock();

        if state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                "Discarding stale refresh response"
            );
            return state.phase.state() != SessionState::Unauthenticated;
        }

        match result {
            Ok(access_token) => {
                if let Err(e) = self.store.replace_access_token(access_token) {
                    warn!(error = %e, "Failed to persist refreshed access token");
                }
                state.phase = Phase::Authenticated;
                self.publish(&state);
                info!("Access token refreshed");
                true
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Refresh failed, ending session");
                self.end_session(&mut state);
                false
            }
        }
    }

    fn end_session(&self, state: &mut ControllerState) {
        state.generation += 1;
        state.phase = Phase::Unauthenticated;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.publish(state);
    }

    fn publish(&self, state: &ControllerState) {
        let next = state.phase.state();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Handle to the session state machine. Cheap to clone; all clones share
/// one session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// A session restored from `store` starts out `Authenticated`; it is
    /// checked on the first protected mount like any other.
    pub fn new(client: Arc<dyn AuthApi>, store: TokenStore, policy: RefreshPolicy) -> Self {
        let phase = if store.get().is_empty() {
            Phase::Unauthenticated
        } else {
            Phase::Authenticated
        };
        let (state_tx, _) = watch::channel(phase.state());

        Self {
            inner: Arc::new(Inner {
                client,
                store,
                policy,
                state: Mutex::new(ControllerState {
                    phase,
                    generation: 0,
                    mounted_views: 0,
                    timer: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().phase.state()
    }

    /// Snapshot of the stored session.
    pub fn session(&self) -> Session {
        self.inner.store.get()
    }

    /// True while the session is believed valid, refreshing included.
    pub fn is_authenticated(&self) -> bool {
        self.state() != SessionState::Unauthenticated
    }

    /// The access token to send with API calls.
    pub fn bearer(&self) -> Option<String> {
        self.inner.store.get().access_token().map(str::to_string)
    }

    /// State changes, including the forced logouts that should send the
    /// user back to the login view.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Gate `view` against the current state.
    pub fn admit(&self, view: View) -> Admission {
        gate::admit(self.state(), view)
    }

    /// Log in and store the new session.
    ///
    /// Errors are returned for display and leave the state untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let response = self.inner.client.login(email, password).await?;
        let user = response.user.clone();

        let mut state = self.inner.lock();
        state.generation += 1;
        if let Err(e) = self.inner.store.set(Session::from(response)) {
            warn!(error = %e, "Failed to persist session");
        }
        state.phase = Phase::Authenticated;
        if state.mounted_views > 0 {
            self.start_timer(&mut state);
        }
        self.inner.publish(&state);

        info!(user = %user.email, "Logged in");
        Ok(user)
    }

    /// Create an account. Does not log in.
    pub async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        self.inner
            .client
            .register(full_name, email, password)
            .await?;
        info!(email, "Account registered");
        Ok(())
    }

    /// End the session. Safe to call in any state; an in-flight refresh is
    /// abandoned and its response ignored.
    pub fn logout(&self) {
        let mut state = self.inner.lock();
        let was = state.phase.state();
        self.inner.end_session(&mut state);

        if was == SessionState::Unauthenticated {
            debug!("Logout without a session");
        } else {
            info!("Logged out");
        }
    }

    /// Evaluate the session once, refreshing the access token if it is close
    /// to expiry. Returns whether the session is still alive afterwards.
    pub async fn check(&self) -> bool {
        let attempt = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            match &state.phase {
                Phase::Unauthenticated => return false,
                Phase::Refreshing(attempt) => {
                    debug!("Joining in-flight refresh");
                    attempt.clone()
                }
                Phase::Authenticated => match self.inner.plan() {
                    Plan::Keep => {
                        debug!("Access token still valid");
                        return true;
                    }
                    Plan::Expire(reason) => {
                        warn!(reason, "Session expired");
                        self.inner.end_session(state);
                        return false;
                    }
                    Plan::Refresh(refresh_token) => self.begin_refresh(state, refresh_token),
                },
            }
        };

        attempt.await
    }

    /// An authenticated API call came back 401. Refresh regardless of what
    /// the token's expiry says, coalescing with any refresh already running.
    pub async fn handle_unauthorized(&self) -> bool {
        let attempt = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            match &state.phase {
                Phase::Unauthenticated => return false,
                Phase::Refreshing(attempt) => attempt.clone(),
                Phase::Authenticated => match self.inner.store.get().refresh_token() {
                    Some(refresh_token) => self.begin_refresh(state, refresh_token.to_string()),
                    None => {
                        warn!(reason = "no refresh token", "Session expired");
                        self.inner.end_session(state);
                        return false;
                    }
                },
            }
        };

        attempt.await
    }

    /// Mount a protected view: check the session now and keep checking it
    /// on the policy interval until the last mounted view is dropped.
    pub async fn mount_protected(&self) -> ProtectedView {
        let mut view = ProtectedView {
            controller: self.clone(),
            admitted: false,
        };

        {
            let mut state = self.inner.lock();
            state.mounted_views += 1;
            if state.phase.state() != SessionState::Unauthenticated {
                self.start_timer(&mut state);
            }
        }

        view.admitted = self.check().await;
        view
    }

    fn begin_refresh(&self, state: &mut ControllerState, refresh_token: String) -> RefreshAttempt {
        let generation = state.generation;
        let inner = Arc::clone(&self.inner);

        // Spawned so the call completes even if every waiter goes away.
        let task = tokio::spawn({
            let inner = Arc::clone(&inner);
            async move {
                let result = inner.client.refresh(&refresh_token).await;
                inner.finish_refresh(generation, result)
            }
        });

        let attempt = async move {
            match task.await {
                Ok(alive) => alive,
                Err(e) => inner.finish_refresh(generation, Err(ClientError::Network(e.to_string()))),
            }
        }
        .boxed()
        .shared();

        info!("Access token expiring, refreshing");
        state.phase = Phase::Refreshing(attempt.clone());
        self.inner.publish(state);
        attempt
    }

    fn start_timer(&self, state: &mut ControllerState) {
        if state.timer.as_ref().is_some_and(|timer| !timer.is_finished()) {
            return;
        }
        let controller = WeakController {
            inner: Arc::downgrade(&self.inner),
        };
        state.timer = Some(spawn_check_scheduler(
            controller,
            self.inner.policy.check_interval,
        ));
        debug!(interval = ?self.inner.policy.check_interval, "Started session checks");
    }
}

/// A controller reference that does not keep the session alive.
pub(crate) struct WeakController {
    inner: Weak<Inner>,
}

impl WeakController {
    pub(crate) fn upgrade(&self) -> Option<SessionController> {
        self.inner.upgrade().map(|inner| SessionController { inner })
    }
}

/// A mounted protected view. Dropping it unmounts the view.
pub struct ProtectedView {
    controller: SessionController,
    admitted: bool,
}

impl ProtectedView {
    /// Whether the mount-time check found a live session.
    pub fn is_admitted(&self) -> bool {
        self.admitted
    }

    /// Gate decision for the view right now.
    pub fn admission(&self) -> Admission {
        self.controller.admit(View::DEFAULT_PROTECTED)
    }
}

impl Drop for ProtectedView {
    fn drop(&mut self) {
        let mut state = self.controller.inner.lock();
        state.mounted_views = state.mounted_views.saturating_sub(1);
        if state.mounted_views == 0 {
            if let Some(timer) = state.timer.take() {
                timer.abort();
                debug!("Last protected view unmounted, stopped session checks");
            }
        }
    }
}
