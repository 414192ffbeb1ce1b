//! Process-wide token store.
//!
//! Holds the current [`Session`] in memory and mirrors it to a
//! [`LocalStorage`] backend under three keys. Only the session controller
//! writes; everyone else reads snapshots.

use std::sync::RwLock;

use tracing::{debug, warn};

use super::errors::StorageError;
use super::storage::LocalStorage;
use super::types::{Session, UserProfile};

/// Storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key for the serialized user profile.
pub const CURRENT_USER_KEY: &str = "currentUser";

const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, CURRENT_USER_KEY];

pub struct TokenStore {
    storage: Box<dyn LocalStorage>,
    session: RwLock<Session>,
}

impl TokenStore {
    /// Open a store, reconstructing the session persisted in `storage`.
    pub fn open(storage: impl LocalStorage + 'static) -> Self {
        let session = load_session(&storage);
        Self {
            storage: Box::new(storage),
            session: RwLock::new(session),
        }
    }

    /// Snapshot of the current session.
    pub fn get(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the whole session.
    ///
    /// The in-memory session is replaced even if persisting it fails, so
    /// readers always see what the controller decided.
    pub(crate) fn set(&self, session: Session) -> Result<(), StorageError> {
        let result = persist_session(self.storage.as_ref(), &session);
        *self.write() = session;
        result
    }

    /// Swap only the access token, keeping refresh token and user.
    pub(crate) fn replace_access_token(&self, access_token: String) -> Result<(), StorageError> {
        let mut session = self.write();
        if session.is_empty() {
            return Ok(());
        }
        let result = self
            .storage
            .set_items(&[(ACCESS_TOKEN_KEY, access_token.as_str())]);
        *session = std::mem::take(&mut *session).with_access_token(access_token);
        result
    }

    /// Remove all three fields, in memory and in storage.
    pub(crate) fn clear(&self) -> Result<(), StorageError> {
        *self.write() = Session::default();
        self.storage.remove_items(&SESSION_KEYS)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn persist_session(storage: &dyn LocalStorage, session: &Session) -> Result<(), StorageError> {
    match (session.access_token(), session.refresh_token(), session.user()) {
        (Some(access), Some(refresh), Some(user)) => {
            let user = serde_json::to_string(user).map_err(StorageError::Serialize)?;
            storage.set_items(&[
                (ACCESS_TOKEN_KEY, access),
                (REFRESH_TOKEN_KEY, refresh),
                (CURRENT_USER_KEY, user.as_str()),
            ])
        }
        _ => storage.remove_items(&SESSION_KEYS),
    }
}

/// Rebuild the session from storage. Anything short of all three keys with
/// a parseable user counts as no session, and the leftovers are removed.
fn load_session(storage: &dyn LocalStorage) -> Session {
    let read = |key: &str| {
        storage.get_item(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "Failed to read session storage");
            None
        })
    };

    let access = read(ACCESS_TOKEN_KEY);
    let refresh = read(REFRESH_TOKEN_KEY);
    let user = read(CURRENT_USER_KEY);

    match (access, refresh, user) {
        (None, None, None) => return Session::default(),
        (Some(access), Some(refresh), Some(user)) => {
            match serde_json::from_str::<UserProfile>(&user) {
                Ok(user) => return Session::new(access, refresh, user),
                Err(e) => warn!(error = %e, "Stored user profile is unreadable"),
            }
        }
        _ => {}
    }

    debug!("Discarding incomplete stored session");
    if let Err(e) = storage.remove_items(&SESSION_KEYS) {
        warn!(error = %e, "Failed to remove incomplete stored session");
    }
    Session::default()
}
