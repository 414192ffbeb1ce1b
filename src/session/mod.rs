//! Client-side session management.
//!
//! Dual-token system: a short-lived access token (sent with every API call)
//! and a long-lived refresh token (used only to mint new access tokens).
//! The [`SessionController`] refreshes the access token shortly before it
//! expires and ends the session when a refresh fails.

mod client;
mod controller;
mod errors;
mod gate;
mod scheduler;
mod storage;
mod store;
mod types;

pub use client::{AuthApi, HttpAuthClient};
pub use controller::{
    DEFAULT_CHECK_INTERVAL, DEFAULT_REFRESH_BUFFER, ProtectedView, RefreshPolicy,
    SessionController, SessionState,
};
pub use errors::{ClientError, StorageError};
pub use gate::{Admission, View, admit};
pub use storage::{FileStorage, LocalStorage, MemoryStorage};
pub use store::{ACCESS_TOKEN_KEY, CURRENT_USER_KEY, REFRESH_TOKEN_KEY, TokenStore};
pub use types::{LoginResponse, Session, UserProfile};
