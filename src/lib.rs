pub mod cli;
pub mod jwt;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use session::{FileStorage, HttpAuthClient, RefreshPolicy, SessionController, TokenStore};
use url::Url;

pub struct ClientConfig {
    /// API root (e.g., "http://localhost:8000/api")
    pub api_url: Url,
    /// File the session is persisted to between runs
    pub state_file: PathBuf,
    /// Refresh buffer and check interval
    pub policy: RefreshPolicy,
    /// Upper bound for each backend request, connect included
    pub request_timeout: Duration,
}

/// Create a session controller for the configured API, restoring any
/// session persisted in the state file.
pub fn open_controller(config: &ClientConfig) -> Result<SessionController, reqwest::Error> {
    let client = HttpAuthClient::new(config.api_url.clone(), config.request_timeout)?;
    let store = TokenStore::open(FileStorage::new(&config.state_file));
    Ok(SessionController::new(Arc::new(client), store, config.policy))
}
