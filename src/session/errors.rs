//! Session error types.

use std::path::PathBuf;

/// Errors from the authentication backend calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Login rejected (unknown user or wrong password)
    InvalidCredentials,
    /// Registration rejected because the email is already in use
    EmailTaken,
    /// Refresh token revoked or expired; the session cannot be recovered
    RefreshRejected,
    /// Bearer token rejected by an authenticated endpoint
    Unauthorized,
    /// Timeout or connectivity failure
    Network(String),
    /// The backend answered with a status the client has no mapping for
    UnexpectedStatus(u16),
    /// The backend answered 2xx with a body the client could not decode
    UnexpectedResponse(String),
}

impl ClientError {
    /// Whether retrying later could succeed without user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }

    /// Fixed message suitable for showing next to a login or register form.
    pub fn message(&self) -> &'static str {
        match self {
            ClientError::InvalidCredentials => "Invalid email or password",
            ClientError::EmailTaken => "Email already registered",
            ClientError::RefreshRejected | ClientError::Unauthorized => {
                "Session expired, please log in again"
            }
            ClientError::Network(_) => "Could not reach the server, please try again",
            ClientError::UnexpectedStatus(_) | ClientError::UnexpectedResponse(_) => {
                "Request failed, please try again"
            }
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::InvalidCredentials => write!(f, "Invalid credentials"),
            ClientError::EmailTaken => write!(f, "Email already registered"),
            ClientError::RefreshRejected => write!(f, "Refresh token rejected"),
            ClientError::Unauthorized => write!(f, "Unauthorized"),
            ClientError::Network(e) => write!(f, "Network error: {}", e),
            ClientError::UnexpectedStatus(status) => {
                write!(f, "Unexpected response status: {}", status)
            }
            ClientError::UnexpectedResponse(e) => write!(f, "Unexpected response body: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::UnexpectedResponse(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

/// Errors from the durable session storage.
#[derive(Debug)]
pub enum StorageError {
    /// Reading or writing the storage file failed
    Io(PathBuf, std::io::Error),
    /// The storage file exists but is not a JSON object of strings
    Corrupt(PathBuf, serde_json::Error),
    /// A value could not be serialized for storage
    Serialize(serde_json::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(path, e) => write!(f, "Storage I/O error at {}: {}", path.display(), e),
            StorageError::Corrupt(path, e) => {
                write!(f, "Corrupt storage file {}: {}", path.display(), e)
            }
            StorageError::Serialize(e) => write!(f, "Failed to serialize value: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(_, e) => Some(e),
            StorageError::Corrupt(_, e) | StorageError::Serialize(e) => Some(e),
        }
    }
}
