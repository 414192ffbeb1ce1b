//! Session data types.

use serde::{Deserialize, Serialize};

/// The `/users/me` profile resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
}

/// Everything a successful login yields.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

/// The process-wide authentication record.
///
/// Either all three fields are present or none are: the constructors are the
/// only way to build one, so `user` is present iff `access_token` is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<UserProfile>,
}

impl Session {
    pub fn new(access_token: String, refresh_token: String, user: UserProfile) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            user: Some(user),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
    }

    /// Same session with a freshly minted access token.
    /// An empty session stays empty.
    pub(crate) fn with_access_token(self, access_token: String) -> Self {
        if self.is_empty() {
            return self;
        }
        Self {
            access_token: Some(access_token),
            ..self
        }
    }
}

impl From<LoginResponse> for Session {
    fn from(response: LoginResponse) -> Self {
        Session::new(response.access_token, response.refresh_token, response.user)
    }
}
