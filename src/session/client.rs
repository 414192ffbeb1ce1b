//! Network operations that produce or consume session credentials.
//!
//! - POST `/auth/login` - Form login, returns access and refresh tokens
//! - GET `/users/me` - Profile of the bearer
//! - POST `/auth/refresh` - Exchange a refresh token for a new access token
//! - POST `/auth/register` - Create an account
//!
//! Every call is one-shot: nothing here retries. Callers decide.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::errors::ClientError;
use super::types::{LoginResponse, UserProfile};

/// The authentication backend as seen by the session controller.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Log in and fetch the profile that goes with the new tokens.
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError>;

    /// Mint a new access token. `RefreshRejected` means the session is over.
    async fn refresh(&self, refresh_token: &str) -> Result<String, ClientError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ClientError>;

    async fn register(&self, full_name: &str, email: &str, password: &str)
    -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct LoginForm<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    full_name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// [`AuthApi`] over HTTP.
#[derive(Clone)]
pub struct HttpAuthClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpAuthClient {
    /// Create a client for the API rooted at `base_url` (e.g. `http://host/api`).
    /// `timeout` bounds every request, connect included.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl AuthApi for HttpAuthClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint("/auth/login"))
            .form(&LoginForm {
                username: email,
                password,
            })
            .send()
            .await?;

        // The backend answers 404 for both unknown users and wrong passwords.
        match response.status().as_u16() {
            200..=299 => {}
            401 | 403 | 404 | 409 => return Err(ClientError::InvalidCredentials),
            status => return Err(ClientError::UnexpectedStatus(status)),
        }

        let tokens: TokenPair = response.json().await?;
        let user = self.fetch_profile(&tokens.access_token).await?;
        debug!(user = %user.email, "Login accepted");

        Ok(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, ClientError> {
        let response = self
            .http
            .post(self.endpoint("/auth/refresh"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => {
                let body: RefreshResponse = response.json().await?;
                Ok(body.access_token)
            }
            400 | 401 | 403 => Err(ClientError::RefreshRejected),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .http
            .get(self.endpoint("/users/me"))
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(response.json().await?),
            401 | 403 => Err(ClientError::Unauthorized),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    async fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint("/auth/register"))
            .json(&RegisterRequest {
                full_name,
                email,
                password,
            })
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            409 => Err(ClientError::EmailTaken),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }
}
