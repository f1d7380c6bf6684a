//! API client for the hotel backend.
//!
//! This module provides the `ApiClient` struct for the authentication
//! endpoints and for sending arbitrary requests with an optional bearer
//! token. It never decides what to do about a 401; that belongs to the
//! executor and the refresh coordinator.

use std::fmt;
use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiError, ApiResponse, RequestDescriptor};
use crate::auth::{Credential, Identity};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
pub(crate) const PROFILE_PATH: &str = "/profile";

/// Default maximum number of retries for rate-limited (429) requests.
pub const DEFAULT_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Credentials for the login endpoint.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totp_code: Option<String>,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            totp_code: None,
        }
    }

    pub fn with_totp(mut self, code: impl Into<String>) -> Self {
        self.totp_code = Some(code.into());
        self
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("totp_code", &self.totp_code.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    user: AuthUser,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    is_first_login: bool,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: i64,
    username: String,
}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: i64,
    username: String,
}

/// Everything a successful login hands back.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub credential: Credential,
    pub identity: Identity,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub is_first_login: bool,
}

/// API client for the hotel backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    rate_limit_retries: u32,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
        })
    }

    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.rate_limit_retries = retries;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Exchange username/password (and an optional TOTP code) for a
    /// credential pair and the identity it belongs to
    pub async fn authenticate(&self, request: &LoginRequest) -> Result<AuthGrant, ApiError> {
        let auth: AuthResponse = self.post_json(LOGIN_PATH, request).await?;

        debug!(user_id = auth.user.id, roles = ?auth.roles, "Authenticated");

        Ok(AuthGrant {
            credential: Credential::new(auth.access_token, auth.refresh_token),
            identity: Identity {
                user_id: auth.user.id,
                username: auth.user.username,
            },
            roles: auth.roles,
            permissions: auth.permissions,
            is_first_login: auth.is_first_login,
        })
    }

    /// Trade a refresh token for a new pair. The server invalidates the old
    /// refresh token, so a response without a new one is malformed.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credential, ApiError> {
        let rotated: RefreshTokenResponse = self
            .post_json(REFRESH_PATH, &RefreshTokenRequest { refresh_token })
            .await?;

        if rotated.access_token.is_empty() || rotated.refresh_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Refresh response is missing a token".to_string(),
            ));
        }

        Ok(Credential::new(rotated.access_token, rotated.refresh_token))
    }

    /// Revoke a refresh token server-side
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), ApiError> {
        let url = self.endpoint(LOGOUT_PATH);
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        Self::check_response(response).await?;
        Ok(())
    }

    /// Send a described request, attaching `access_token` as a bearer token
    /// when given. Rate-limited responses are retried with exponential
    /// backoff; every other failure is returned as-is.
    pub async fn send(
        &self,
        descriptor: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let url = descriptor.url(&self.base_url);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(descriptor.method.clone(), &url)
                .header(header::ACCEPT, "application/json");

            if !descriptor.query.is_empty() {
                request = request.query(&descriptor.query);
            }
            for (name, value) in &descriptor.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(token) = access_token {
                request = request.bearer_auth(token);
            }
            if let Some(ref body) = descriptor.body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(ApiError::from_transport)?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let status = response.status();
                    let body = response.bytes().await.map_err(ApiError::from_transport)?;
                    return Ok(ApiResponse {
                        status,
                        body: body.to_vec(),
                    });
                }
                None => {
                    // Rate limited
                    retries += 1;
                    if retries > self.rate_limit_retries {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let response = Self::check_response(response).await?;

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }
}

/// Read the identity out of a `/profile` response
pub(crate) fn identity_from_profile(response: &ApiResponse) -> Result<Identity, ApiError> {
    let profile: ProfileResponse = response.json()?;
    Ok(Identity {
        user_id: profile.id,
        username: profile.username,
    })
}
