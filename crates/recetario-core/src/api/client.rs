//! HTTP client for the recipe backend's Auth Service.
//!
//! Every method maps non-2xx statuses through `ApiError::from_status` so
//! callers can tell an explicit rejection (401/403) from a network failure.

use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Credential, Identity, Role};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL when nothing is configured (local development backend)
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const LOGIN_PATH: &str = "/users/login";
const REGISTER_PATH: &str = "/users/register";
const VALIDATE_PATH: &str = "/auth/validate-token";
const REFRESH_PATH: &str = "/auth/refresh-token";

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Body returned by both login and register.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub role: Role,
    pub token: String,
}

impl LoginResponse {
    pub fn into_credential(self) -> Credential {
        Credential {
            token: self.token,
            user: Identity {
                id: self.id,
                username: self.username,
            },
            role: self.role,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: Option<String>,
}

/// Validate may echo the identity bare or wrapped in `{ "user": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ValidateResponse {
    Wrapped { user: Identity },
    Bare(Identity),
}

/// Auth Service client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Underlying HTTP client, shared with `SessionClient`.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Join a path onto the base URL. Absolute URLs are passed through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Authenticate with username and password.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        debug!(username = %request.username, "Sending login request");
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(request)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, "login").await
    }

    /// Create an account; the backend logs the new user in immediately.
    pub async fn register(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        debug!(username = %request.username, "Sending register request");
        let response = self
            .client
            .post(self.url(REGISTER_PATH))
            .json(request)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, "register").await
    }

    /// Ask the Auth Service whether `token` is still accepted.
    ///
    /// Returns the echoed identity when the body carries one. `timeout`
    /// bounds this call independently of the client default.
    pub async fn validate_token(&self, token: &str, timeout: Duration) -> Result<Option<Identity>, ApiError> {
        let response = self
            .client
            .get(self.url(VALIDATE_PATH))
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await.unwrap_or_default();
        Ok(serde_json::from_str::<ValidateResponse>(&text)
            .ok()
            .map(|parsed| match parsed {
                ValidateResponse::Wrapped { user } => user,
                ValidateResponse::Bare(user) => user,
            }))
    }

    /// Exchange the current token for a fresh one.
    pub async fn refresh_token(&self, token: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let parsed: RefreshResponse = Self::parse_json(response, "refresh").await?;
        parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("Refresh response carried no token".to_string()))
    }
}
