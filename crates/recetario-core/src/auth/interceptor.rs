//! Authenticated HTTP client with the outbound/inbound interceptor pair.
//!
//! Outbound: attach the stored token, renewing it first when it is close to
//! expiry. Inbound: on 401, refresh once and re-issue the request; if the
//! refresh fails, hand over to coordinated logout.

use reqwest::{header, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::api::ApiError;

use super::session::{RefreshOutcome, SessionManager};
use super::token;

/// HTTP client that routes every request through the session.
/// Clone is cheap - it shares the manager and connection pool.
#[derive(Clone)]
pub struct SessionClient {
    session: SessionManager,
}

impl SessionManager {
    pub fn client(&self) -> SessionClient {
        SessionClient {
            session: self.clone(),
        }
    }
}

impl SessionClient {
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Start a request against a path relative to the API base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let api = self.session.api();
        api.http().request(method, api.url(path))
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        self.execute(builder.build()?).await
    }

    /// GET `path` and decode a successful JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }

    /// Send `request` with credentials attached.
    ///
    /// Returns the server's response, or the retried response when a 401
    /// was recovered by refreshing. A request is re-issued at most once; a
    /// 401 on the retry is returned as is. `ApiError::SessionExpired` means
    /// the session could not be renewed and has been logged out.
    pub async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        let token = self.outbound_token().await;
        // Cloned before sending; the retry needs the untouched original.
        let retry = request.try_clone();

        let method = request.method().clone();
        let path = request.url().path().to_string();
        let response = self.send_once(request, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        debug!(%method, %path, "Request unauthorized");

        let Some(retry) = retry else {
            warn!(%method, %path, "Unauthorized request has a streaming body and cannot be retried");
            self.session.expire_session();
            return Err(ApiError::SessionExpired);
        };

        let fresh = match self.session.refresh_outcome().await {
            RefreshOutcome::Refreshed(fresh) => fresh,
            // A newer session replaced the one this request was sent with.
            RefreshOutcome::Superseded => match self.session.token() {
                Some(current) => current,
                None => return Err(ApiError::SessionExpired),
            },
            _ => {
                self.session.expire_session();
                return Err(ApiError::SessionExpired);
            }
        };
        info!(%method, %path, "Retrying request with refreshed token");
        self.send_once(retry, Some(&fresh)).await
    }

    /// Outbound hook: the token to attach, renewed if near expiry.
    async fn outbound_token(&self) -> Option<String> {
        let current = self.session.token()?;
        if !token::is_near_expiry(&current, self.session.config().near_expiry()) {
            return Some(current);
        }
        debug!("Token near expiry, refreshing before request");
        match self.session.refresh().await {
            Some(fresh) => Some(fresh),
            None => {
                debug!("Proactive refresh failed, sending current token");
                Some(current)
            }
        }
    }

    async fn send_once(&self, mut request: Request, token: Option<&str>) -> Result<Response, ApiError> {
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidResponse(format!("Token is not a valid header value: {}", e)))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }
        Ok(self.session.api().http().execute(request).await?)
    }
}
