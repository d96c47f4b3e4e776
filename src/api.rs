//! HTTP session layer: bearer attachment on every outgoing call and one-shot
//! recovery from authorization failures via the renewal coordinator.
//!
//! The wire transport sits behind [`HttpSend`] so the interceptor logic can
//! be exercised without a live backend.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::credentials::{token_expired, TokenStore};
use crate::error::{SessionError, SessionResult};
use crate::renewal::{AuthBackend, RenewalCoordinator};

/// An API call to the REST backend, addressed relative to the base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::GET, path: path.into(), body: None }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self { method: Method::POST, path: path.into(), body: Some(body) }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
}

/// Wire seam: sends one request with the given bearer token attached.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, req: &ApiRequest, bearer: &str) -> SessionResult<ApiResponse>;
}

/// Production sender over a shared reqwest client.
pub struct ReqwestSender {
    client: reqwest::Client,
    base: Url,
}

impl ReqwestSender {
    pub fn new(api_base: &str) -> SessionResult<Self> {
        let base = Url::parse(api_base).map_err(|e| SessionError::http(format!("invalid api base: {e}")))?;
        Ok(Self { client: reqwest::Client::new(), base })
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn send(&self, req: &ApiRequest, bearer: &str) -> SessionResult<ApiResponse> {
        let url = self
            .base
            .join(&req.path)
            .map_err(|e| SessionError::http(format!("invalid path {}: {e}", req.path)))?;
        let mut builder = self.client.request(req.method.clone(), url).bearer_auth(bearer);
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }
}

/// Bearer-attaching client with the reactive renewal policy:
/// refresh once on the first authorization failure, retry the original
/// request exactly once, and treat any further failure as terminal.
pub struct ApiClient {
    sender: Arc<dyn HttpSend>,
    store: Arc<dyn TokenStore>,
    renewal: Arc<RenewalCoordinator>,
}

impl ApiClient {
    pub fn new(
        sender: Arc<dyn HttpSend>,
        store: Arc<dyn TokenStore>,
        renewal: Arc<RenewalCoordinator>,
    ) -> Self {
        Self { sender, store, renewal }
    }

    /// Execute an authenticated API call.
    ///
    /// Fails fast with `Unauthenticated` when no token is present — a request
    /// is never silently sent without a bearer. An expired stored token is
    /// renewed before the first attempt, honouring the invariant that an
    /// expired credential is never attached to an outgoing request.
    pub async fn execute(&self, req: &ApiRequest) -> SessionResult<ApiResponse> {
        let token = match self.store.load() {
            None => return Err(SessionError::unauthenticated("no credential for authenticated call")),
            Some(t) if token_expired(&t) => self.renewal.refresh().await?.token,
            Some(t) => t,
        };

        let resp = self.sender.send(req, &token).await?;
        if resp.status != StatusCode::UNAUTHORIZED.as_u16() {
            return Ok(resp);
        }

        // First authorization failure for this request: renew and retry once.
        debug!(path = %req.path, "authorization failure, attempting refresh");
        let renewed = self.renewal.refresh().await?;
        let retried = self.sender.send(req, &renewed.token).await?;
        if retried.status == StatusCode::UNAUTHORIZED.as_u16() {
            // Already retried: terminal, no loops.
            warn!(path = %req.path, "retry with fresh token still unauthorized");
            self.renewal.invalidate();
            return Err(SessionError::unauthenticated("request rejected after token renewal"));
        }
        Ok(retried)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Reqwest-backed implementation of the auth endpoints.
pub struct HttpAuthBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpAuthBackend {
    pub fn new(api_base: &str) -> SessionResult<Self> {
        let base = Url::parse(api_base).map_err(|e| SessionError::http(format!("invalid api base: {e}")))?;
        Ok(Self { client: reqwest::Client::new(), base })
    }

    fn endpoint(&self, path: &str) -> SessionResult<Url> {
        self.base.join(path).map_err(|e| SessionError::http(format!("invalid endpoint {path}: {e}")))
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, username: &str, password: &str) -> SessionResult<String> {
        let resp = self
            .client
            .post(self.endpoint("/auth/login")?)
            .json(&serde_json::json!({"username": username, "password": password}))
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SessionError::unauthenticated("login rejected"));
        }
        if !status.is_success() {
            return Err(SessionError::http(format!("login failed: HTTP {status}")));
        }
        let body: TokenResponse =
            resp.json().await.map_err(|e| SessionError::http(format!("login response: {e}")))?;
        Ok(body.token)
    }

    async fn refresh(&self, token: &str) -> SessionResult<String> {
        let resp = self
            .client
            .post(self.endpoint("/auth/refresh")?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SessionError::refresh(format!("refresh request: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::refresh(format!("HTTP {status}")));
        }
        let body: TokenResponse =
            resp.json().await.map_err(|e| SessionError::refresh(format!("refresh response: {e}")))?;
        Ok(body.token)
    }

    async fn logout(&self, token: &str) -> SessionResult<()> {
        // Best-effort: local teardown proceeds whatever the backend says.
        if let Ok(url) = self.endpoint("/auth/logout") {
            if let Err(e) = self.client.post(url).bearer_auth(token).send().await {
                debug!("logout call failed (ignored): {e}");
            }
        }
        Ok(())
    }
}
