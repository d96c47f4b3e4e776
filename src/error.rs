//! Unified error model for the session and realtime core.
//! Terminal credential failures (`Unauthenticated`, `RefreshFailed`) funnel into the
//! single `SessionInvalidated` event; the remaining variants are recoverable or
//! handled internally by the reconnect state machine.

use thiserror::Error;

/// Errors surfaced by the session core.
///
/// `Clone` is required because the single-flight refresh hands the same
/// result to every concurrent waiter through a shared future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No valid credential present; the caller must redirect to login.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The refresh call failed or returned unusable data. Terminal for the
    /// session; retries belong to the caller's next explicit login.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    /// The realtime transport refused the connect attempt. Requires a fresh
    /// credential before another connect.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// The realtime connection dropped after being established. Recoverable
    /// via the reconnect loop.
    #[error("transport lost: {0}")]
    TransportLost(String),

    /// An inbound realtime payload failed to parse. Logged per message,
    /// never affects other subscriptions or the connection.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// HTTP-level failure outside the authorization taxonomy (network error,
    /// unexpected status).
    #[error("http error: {0}")]
    Http(String),
}

impl SessionError {
    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self { SessionError::Unauthenticated(msg.into()) }
    pub fn refresh<S: Into<String>>(msg: S) -> Self { SessionError::RefreshFailed(msg.into()) }
    pub fn handshake<S: Into<String>>(msg: S) -> Self { SessionError::HandshakeRejected(msg.into()) }
    pub fn transport<S: Into<String>>(msg: S) -> Self { SessionError::TransportLost(msg.into()) }
    pub fn malformed<S: Into<String>>(msg: S) -> Self { SessionError::MalformedMessage(msg.into()) }
    pub fn http<S: Into<String>>(msg: S) -> Self { SessionError::Http(msg.into()) }

    /// Whether this failure must invalidate the whole session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionError::Unauthenticated(_) | SessionError::RefreshFailed(_))
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        SessionError::Http(e.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
