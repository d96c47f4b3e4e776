//! Token renewal: single-flight refresh plus the proactive renewal timer.
//!
//! At most one refresh network call is in flight at any instant. Concurrent
//! callers share the same pending result through a cloned `Shared` future;
//! the in-flight slot is an explicit owned field on the coordinator, not a
//! module-level global, so tests can construct isolated instances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::credentials::{decode, Credential, TokenStore};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, SessionEvent};

/// Auth endpoints consumed by the coordinator and the session façade.
/// `logout` is best-effort: the local teardown happens regardless.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> SessionResult<String>;
    async fn refresh(&self, token: &str) -> SessionResult<String>;
    async fn logout(&self, token: &str) -> SessionResult<()>;
}

type SharedRefresh = Shared<BoxFuture<'static, SessionResult<Credential>>>;

/// Owns the single-flight refresh operation and the proactive renewal timer.
pub struct RenewalCoordinator {
    store: Arc<dyn TokenStore>,
    backend: Arc<dyn AuthBackend>,
    events: EventBus,
    refresh_threshold: Duration,
    /// The concurrency primitive: `Some` while exactly one refresh is in
    /// flight; every caller in that window clones the same future.
    inflight: Mutex<Option<SharedRefresh>>,
    /// One-shot proactive renewal task. Re-arming aborts the previous one so
    /// timers never stack across repeated logins or refreshes.
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        backend: Arc<dyn AuthBackend>,
        events: EventBus,
        refresh_threshold: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            events,
            refresh_threshold,
            inflight: Mutex::new(None),
            timer: Mutex::new(None),
        })
    }

    /// Resolve immediately with the stored credential when it is still
    /// unexpired; otherwise delegate to [`refresh`](Self::refresh).
    pub async fn ensure_valid(self: &Arc<Self>) -> SessionResult<Credential> {
        if let Some(token) = self.store.load() {
            if let Some(claims) = decode(&token) {
                if !claims.is_expired() {
                    return Ok(Credential { token, claims });
                }
            }
        }
        self.refresh().await
    }

    /// Renew the credential. All callers that arrive while a refresh is in
    /// flight await the same operation; exactly one network call is issued.
    pub async fn refresh(self: &Arc<Self>) -> SessionResult<Credential> {
        let fut = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let this = Arc::clone(self);
                    let fresh: SharedRefresh = async move {
                        let result = Arc::clone(&this).perform_refresh().await;
                        // Clear the marker on success and failure alike so the
                        // next call starts a fresh operation.
                        *this.inflight.lock() = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };
        fut.await
    }

    async fn perform_refresh(self: Arc<Self>) -> SessionResult<Credential> {
        // Always read the latest stored token; it may have been replaced
        // since the caller decided to refresh.
        let outcome = match self.store.load() {
            Some(token) => self.backend.refresh(&token).await,
            None => Err(SessionError::refresh("no stored token to refresh")),
        };

        let err = match outcome {
            Ok(new_token) => match decode(&new_token) {
                Some(claims) => {
                    self.store.save(&new_token);
                    let cred = Credential { token: new_token, claims };
                    self.events.emit(SessionEvent::CredentialChanged);
                    self.schedule_renewal(&cred);
                    info!(subject = %cred.claims.sub, "token refreshed");
                    return Ok(cred);
                }
                None => SessionError::refresh("refresh returned an undecodable token"),
            },
            Err(SessionError::RefreshFailed(msg)) => SessionError::RefreshFailed(msg),
            Err(other) => SessionError::refresh(other.to_string()),
        };

        // Refresh failure is terminal for the session, never retried here.
        warn!("refresh failed, invalidating session: {err}");
        self.invalidate();
        Err(err)
    }

    /// Arm the one-shot proactive renewal timer for the given credential,
    /// replacing any previously armed timer. Fires `refresh_threshold`
    /// before expiry, or immediately when already inside the margin.
    pub fn schedule_renewal(self: &Arc<Self>, cred: &Credential) {
        let until_expiry = cred
            .claims
            .expires_at()
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let delay = until_expiry.saturating_sub(self.refresh_threshold);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!("proactive renewal timer fired");
            // Failure already invalidates the session inside refresh().
            let _ = this.refresh().await;
        });
        if let Some(old) = self.timer.lock().replace(handle) {
            old.abort();
        }
    }

    /// Disarm the proactive renewal timer.
    pub fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    /// Silent teardown: clear the credential and disarm the timer without
    /// emitting events. Used by the idempotent logout path.
    pub fn reset(&self) {
        self.store.clear();
        self.cancel_timer();
    }

    /// Terminal teardown: like [`reset`](Self::reset) but announces the
    /// invalidated session so consumers redirect to login.
    pub fn invalidate(&self) {
        self.reset();
        self.events.emit(SessionEvent::SessionInvalidated);
    }

    /// Whether a proactive renewal timer is currently armed.
    pub fn timer_armed(&self) -> bool {
        self.timer.lock().as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}
