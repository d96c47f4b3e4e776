//! Session façade composing the credential store, renewal coordinator, HTTP
//! layer and realtime manager into the single surface the UI consumes.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{ApiClient, ApiRequest, ApiResponse, HttpAuthBackend, HttpSend, ReqwestSender};
use crate::config::SessionConfig;
use crate::credentials::{decode, Credential, FileTokenStore, MemoryTokenStore, Role, TokenStore};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, SessionEvent};
use crate::realtime::{ConnectionState, RealtimeManager, RealtimeTransport, WsTransport};
use crate::renewal::{AuthBackend, RenewalCoordinator};

/// The authenticated identity shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub subject: String,
    pub role: Role,
}

/// In-memory projection of the current credential. Derived on every read,
/// never independently mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub is_authenticated: bool,
    pub user: Option<UserInfo>,
}

/// One instance per application lifetime, shared as `Arc<SessionContext>`.
pub struct SessionContext {
    store: Arc<dyn TokenStore>,
    backend: Arc<dyn AuthBackend>,
    renewal: Arc<RenewalCoordinator>,
    realtime: Arc<RealtimeManager>,
    api: ApiClient,
    events: EventBus,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl SessionContext {
    /// Production wiring: reqwest against `config.api_base`, tokio-tungstenite
    /// against `config.realtime_url`, file-backed token persistence when
    /// `config.token_path` is set.
    pub fn new(config: SessionConfig) -> SessionResult<Arc<Self>> {
        let store: Arc<dyn TokenStore> = match &config.token_path {
            Some(path) => Arc::new(FileTokenStore::new(path.clone())),
            None => Arc::new(MemoryTokenStore::new()),
        };
        let backend = Arc::new(HttpAuthBackend::new(&config.api_base)?);
        let sender = Arc::new(ReqwestSender::new(&config.api_base)?);
        Ok(Self::with_parts(config, store, backend, sender, Arc::new(WsTransport)))
    }

    /// Explicit wiring for tests and alternative transports.
    pub fn with_parts(
        config: SessionConfig,
        store: Arc<dyn TokenStore>,
        backend: Arc<dyn AuthBackend>,
        sender: Arc<dyn HttpSend>,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Arc<Self> {
        let events = EventBus::default();
        let renewal = RenewalCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            events.clone(),
            config.refresh_threshold,
        );
        let realtime =
            RealtimeManager::new(transport, Arc::clone(&store), events.clone(), config.clone());
        let api = ApiClient::new(sender, Arc::clone(&store), Arc::clone(&renewal));

        let ctx = Arc::new(Self {
            store,
            backend,
            renewal,
            realtime,
            api,
            events,
            bridge: Mutex::new(None),
        });
        *ctx.bridge.lock() = Some(ctx.spawn_credential_bridge());
        ctx
    }

    /// A refreshed credential is what unblocks a realtime manager that failed
    /// its handshake on a stale token: re-issue the (caller-initiated)
    /// connect on its behalf.
    fn spawn_credential_bridge(self: &Arc<Self>) -> JoinHandle<()> {
        let realtime = Arc::clone(&self.realtime);
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::CredentialChanged) => {
                        if realtime.state() == ConnectionState::Failed {
                            debug!("fresh credential, retrying realtime connect");
                            let _ = realtime.connect();
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    /// Authenticate against the backend and start the proactive renewal timer.
    pub async fn login(&self, username: &str, password: &str) -> SessionResult<Session> {
        let token = self.backend.login(username, password).await?;
        let claims = decode(&token)
            .ok_or_else(|| SessionError::unauthenticated("login returned an undecodable token"))?;
        self.store.save(&token);
        let cred = Credential { token, claims };
        self.events.emit(SessionEvent::CredentialChanged);
        self.renewal.schedule_renewal(&cred);
        info!(subject = %cred.claims.sub, role = %cred.claims.role, "logged in");
        Ok(self.session())
    }

    /// Idempotent teardown: best-effort backend logout, clear the credential,
    /// disarm the renewal timer, tear down realtime. Safe to call repeatedly
    /// or when already logged out.
    pub async fn logout(&self) {
        if let Some(token) = self.store.load() {
            let _ = self.backend.logout(&token).await;
        }
        self.renewal.reset();
        self.realtime.disconnect().await;
        debug!("logged out");
    }

    /// Current session projection, recomputed from the stored credential.
    pub fn session(&self) -> Session {
        let user = self
            .store
            .load()
            .and_then(|t| decode(&t))
            .filter(|c| !c.is_expired())
            .map(|c| UserInfo { subject: c.sub, role: c.role });
        Session { is_authenticated: user.is_some(), user }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated
    }

    pub fn current_user(&self) -> Option<UserInfo> {
        self.session().user
    }

    /// Resolve a valid credential, refreshing if needed.
    pub async fn ensure_valid(&self) -> SessionResult<Credential> {
        self.renewal.ensure_valid().await
    }

    /// Execute an authenticated REST call through the interceptor.
    pub async fn execute(&self, req: &ApiRequest) -> SessionResult<ApiResponse> {
        self.api.execute(req).await
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Start the realtime connection with the current credential.
    pub fn connect_realtime(&self) -> SessionResult<()> {
        self.realtime.connect()
    }

    pub fn realtime_state(&self) -> ConnectionState {
        self.realtime.state()
    }

    pub fn subscribe<F>(&self, destination: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.realtime.subscribe(destination, handler);
    }

    pub fn unsubscribe(&self, destination: &str) {
        self.realtime.unsubscribe(destination);
    }

    pub fn realtime(&self) -> &Arc<RealtimeManager> {
        &self.realtime
    }

    /// Subscribe to session and connection events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.lock().take() {
            bridge.abort();
        }
        self.renewal.cancel_timer();
    }
}
