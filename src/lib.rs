//! courier-core: session/credential lifecycle and realtime subscription core
//! for the courier delivery client.
//!
//! The crate owns three engineering contracts and nothing visual:
//! - single-flight token renewal with a proactive expiry timer,
//! - bearer attachment with one-shot recovery from authorization failures,
//! - a STOMP-over-WebSocket connection manager that replays subscriptions
//!   across bounded reconnects.
//!
//! Everything funnels terminal credential failures into one
//! `SessionInvalidated` event; consumers redirect to login on it.

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod realtime;
pub mod renewal;
pub mod session;

pub use api::{ApiClient, ApiRequest, ApiResponse, HttpAuthBackend, HttpSend, ReqwestSender};
pub use config::SessionConfig;
pub use credentials::{
    decode, token_expired, Claims, Credential, FileTokenStore, MemoryTokenStore, Role, TokenStore,
};
pub use error::{SessionError, SessionResult};
pub use events::{EventBus, SessionEvent};
pub use realtime::{ConnectionState, RealtimeManager, RealtimeTransport, WsTransport};
pub use renewal::{AuthBackend, RenewalCoordinator};
pub use session::{Session, SessionContext, UserInfo};
