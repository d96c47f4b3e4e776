//! Realtime subscription layer: STOMP frames over a WebSocket transport,
//! managed by a reconnecting state machine that replays subscriptions.

pub mod stomp;

mod manager;
mod transport;

pub use manager::{ConnectionState, RealtimeManager};
pub use transport::{FrameSink, FrameSource, RealtimeTransport, WsTransport};
