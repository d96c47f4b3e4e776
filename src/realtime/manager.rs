//! Realtime connection manager: owns the broker connection lifecycle —
//! authenticated handshake, subscription replay, failure detection and
//! bounded reconnection — behind an explicit state machine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::stomp::{self, Frame};
use super::transport::{FrameSink, FrameSource, RealtimeTransport};
use crate::config::SessionConfig;
use crate::credentials::{token_expired, TokenStore};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, SessionEvent};

/// Connection lifecycle states. `Failed` is left only by an explicit
/// caller-initiated `connect()` with a fresh credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

type Handler = Arc<dyn Fn(Value) + Send + Sync>;

struct Subscription {
    id: u64,
    handler: Handler,
}

/// Instructions from the public API to the driver task.
enum Cmd {
    Subscribe(String),
    Unsubscribe { destination: String, id: u64 },
    Disconnect,
}

struct Driver {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    task: JoinHandle<()>,
}

enum ServeExit {
    Disconnected,
    Lost(SessionError),
}

/// Owns the WebSocket/STOMP client lifecycle. Constructed once per
/// application lifetime and shared by reference; holds no globals.
pub struct RealtimeManager {
    transport: Arc<dyn RealtimeTransport>,
    store: Arc<dyn TokenStore>,
    events: EventBus,
    config: SessionConfig,
    /// Source of truth for what must be live on the broker; replayed in full
    /// after every reconnect. At most one entry per destination.
    subs: Mutex<HashMap<String, Subscription>>,
    next_sub_id: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    driver: Mutex<Option<Driver>>,
}

impl RealtimeManager {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        store: Arc<dyn TokenStore>,
        events: EventBus,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            transport,
            store,
            events,
            config,
            subs: Mutex::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
            state_tx,
            driver: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions as they happen.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = *self.state_tx.borrow() != next;
        if changed {
            let _ = self.state_tx.send(next);
            self.events.emit(SessionEvent::ConnectionStateChanged(next));
        }
    }

    /// Start the connection driver. Requires an unexpired stored credential.
    /// Legal from `Disconnected` and `Failed`; a no-op while a driver is
    /// already connecting, connected or reconnecting.
    pub fn connect(self: &Arc<Self>) -> SessionResult<()> {
        match self.state() {
            ConnectionState::Disconnected | ConnectionState::Failed => {}
            _ => return Ok(()),
        }
        match self.store.load() {
            Some(token) if !token_expired(&token) => {}
            _ => {
                return Err(SessionError::unauthenticated(
                    "realtime connect requires a valid credential",
                ))
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.drive(cmd_rx).await });
        if let Some(old) = self.driver.lock().replace(Driver { cmd_tx, task }) {
            // Previous driver already ran to completion (Failed); drop it.
            old.task.abort();
        }
        Ok(())
    }

    /// Tear down the transport from any state. Subscriptions are retained in
    /// memory so a later `connect()` replays them.
    pub async fn disconnect(&self) {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.cmd_tx.send(Cmd::Disconnect);
            let _ = driver.task.await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Register a handler for a destination. Replaces any previous handler
    /// for the same destination (at most one each). Activates immediately
    /// when connected; otherwise queued for replay on the next connect.
    pub fn subscribe<F>(&self, destination: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        {
            let mut subs = self.subs.lock();
            if let Some(existing) = subs.get_mut(destination) {
                // Same broker subscription, new handler.
                existing.handler = Arc::new(handler);
                return;
            }
            let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
            subs.insert(destination.to_string(), Subscription { id, handler: Arc::new(handler) });
        }
        self.send_cmd(Cmd::Subscribe(destination.to_string()));
    }

    /// Remove a subscription; a no-op when not subscribed.
    pub fn unsubscribe(&self, destination: &str) {
        let removed = self.subs.lock().remove(destination);
        if let Some(sub) = removed {
            self.send_cmd(Cmd::Unsubscribe { destination: destination.to_string(), id: sub.id });
        }
    }

    /// Destinations currently held (live or pending replay).
    pub fn subscriptions(&self) -> Vec<String> {
        self.subs.lock().keys().cloned().collect()
    }

    fn send_cmd(&self, cmd: Cmd) {
        if let Some(driver) = self.driver.lock().as_ref() {
            let _ = driver.cmd_tx.send(cmd);
        }
    }

    async fn drive(self: Arc<Self>, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
        let mut attempt: u32 = 0;
        loop {
            self.set_state(ConnectionState::Connecting);

            // Every attempt reads the latest stored token; it may have been
            // refreshed since the previous one.
            let token = match self.store.load() {
                Some(t) if !token_expired(&t) => t,
                _ => {
                    warn!("realtime: no valid credential, giving up");
                    self.set_state(ConnectionState::Failed);
                    self.events.emit(SessionEvent::RealtimeUnavailable);
                    return;
                }
            };

            match self.establish(&token).await {
                Ok((mut sink, mut source)) => {
                    attempt = 0;
                    match self.replay(sink.as_mut()).await {
                        Ok(mut active) => {
                            info!(subscriptions = active.len(), "realtime connected");
                            self.set_state(ConnectionState::Connected);
                            let exit = self
                                .serve(sink.as_mut(), source.as_mut(), &mut cmd_rx, &mut active)
                                .await;
                            sink.close().await;
                            match exit {
                                ServeExit::Disconnected => {
                                    self.set_state(ConnectionState::Disconnected);
                                    return;
                                }
                                ServeExit::Lost(e) => warn!("realtime transport lost: {e}"),
                            }
                        }
                        Err(e) => {
                            warn!("subscription replay failed: {e}");
                            sink.close().await;
                        }
                    }
                }
                Err(SessionError::HandshakeRejected(msg)) => {
                    // Stale token: never re-attempt the handshake with the
                    // same credential.
                    warn!("realtime handshake rejected: {msg}");
                    self.set_state(ConnectionState::Failed);
                    return;
                }
                Err(e) => {
                    debug!("realtime connect attempt failed: {e}");
                }
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                warn!(attempts = attempt - 1, "realtime reconnect attempts exhausted");
                self.set_state(ConnectionState::Failed);
                self.events.emit(SessionEvent::RealtimeUnavailable);
                return;
            }
            self.set_state(ConnectionState::Reconnecting);

            // Cancellable backoff: subscription changes only mutate the map
            // (the next replay covers them); disconnect aborts the wait.
            let sleep = tokio::time::sleep(self.config.reconnect_delay(attempt));
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = cmd_rx.recv() => match cmd {
                        None | Some(Cmd::Disconnect) => {
                            self.set_state(ConnectionState::Disconnected);
                            return;
                        }
                        Some(_) => {}
                    },
                }
            }
        }
    }

    /// Transport connect plus authenticated STOMP handshake.
    async fn establish(
        &self,
        token: &str,
    ) -> SessionResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let (mut sink, mut source) =
            self.transport.connect(&self.config.realtime_url, token).await?;
        sink.send(Frame::connect(token)).await?;
        match source.recv().await {
            Some(Ok(frame)) => match frame.command {
                stomp::Command::Connected => Ok((sink, source)),
                stomp::Command::Error => {
                    let reason = frame
                        .header("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.body.clone());
                    Err(SessionError::handshake(reason))
                }
                other => Err(SessionError::handshake(format!(
                    "unexpected {} frame during handshake",
                    other.as_str()
                ))),
            },
            Some(Err(e)) => Err(SessionError::handshake(e.to_string())),
            None => Err(SessionError::transport("connection closed during handshake")),
        }
    }

    /// Resubscribe every held destination. Runs to completion before the
    /// driver looks at queued commands, so a subscribe() racing the replay
    /// can never register twice.
    async fn replay(&self, sink: &mut dyn FrameSink) -> SessionResult<HashSet<String>> {
        let mut snapshot: Vec<(String, u64)> =
            self.subs.lock().iter().map(|(dest, sub)| (dest.clone(), sub.id)).collect();
        // Ids are monotonic, so sorting restores registration order: anything
        // queued while the link was down comes after what was already live.
        snapshot.sort_by_key(|(_, id)| *id);
        let mut active = HashSet::new();
        for (destination, id) in snapshot {
            sink.send(Frame::subscribe(id, &destination)).await?;
            debug!(%destination, "resubscribed");
            active.insert(destination);
        }
        Ok(active)
    }

    async fn serve(
        &self,
        sink: &mut dyn FrameSink,
        source: &mut dyn FrameSource,
        cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
        active: &mut HashSet<String>,
    ) -> ServeExit {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Cmd::Disconnect) => return ServeExit::Disconnected,
                    Some(Cmd::Subscribe(destination)) => {
                        if active.contains(&destination) {
                            continue; // covered by replay or an earlier command
                        }
                        // The subscription may have been removed again before
                        // the driver got to it.
                        let id = self.subs.lock().get(&destination).map(|s| s.id);
                        if let Some(id) = id {
                            if let Err(e) = sink.send(Frame::subscribe(id, &destination)).await {
                                return ServeExit::Lost(e);
                            }
                            active.insert(destination);
                        }
                    }
                    Some(Cmd::Unsubscribe { destination, id }) => {
                        if active.remove(&destination) {
                            if let Err(e) = sink.send(Frame::unsubscribe(id)).await {
                                return ServeExit::Lost(e);
                            }
                        }
                    }
                },
                frame = source.recv() => match frame {
                    None => return ServeExit::Lost(SessionError::transport("connection closed")),
                    Some(Ok(frame)) => {
                        if let Some(exit) = self.handle_frame(frame) {
                            return exit;
                        }
                    }
                    Some(Err(SessionError::MalformedMessage(m))) => {
                        // Recoverable: drop the frame, keep the connection.
                        warn!("dropping malformed frame: {m}");
                    }
                    Some(Err(e)) => return ServeExit::Lost(e),
                },
            }
        }
    }

    fn handle_frame(&self, frame: Frame) -> Option<ServeExit> {
        match frame.command {
            stomp::Command::Message => {
                let Some(destination) = frame.header("destination").map(str::to_string) else {
                    warn!("MESSAGE frame without destination, dropping");
                    return None;
                };
                let handler = self.subs.lock().get(&destination).map(|s| s.handler.clone());
                let Some(handler) = handler else {
                    debug!(%destination, "message for destination without handler");
                    return None;
                };
                // A payload that fails to parse must never take down the
                // dispatch loop for other subscriptions.
                match serde_json::from_str::<Value>(&frame.body) {
                    Ok(payload) => handler(payload),
                    Err(e) => warn!(%destination, "malformed payload dropped: {e}"),
                }
                None
            }
            stomp::Command::Error => {
                let reason = frame
                    .header("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| frame.body.clone());
                Some(ServeExit::Lost(SessionError::transport(format!("broker error: {reason}"))))
            }
            other => {
                debug!("ignoring {} frame", other.as_str());
                None
            }
        }
    }
}
