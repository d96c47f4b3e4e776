//! Shared fakes for the integration tests: a counting auth backend, a
//! scripted HTTP sender and an in-memory realtime transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use courier_core::realtime::stomp::{Command, Frame};
use courier_core::realtime::{FrameSink, FrameSource, RealtimeTransport};
use courier_core::{ApiRequest, ApiResponse, AuthBackend, HttpSend, SessionError, SessionResult};

/// Route tracing output through the test harness. `RUST_LOG` controls
/// verbosity; silent by default.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Unsigned token in JWT shape: header.payload.signature with a throwaway
/// signature segment. Mirrors what the backend issues closely enough for the
/// client-side codec.
pub fn make_token(sub: &str, role: &str, exp: i64, iat: Option<i64>) -> String {
    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"HS512","typ":"JWT"}"#);
    let payload = match iat {
        Some(iat) => serde_json::json!({"sub": sub, "role": role, "exp": exp, "iat": iat}),
        None => serde_json::json!({"sub": sub, "role": role, "exp": exp}),
    };
    let payload = engine.encode(serde_json::to_vec(&payload).unwrap());
    format!("{header}.{payload}.sig")
}

/// Auth backend that counts calls and issues fresh tokens with a fixed TTL.
/// Each issued token is distinct (signature suffix) so tests can tell a
/// renewed credential from the old one.
pub struct CountingBackend {
    ttl_secs: i64,
    issued: AtomicUsize,
    pub logins: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub logouts: AtomicUsize,
    pub fail_login: AtomicBool,
    pub fail_refresh: AtomicBool,
    refresh_delay: Mutex<Option<Duration>>,
}

impl CountingBackend {
    pub fn new(ttl_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            ttl_secs,
            issued: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
            fail_login: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            refresh_delay: Mutex::new(None),
        })
    }

    /// Make refresh calls take this long, so concurrent callers overlap.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = Some(delay);
    }

    fn issue(&self) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now().timestamp();
        let token = make_token("u1", "COURIER", now + self.ttl_secs, Some(now));
        format!("{token}{n}")
    }
}

#[async_trait]
impl AuthBackend for CountingBackend {
    async fn login(&self, _username: &str, _password: &str) -> SessionResult<String> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(SessionError::unauthenticated("login rejected"));
        }
        Ok(self.issue())
    }

    async fn refresh(&self, _token: &str) -> SessionResult<String> {
        let delay = *self.refresh_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(SessionError::refresh("backend rejected refresh"));
        }
        Ok(self.issue())
    }

    async fn logout(&self, _token: &str) -> SessionResult<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// HTTP sender that replays a scripted queue of responses (200/null once the
/// script runs out) and records every (path, bearer) pair it was handed.
pub struct ScriptedSender {
    script: Mutex<VecDeque<ApiResponse>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(VecDeque::new()), calls: Mutex::new(Vec::new()) })
    }

    pub fn push_status(&self, status: u16) {
        self.script.lock().push_back(ApiResponse { status, body: Value::Null });
    }

    pub fn sends(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn bearer(&self, i: usize) -> String {
        self.calls.lock()[i].1.clone()
    }
}

#[async_trait]
impl HttpSend for ScriptedSender {
    async fn send(&self, req: &ApiRequest, bearer: &str) -> SessionResult<ApiResponse> {
        self.calls.lock().push((req.path.clone(), bearer.to_string()));
        Ok(self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ApiResponse { status: 200, body: Value::Null }))
    }
}

/// How the fake transport answers one `connect()` call.
pub enum Outcome {
    /// Fail the transport connect itself.
    Refuse(SessionError),
    /// Hand out a connection whose broker accepts or rejects the CONNECT frame.
    Conn(Handshake),
}

pub enum Handshake {
    Accept,
    Reject(String),
}

/// Injected into an open connection's inbound half.
pub enum Inject {
    Frame(Frame),
    Error(SessionError),
    Close,
}

/// Test-side handle to one accepted connection.
#[derive(Clone)]
pub struct ConnHandle {
    /// Every frame the manager sent, CONNECT included.
    pub sent: Arc<Mutex<Vec<Frame>>>,
    inject: mpsc::UnboundedSender<Inject>,
}

impl ConnHandle {
    pub fn inject_frame(&self, frame: Frame) {
        let _ = self.inject.send(Inject::Frame(frame));
    }

    pub fn inject_error(&self, err: SessionError) {
        let _ = self.inject.send(Inject::Error(err));
    }

    pub fn close(&self) {
        let _ = self.inject.send(Inject::Close);
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Destinations of all SUBSCRIBE frames sent so far, in order.
    pub fn subscribed_destinations(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|f| f.command == Command::Subscribe)
            .filter_map(|f| f.header("destination").map(str::to_string))
            .collect()
    }
}

/// In-memory realtime transport. Connections follow a script of outcomes
/// (defaulting to an accepting broker once the script runs out); each
/// accepted connection is surfaced to the test through `next_conn`.
pub struct FakeTransport {
    script: Mutex<VecDeque<Outcome>>,
    pub connects: AtomicUsize,
    /// Bearer token of every connect attempt, in order.
    pub tokens: Mutex<Vec<String>>,
    conns_tx: mpsc::UnboundedSender<ConnHandle>,
    conns_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConnHandle>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (conns_tx, conns_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            conns_tx,
            conns_rx: tokio::sync::Mutex::new(conns_rx),
        })
    }

    pub fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Await the next accepted connection.
    pub async fn next_conn(&self) -> ConnHandle {
        tokio::time::timeout(Duration::from_secs(2), async {
            self.conns_rx.lock().await.recv().await.expect("transport dropped")
        })
        .await
        .expect("timed out waiting for a connection")
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(
        &self,
        _url: &str,
        token: &str,
    ) -> SessionResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(token.to_string());

        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Conn(Handshake::Accept));
        let handshake = match outcome {
            Outcome::Refuse(e) => return Err(e),
            Outcome::Conn(h) => h,
        };

        let sent = Arc::new(Mutex::new(Vec::new()));
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = oneshot::channel();
        let _ = self.conns_tx.send(ConnHandle { sent: Arc::clone(&sent), inject: inject_tx });

        let sink = FakeSink { sent, connect_tx: Some(connect_tx) };
        let source = FakeSource { connect_rx: Some(connect_rx), handshake, inject_rx };
        Ok((Box::new(sink), Box::new(source)))
    }
}

struct FakeSink {
    sent: Arc<Mutex<Vec<Frame>>>,
    connect_tx: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send(&mut self, frame: Frame) -> SessionResult<()> {
        let is_connect = frame.command == Command::Connect;
        self.sent.lock().push(frame);
        if is_connect {
            if let Some(tx) = self.connect_tx.take() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    async fn close(&mut self) {}
}

struct FakeSource {
    connect_rx: Option<oneshot::Receiver<()>>,
    handshake: Handshake,
    inject_rx: mpsc::UnboundedReceiver<Inject>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn recv(&mut self) -> Option<SessionResult<Frame>> {
        // First recv answers the CONNECT frame.
        if let Some(rx) = self.connect_rx.take() {
            if rx.await.is_err() {
                return None;
            }
            return match &self.handshake {
                Handshake::Accept => Some(Ok(Frame::new(Command::Connected))),
                Handshake::Reject(msg) => {
                    Some(Ok(Frame::new(Command::Error).with_header("message", msg)))
                }
            };
        }
        match self.inject_rx.recv().await {
            Some(Inject::Frame(f)) => Some(Ok(f)),
            Some(Inject::Error(e)) => Some(Err(e)),
            Some(Inject::Close) | None => None,
        }
    }
}
