//! Transport seam for the realtime connection. The manager talks frames over
//! a split sink/source pair; the production implementation speaks STOMP text
//! messages over a tokio-tungstenite WebSocket.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::stomp::Frame;
use crate::error::{SessionError, SessionResult};

/// Outbound half of an established connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> SessionResult<()>;
    async fn close(&mut self);
}

/// Inbound half. `None` means the peer closed the connection. A
/// `MalformedMessage` item is recoverable; anything else is fatal for this
/// connection.
#[async_trait]
pub trait FrameSource: Send {
    async fn recv(&mut self) -> Option<SessionResult<Frame>>;
}

/// Connects to the broker. Implementations map an authorization rejection of
/// the upgrade itself to `HandshakeRejected` and anything network-level to
/// `TransportLost`.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> SessionResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}

/// Production transport over tokio-tungstenite.
pub struct WsTransport;

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> SessionResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let mut request = url
            .into_client_request()
            .map_err(|e| SessionError::transport(format!("invalid realtime url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| SessionError::transport(format!("bad bearer header: {e}")))?;
        request.headers_mut().insert("authorization", bearer);

        let (stream, _resp) = tokio_tungstenite::connect_async(request).await.map_err(|e| match &e {
            tokio_tungstenite::tungstenite::Error::Http(resp)
                if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
            {
                SessionError::handshake(format!("upgrade rejected: HTTP {}", resp.status()))
            }
            _ => SessionError::transport(e.to_string()),
        })?;
        let (sink, source) = stream.split();
        Ok((Box::new(WsFrameSink { sink }), Box::new(WsFrameSource { source })))
    }
}

struct WsFrameSink {
    sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: Frame) -> SessionResult<()> {
        self.sink
            .send(Message::Text(frame.encode()))
            .await
            .map_err(|e| SessionError::transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

struct WsFrameSource {
    source: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn recv(&mut self) -> Option<SessionResult<Frame>> {
        while let Some(msg) = self.source.next().await {
            match msg {
                // Bare newlines are STOMP heartbeats, not frames.
                Ok(Message::Text(text)) if text.trim_matches(&['\n', '\0'][..]).is_empty() => continue,
                Ok(Message::Text(text)) => return Some(Frame::parse(&text)),
                Ok(Message::Close(_)) => return None,
                Ok(other) => {
                    debug!("ignoring non-text websocket message: {other:?}");
                    continue;
                }
                Err(e) => return Some(Err(SessionError::transport(e.to_string()))),
            }
        }
        None
    }
}
