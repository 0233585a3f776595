//! Duplex transport over the Ditto WebSocket endpoint

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Inbound, Transport};
use crate::services::client::auth::CredentialProvider;
use crate::services::client::types::DittoMessage;
use crate::services::client::{ClientError, ClientResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    endpoint: String,
    credentials: Arc<CredentialProvider>,
    heartbeat_interval: Duration,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl WebSocketTransport {
    pub fn new(endpoint: &str, credentials: Arc<CredentialProvider>, heartbeat_interval: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            credentials,
            heartbeat_interval,
            outbound: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&self) -> ClientResult<Inbound> {
        let url = self.credentials.decorate_ws_url(&self.endpoint).await?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;
        if let Some((name, value)) = self.credentials.api_key_header()? {
            request.headers_mut().insert(name, value);
        }

        debug!("Connecting to {} ...", self.endpoint);
        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| ClientError::NetworkError {
                message: format!("WebSocket connect to {} failed: {}", self.endpoint, e),
            })?;
        info!(
            "WebSocket connection to {} established successfully!",
            self.endpoint
        );

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, outbound_rx, self.heartbeat_interval));
        tokio::spawn(read_loop(stream, inbound_tx));

        *self.outbound.lock().await = Some(outbound_tx);
        Ok(inbound_rx)
    }

    async fn send(&self, message: DittoMessage) -> ClientResult<()> {
        let outbound = self.outbound.lock().await;
        let outbound = outbound.as_ref().ok_or(ClientError::NotReady)?;
        let text = serde_json::to_string(&message)?;
        debug!("Sending message: {}", text);
        outbound
            .send(Message::Text(text))
            .map_err(|_| ClientError::ConnectionClosed {
                reason: "writer task ended".to_string(),
            })
    }

    async fn close(&self) -> ClientResult<()> {
        let outbound = self
            .outbound
            .lock()
            .await
            .take()
            .ok_or(ClientError::NotReady)?;
        debug!("Closing WebSocket connection.");
        // The writer may already be gone if the remote closed first
        let _ = outbound.send(Message::Close(None));
        Ok(())
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.close().await;
                    break;
                };
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Message::Binary(Vec::new())).await {
                    warn!("WebSocket heartbeat failed: {}", e);
                    break;
                }
            }
        }
    }
    debug!("WebSocket writer finished");
}

async fn read_loop(mut stream: SplitStream<WsStream>, inbound: mpsc::UnboundedSender<DittoMessage>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(message) = parse_frame(&text) {
                    if inbound.send(message).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(frame) => warn!(
                        "WebSocket closed. Code: {}. Reason: {}",
                        frame.code, frame.reason
                    ),
                    None => warn!("WebSocket closed."),
                }
                break;
            }
            Ok(other) => debug!("Ignoring non-text frame of {} bytes", other.len()),
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
        }
    }
    debug!("WebSocket reader finished");
}

/// Parse a text frame as a protocol message.
///
/// Non-JSON text and JSON that is not an envelope are logged and dropped.
pub fn parse_frame(text: &str) -> Option<DittoMessage> {
    if !text.starts_with('{') {
        debug!("Received non-JSON message: {}", text);
        return None;
    }
    match serde_json::from_str(text) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("Discarding malformed message ({}): {}", e, text);
            None
        }
    }
}
