//! WebSocket bus implementation.
//!
//! Each provider created on this bus binds its own TCP listener and speaks
//! the length-prefixed frame protocol over binary WebSocket messages. A
//! client must open with a `connect` frame; every request then runs on its
//! own task and is answered by id.

use async_trait::async_trait;
use dashmap::DashSet;
use futures_util::{SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use switchboard_protocol::codec::{self, FrameCodec};
use switchboard_protocol::{Frame, ProtocolError, SerializedError, PROTOCOL_VERSION};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

use crate::endpoint::EndpointCore;
use crate::traits::{Bus, ProviderEndpoint, TransportError};

/// Error kind sent when a client speaks an unsupported protocol major.
pub const INCOMPATIBLE_PROTOCOL: &str = "IncompatibleProtocol";

/// Error kind sent when the first frame is not a `connect` frame.
pub const HANDSHAKE_REQUIRED: &str = "HandshakeRequired";

/// WebSocket bus configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat interval advertised to clients, in milliseconds.
    pub heartbeat_ms: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8427)),
            max_message_size: 64 * 1024, // 64 KB
            heartbeat_ms: 30_000,
        }
    }
}

/// WebSocket bus.
pub struct WebSocketBus {
    config: WebSocketConfig,
    services: DashSet<String>,
    local_addr: OnceLock<SocketAddr>,
}

impl WebSocketBus {
    /// Create a new WebSocket bus. Nothing is bound until a provider is created.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            services: DashSet::new(),
            local_addr: OnceLock::new(),
        }
    }

    /// The address the provider listener is bound to, once created.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }
}

#[async_trait]
impl Bus for WebSocketBus {
    async fn create_provider(
        &self,
        service: &str,
    ) -> Result<Arc<dyn ProviderEndpoint>, TransportError> {
        if !self.services.insert(service.to_string()) {
            return Err(TransportError::ProviderExists(service.to_string()));
        }

        let listener = match TcpListener::bind(self.config.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.services.remove(service);
                return Err(TransportError::Io(e));
            }
        };
        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
            info!(service = %service, "WebSocket provider listening on {}", addr);
        }

        // Clients queue in the listen backlog until the endpoint is started.
        let endpoint = Arc::new(EndpointCore::new(service));
        tokio::spawn(accept_loop(listener, endpoint.clone(), self.config.clone()));

        Ok(endpoint)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

async fn accept_loop(listener: TcpListener, endpoint: Arc<EndpointCore>, config: WebSocketConfig) {
    endpoint.wait_started().await;
    debug!(service = %endpoint.service(), "Accepting WebSocket clients");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted TCP connection from {}", addr);
                tokio::spawn(serve_connection(
                    stream,
                    addr,
                    endpoint.clone(),
                    config.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept TCP connection");
            }
        }
    }
}

/// Drive a single client connection from handshake to close.
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    endpoint: Arc<EndpointCore>,
    config: WebSocketConfig,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed with {}: {}", addr, e);
            return;
        }
    };
    let (mut sink, mut source) = ws_stream.split();
    let mut codec = FrameCodec::new();

    let (identity, payload) =
        match next_frame(&mut source, &mut codec, config.max_message_size).await {
            Ok(Some(Frame::Connect {
                identity,
                protocol,
                payload,
            })) => {
                if !PROTOCOL_VERSION.accepts_major(protocol) {
                    warn!(identity = %identity, protocol, "Refusing incompatible client");
                    let error = SerializedError::new(
                        INCOMPATIBLE_PROTOCOL,
                        format!(
                            "Protocol {} is not compatible with {}",
                            protocol, PROTOCOL_VERSION
                        ),
                    );
                    let _ = send_direct(&mut sink, &Frame::failure(0, error)).await;
                    return;
                }
                (identity, payload)
            }
            Ok(Some(other)) => {
                warn!(frame_type = ?other.frame_type(), "Expected connect frame from {}", addr);
                let error = SerializedError::new(HANDSHAKE_REQUIRED, "First frame must be connect");
                let _ = send_direct(&mut sink, &Frame::failure(0, error)).await;
                return;
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Handshake read failed from {}", addr);
                return;
            }
        };

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let _ = tx.send(Frame::connected(PROTOCOL_VERSION.major, config.heartbeat_ms));

    if let Err(e) = endpoint.accept(identity.clone(), payload, tx.clone()) {
        warn!(identity = %identity, error = %e, "Rejecting connection");
        let error = SerializedError::new("ConnectionRejected", e.to_string());
        let _ = send_direct(&mut sink, &Frame::failure(0, error)).await;
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match codec::encode(&frame) {
                Ok(data) => {
                    if sink.send(Message::Binary(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode outbound frame"),
            }
        }
        let _ = sink.close().await;
    });

    loop {
        match next_frame(&mut source, &mut codec, config.max_message_size).await {
            Ok(Some(Frame::Request { id, topic, payload })) => {
                let endpoint = endpoint.clone();
                let tx = tx.clone();
                let source_identity = identity.clone();
                tokio::spawn(async move {
                    let reply = match endpoint.invoke(&topic, payload, source_identity).await {
                        Ok(result) => Frame::response(id, result),
                        Err(error) => Frame::failure(id, error),
                    };
                    let _ = tx.send(reply);
                });
            }
            Ok(Some(Frame::Ping { timestamp })) => {
                let _ = tx.send(Frame::pong(timestamp));
            }
            Ok(Some(Frame::Pong { .. })) => {}
            Ok(Some(other)) => {
                warn!(identity = %identity, frame_type = ?other.frame_type(), "Unexpected frame type");
            }
            Ok(None) => {
                debug!(identity = %identity, "WebSocket stream ended");
                break;
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "WebSocket error");
                break;
            }
        }
    }

    endpoint.release(&identity);
    drop(tx);
    let _ = writer.await;
}

/// Read frames until one is complete or the stream closes.
///
/// `max_message_size` bounds both a single message and a frame assembled
/// from several messages.
async fn next_frame<S>(
    source: &mut S,
    codec: &mut FrameCodec,
    max_message_size: usize,
) -> Result<Option<Frame>, TransportError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        if let Some(frame) = codec.next_frame()? {
            return Ok(Some(frame));
        }
        if codec.buffered() > max_message_size {
            warn!(
                "Partial frame too large: {} bytes buffered (max: {})",
                codec.buffered(),
                max_message_size
            );
            return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(
                codec.buffered(),
            )));
        }

        match source.next().await {
            Some(Ok(Message::Binary(data))) => {
                if data.len() > max_message_size {
                    warn!(
                        "Message too large: {} bytes (max: {})",
                        data.len(),
                        max_message_size
                    );
                    return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(
                        data.len(),
                    )));
                }
                codec.extend(&data);
            }
            Some(Ok(Message::Text(text))) => {
                // For compatibility, treat text as binary
                codec.extend(text.as_bytes());
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => {
                // Ping/pong are answered by tungstenite itself
            }
            Some(Err(WsError::ConnectionClosed)) => return Ok(None),
            Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }
}

async fn send_direct<S>(sink: &mut S, frame: &Frame) -> Result<(), TransportError>
where
    S: futures_util::Sink<Message, Error = WsError> + Unpin,
{
    let data = codec::encode(frame)?;
    sink.send(Message::Binary(data.to_vec()))
        .await
        .map_err(|_| TransportError::ConnectionClosed)?;
    let _ = sink.close().await;
    Ok(())
}
