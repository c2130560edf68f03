//! WebSocket Transport
//!
//! tokio-tungstenite implementation of the [`Transport`] port. Owns the
//! write half behind an async mutex and runs a read loop task that turns
//! frames into [`TransportEvent`]s, answers server pings, and sends
//! keep-alive pings on an interval.
//!
//! Reconnection policy deliberately lives with the caller: when the
//! connection drops this adapter emits `Closed` and stops; whoever owns the
//! client decides whether to connect again.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Transport, TransportError, TransportEvent};
use crate::infrastructure::config::ClientSettings;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket adapter for the [`Transport`] port.
pub struct WebSocketTransport {
    writer: tokio::sync::Mutex<WsSink>,
    cancel: CancellationToken,
}

impl WebSocketTransport {
    /// Connect to the venue and start the read loop.
    ///
    /// Returns the transport handle and the event channel the client's
    /// router consumes. `Opened` is the first event delivered.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] if the handshake fails.
    pub async fn connect(
        settings: &ClientSettings,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>), TransportError> {
        // Idempotent; a process may have installed a provider already.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let url = settings.endpoint_url();
        tracing::info!(endpoint = %settings.endpoint, "connecting");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (write, read) = ws_stream.split();

        let (event_tx, event_rx) = mpsc::channel(settings.event_capacity);
        let cancel = CancellationToken::new();
        let transport = Arc::new(Self {
            writer: tokio::sync::Mutex::new(write),
            cancel: cancel.clone(),
        });

        event_tx
            .send(TransportEvent::Opened)
            .await
            .map_err(|_| TransportError::Closed)?;

        tokio::spawn(read_loop(
            Arc::clone(&transport),
            read,
            event_tx,
            settings.ping_interval,
        ));

        Ok((transport, event_rx))
    }

    async fn send_frame(&self, message: Message) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.writer
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        tracing::trace!(bytes = text.len(), "sending frame");
        self.send_frame(Message::Text(text.into())).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        // Best effort: the peer may already be gone.
        let _ = writer.send(Message::Close(None)).await;
        let _ = writer.close().await;
        tracing::info!("transport closed");
        Ok(())
    }
}

/// Read loop: frames in, events out, pings on an interval.
async fn read_loop(
    transport: Arc<WebSocketTransport>,
    mut read: WsSource,
    events: mpsc::Sender<TransportEvent>,
    ping_interval: std::time::Duration,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + ping_interval,
        ping_interval,
    );

    loop {
        tokio::select! {
            () = transport.cancel.cancelled() => {
                tracing::debug!("read loop cancelled");
                return;
            }
            _ = ping.tick() => {
                if let Err(error) = transport.send_frame(Message::Ping(vec![].into())).await {
                    tracing::warn!(%error, "keep-alive ping failed");
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if events
                            .send(TransportEvent::Message(text.to_string()))
                            .await
                            .is_err()
                        {
                            tracing::debug!("event receiver dropped; stopping read loop");
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = transport.send_frame(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {
                        // This venue only speaks text frames.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        tracing::info!(reason = reason.as_deref(), "server sent close frame");
                        let _ = events.send(TransportEvent::Closed { reason }).await;
                        return;
                    }
                    Some(Err(error)) => {
                        tracing::warn!(%error, "websocket error");
                        let _ = events
                            .send(TransportEvent::Closed { reason: Some(error.to_string()) })
                            .await;
                        return;
                    }
                    None => {
                        tracing::info!("websocket stream ended");
                        let _ = events.send(TransportEvent::Closed { reason: None }).await;
                        return;
                    }
                }
            }
        }
    }
}
