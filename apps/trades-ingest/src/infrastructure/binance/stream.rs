//! Binance Combined Stream Client
//!
//! One WebSocket connection to the combined-stream endpoint carries every
//! symbol's `aggTrade` stream. A single task owns the socket; handles talk to
//! it over a command channel.
//!
//! # Stream URL
//!
//! - Production: `wss://fstream.binance.com/stream`
//!
//! # Lifecycle
//!
//! ```text
//! connect() ──handshake──► task ──► session ──disconnect──► backoff ──► session ...
//!                                      │                                  │
//!                                      └──────── close() / cancel ────────┘──► exit
//! ```
//!
//! Every registered stream is re-subscribed after a reconnect. Commands
//! received while disconnected, including mid-handshake, only update the
//! route table. Each handshake is bounded by `handshake_timeout`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::messages::{
    InboundFrame, StreamAggTrade, StreamEnvelope, StreamMethod, StreamRequest, StreamResponse,
    agg_trade_stream, decode_frame,
};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::metrics::record_malformed_message;
use crate::application::ports::{
    MalformedMessage, MessageHandler, StreamConnection, StreamError, StreamSubscription,
    TradeStreamSource,
};
use crate::infrastructure::metrics;

/// Default combined-stream endpoint for USD-M futures.
pub const DEFAULT_STREAM_URL: &str = "wss://fstream.binance.com/stream";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Configuration
// =============================================================================

/// Stream client settings.
#[derive(Debug, Clone)]
pub struct BinanceStreamConfig {
    /// Combined-stream WebSocket URL.
    pub url: String,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// How long subscribe/unsubscribe wait for the connection task.
    pub command_timeout: Duration,
    /// How long `close()` waits for the connection task to exit.
    pub close_timeout: Duration,
    /// Upper bound on one WebSocket handshake.
    pub handshake_timeout: Duration,
}

impl Default for BinanceStreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            reconnect: ReconnectConfig::default(),
            command_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Stream Status
// =============================================================================

/// Connection counters shared with the health server.
#[derive(Debug, Default)]
pub struct StreamStatus {
    connected: AtomicBool,
    reconnects: AtomicU64,
    messages: AtomicU64,
    subscriptions: AtomicUsize,
    last_message_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
}

/// Point-in-time copy of [`StreamStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatusSnapshot {
    /// Whether the socket is open.
    pub connected: bool,
    /// Reconnection attempts since startup.
    pub reconnects: u64,
    /// Data frames routed since startup.
    pub messages: u64,
    /// Registered streams.
    pub subscriptions: usize,
    /// Arrival time of the last data frame.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Last disconnect reason.
    pub last_error: Option<String>,
}

impl StreamStatus {
    /// Fresh, disconnected status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        metrics::set_stream_connected(connected);
        if connected {
            *self.last_error.write() = None;
        }
    }

    fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::record_reconnect();
    }

    fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.write() = Some(Utc::now());
    }

    fn set_subscriptions(&self, count: usize) {
        self.subscriptions.store(count, Ordering::Relaxed);
    }

    /// Copy the current counters.
    #[must_use]
    pub fn snapshot(&self) -> StreamStatusSnapshot {
        StreamStatusSnapshot {
            connected: self.is_connected(),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            last_message_at: *self.last_message_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

// =============================================================================
// Source
// =============================================================================

/// Opens combined-stream connections.
#[derive(Debug, Clone)]
pub struct BinanceStreamSource {
    config: BinanceStreamConfig,
    status: Arc<StreamStatus>,
}

impl BinanceStreamSource {
    /// Create a source.
    #[must_use]
    pub fn new(config: BinanceStreamConfig) -> Self {
        Self {
            config,
            status: Arc::new(StreamStatus::new()),
        }
    }

    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }
}

#[async_trait]
impl TradeStreamSource for BinanceStreamSource {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        tracing::info!(url = %self.config.url, "Connecting to Binance stream");

        let socket = handshake(&self.config.url, self.config.handshake_timeout)
            .await
            .map_err(StreamError::ConnectionFailed)?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let task = ConnectionTask {
            config: self.config.clone(),
            status: Arc::clone(&self.status),
            cancel: cancel.clone(),
            commands: command_rx,
            routes: HashMap::new(),
            pending: HashMap::new(),
            next_request_id: 1,
        };
        let handle = tokio::spawn(task.run(socket));

        Ok(Box::new(BinanceConnection {
            commands: command_tx,
            cancel,
            task: parking_lot::Mutex::new(Some(handle)),
            command_timeout: self.config.command_timeout,
            close_timeout: self.config.close_timeout,
        }))
    }
}

/// Open a socket, giving up after `limit`.
async fn handshake(url: &str, limit: Duration) -> Result<WsStream, String> {
    match tokio::time::timeout(limit, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("handshake timed out after {}ms", limit.as_millis())),
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

enum Command {
    Subscribe {
        stream: String,
        handler: MessageHandler,
        ack: oneshot::Sender<Result<(), StreamError>>,
    },
    Unsubscribe {
        stream: String,
        ack: oneshot::Sender<Result<(), StreamError>>,
    },
}

async fn send_command(
    commands: &mpsc::Sender<Command>,
    timeout: Duration,
    symbol: &str,
    build: impl FnOnce(oneshot::Sender<Result<(), StreamError>>) -> Command,
) -> Result<(), StreamError> {
    let (ack_tx, ack_rx) = oneshot::channel();
    commands
        .send(build(ack_tx))
        .await
        .map_err(|_| StreamError::Closed)?;

    match tokio::time::timeout(timeout, ack_rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(StreamError::Closed),
        Err(_) => Err(StreamError::Timeout(format!(
            "connection task did not answer for {symbol}"
        ))),
    }
}

/// Handle to a running connection task.
pub struct BinanceConnection {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    command_timeout: Duration,
    close_timeout: Duration,
}

#[async_trait]
impl StreamConnection for BinanceConnection {
    async fn subscribe(
        &self,
        symbol: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn StreamSubscription>, StreamError> {
        let stream = agg_trade_stream(symbol);
        let command_stream = stream.clone();
        send_command(&self.commands, self.command_timeout, symbol, move |ack| {
            Command::Subscribe {
                stream: command_stream,
                handler,
                ack,
            }
        })
        .await?;

        Ok(Box::new(BinanceSubscription {
            symbol: symbol.to_string(),
            stream,
            commands: self.commands.clone(),
            command_timeout: self.command_timeout,
            active: true,
        }))
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.cancel.cancel();

        let Some(handle) = self.task.lock().take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.close_timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StreamError::ConnectionFailed(format!(
                "connection task failed: {e}"
            ))),
            Err(_) => Err(StreamError::Timeout(
                "connection task did not exit".to_string(),
            )),
        }
    }
}

impl Drop for BinanceConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One symbol's `aggTrade` subscription.
pub struct BinanceSubscription {
    symbol: String,
    stream: String,
    commands: mpsc::Sender<Command>,
    command_timeout: Duration,
    active: bool,
}

#[async_trait]
impl StreamSubscription for BinanceSubscription {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn unsubscribe(&mut self) -> Result<(), StreamError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let stream = self.stream.clone();
        send_command(&self.commands, self.command_timeout, &self.symbol, move |ack| {
            Command::Unsubscribe { stream, ack }
        })
        .await
    }
}

// =============================================================================
// Connection Task
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("request encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed by server")]
    Closed,
}

/// How a session ended without error.
enum SessionEnd {
    Cancelled,
    HandlesDropped,
}

/// Outcome of one reconnect attempt.
enum Reconnect {
    Connected(WsStream),
    Failed(String),
    Stop,
}

struct ConnectionTask {
    config: BinanceStreamConfig,
    status: Arc<StreamStatus>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<Command>,
    routes: HashMap<String, MessageHandler>,
    pending: HashMap<u64, (StreamMethod, Vec<String>)>,
    next_request_id: u64,
}

impl ConnectionTask {
    async fn run(mut self, first: WsStream) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let mut socket = Some(first);

        loop {
            let ws = match socket.take() {
                Some(ws) => ws,
                None => match self.reconnect().await {
                    Reconnect::Connected(ws) => {
                        tracing::info!(url = %self.config.url, "Reconnected to Binance stream");
                        ws
                    }
                    Reconnect::Failed(e) => {
                        tracing::warn!(error = %e, "Binance stream reconnect failed");
                        self.status.set_error(e);
                        if self.wait_before_reconnect(&mut policy).await {
                            continue;
                        }
                        break;
                    }
                    Reconnect::Stop => break,
                },
            };

            policy.reset();
            self.status.set_connected(true);
            let outcome = self.run_session(ws).await;
            self.status.set_connected(false);
            self.pending.clear();

            match outcome {
                Ok(SessionEnd::Cancelled) => {
                    tracing::info!("Binance stream closed");
                    break;
                }
                Ok(SessionEnd::HandlesDropped) => {
                    tracing::info!("All stream handles dropped, closing connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Binance stream disconnected");
                    self.status.set_error(e.to_string());
                }
            }

            if !self.wait_before_reconnect(&mut policy).await {
                break;
            }
        }
    }

    /// One bounded handshake attempt that keeps serving commands and
    /// stops on cancellation.
    async fn reconnect(&mut self) -> Reconnect {
        let url = self.config.url.clone();
        let attempt = handshake(&url, self.config.handshake_timeout);
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Reconnect::Stop,
                result = &mut attempt => return match result {
                    Ok(ws) => Reconnect::Connected(ws),
                    Err(e) => Reconnect::Failed(e),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.apply_offline(command),
                    None => return Reconnect::Stop,
                },
            }
        }
    }

    /// Sleep per the reconnect policy while still serving commands.
    ///
    /// Returns `false` if the task should exit instead of reconnecting.
    async fn wait_before_reconnect(&mut self, policy: &mut ReconnectPolicy) -> bool {
        let Some(delay) = policy.next_delay() else {
            tracing::error!("Reconnect attempts exhausted");
            return false;
        };

        self.status.record_reconnect();
        tracing::info!(
            attempt = policy.attempt_count(),
            delay_ms = delay.as_millis(),
            "Reconnecting to Binance stream"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply_offline(command),
                    None => return false,
                },
            }
        }
    }

    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                stream,
                handler,
                ack,
            } => {
                self.routes.insert(stream, handler);
                let _ = ack.send(Ok(()));
            }
            Command::Unsubscribe { stream, ack } => {
                self.routes.remove(&stream);
                let _ = ack.send(Ok(()));
            }
        }
        self.status.set_subscriptions(self.routes.len());
    }

    async fn run_session(&mut self, ws: WsStream) -> Result<SessionEnd, SessionError> {
        let (mut write, mut read) = ws.split();

        if !self.routes.is_empty() {
            let streams: Vec<String> = self.routes.keys().cloned().collect();
            tracing::info!(streams = streams.len(), "Restoring stream subscriptions");
            self.send_request(&mut write, StreamMethod::Subscribe, streams)
                .await?;
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::HandlesDropped);
                    };
                    self.apply_online(command, &mut write).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.route_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(SessionError::Closed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(SessionError::Closed),
                    }
                }
            }
        }
    }

    async fn apply_online<W>(&mut self, command: Command, write: &mut W) -> Result<(), SessionError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        match command {
            Command::Subscribe {
                stream,
                handler,
                ack,
            } => {
                self.routes.insert(stream.clone(), handler);
                self.status.set_subscriptions(self.routes.len());
                let sent = self
                    .send_request(write, StreamMethod::Subscribe, vec![stream])
                    .await;
                // Registered either way; a failed send is restored on reconnect.
                let _ = ack.send(Ok(()));
                sent
            }
            Command::Unsubscribe { stream, ack } => {
                self.routes.remove(&stream);
                self.status.set_subscriptions(self.routes.len());
                let sent = self
                    .send_request(write, StreamMethod::Unsubscribe, vec![stream])
                    .await;
                let _ = ack.send(Ok(()));
                sent
            }
        }
    }

    async fn send_request<W>(
        &mut self,
        write: &mut W,
        method: StreamMethod,
        streams: Vec<String>,
    ) -> Result<(), SessionError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let request = match method {
            StreamMethod::Subscribe => StreamRequest::subscribe(streams, id),
            StreamMethod::Unsubscribe => StreamRequest::unsubscribe(streams, id),
        };
        let json = request.to_json()?;

        tracing::debug!(id, method = ?method, streams = ?request.params, "Sending stream request");
        self.pending.insert(id, (method, request.params));
        write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    fn route_text(&mut self, text: &str) {
        match decode_frame(text) {
            Ok(InboundFrame::Data(envelope)) => self.route_data(envelope),
            Ok(InboundFrame::Response(response)) => self.on_response(&response),
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable stream frame");
                record_malformed_message();
            }
        }
    }

    fn route_data(&self, envelope: StreamEnvelope) {
        let Some(handler) = self.routes.get(&envelope.stream) else {
            tracing::trace!(stream = %envelope.stream, "Frame for unregistered stream");
            return;
        };
        self.status.record_message();

        let StreamEnvelope { stream, data } = envelope;
        let result = serde_json::from_value::<StreamAggTrade>(data)
            .map_err(|e| e.to_string())
            .and_then(|event| event.to_inbound())
            .map_err(|reason| MalformedMessage {
                stream: stream.clone(),
                reason,
            });
        handler(result);
    }

    fn on_response(&mut self, response: &StreamResponse) {
        let request = response.id.and_then(|id| self.pending.remove(&id));

        let Some(reason) = response.rejection() else {
            tracing::debug!(id = ?response.id, "Stream request acknowledged");
            return;
        };

        match request {
            Some((StreamMethod::Subscribe, streams)) => {
                tracing::error!(streams = ?streams, reason = %reason, "Subscription rejected");
                for stream in &streams {
                    self.routes.remove(stream);
                }
                self.status.set_subscriptions(self.routes.len());
            }
            Some((StreamMethod::Unsubscribe, streams)) => {
                tracing::warn!(streams = ?streams, reason = %reason, "Unsubscribe rejected");
            }
            None => {
                tracing::warn!(id = ?response.id, reason = %reason, "Stream request rejected");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
