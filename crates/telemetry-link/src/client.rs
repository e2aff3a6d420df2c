//! Reconnecting WebSocket client for controller links.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::dispatch::HandlerRegistry;
use crate::endpoint::Endpoint;
use crate::error::{LinkError, LinkResult};
use crate::tls;

/// Type alias for a connected WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Events emitted by the link client.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The connection is established.
    Open,
    /// An inbound frame arrived. `parsed` is set when the frame decoded as
    /// JSON; `decode_error` is set when it did not. Exactly one of the two is
    /// present.
    Message {
        raw: String,
        parsed: Option<Value>,
        decode_error: Option<String>,
    },
    /// A transport-level error occurred. Always followed by a close.
    Error(String),
    /// The connection closed.
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// A reconnect attempt was scheduled.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The reconnect policy is spent; the caller must connect explicitly.
    ReconnectExhausted,
}

/// Command sent to the session task.
enum Command {
    Frame(String),
    Close,
}

/// Shared client state, owned behind an Arc by the public handle and the
/// session/reconnect tasks.
struct LinkInner {
    config: LinkConfig,
    state: RwLock<LinkState>,
    endpoint: RwLock<Option<Endpoint>>,
    attempts: Mutex<u32>,
    sender: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    close_requested: AtomicBool,
    handlers: HandlerRegistry,
    event_tx: broadcast::Sender<LinkEvent>,
    session_task: StdMutex<Option<JoinHandle<()>>>,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
}

/// WebSocket client with automatic reconnection and typed message dispatch.
///
/// The client owns one outbound connection at a time. All socket I/O happens
/// on a background session task; `connect` and `send` return without blocking
/// beyond constant-time bookkeeping. Consumers observe the link through
/// [`subscribe`](Self::subscribe) and per-type handlers registered with
/// [`on`](Self::on).
///
/// # Example
///
/// ```ignore
/// let client = LinkClient::new(LinkConfig::default());
/// let mut events = client.subscribe();
///
/// client.on("robot_location", |payload| {
///     println!("robot moved: {payload}");
/// });
///
/// client.connect(Endpoint::parse("wss://sibl.online/ws")?).await?;
/// while let Ok(event) = events.recv().await {
///     // render into the diagnostic log
/// }
/// ```
pub struct LinkClient {
    inner: Arc<LinkInner>,
}

impl LinkClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LinkConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Arc::new(LinkInner {
                config,
                state: RwLock::new(LinkState::Disconnected),
                endpoint: RwLock::new(None),
                attempts: Mutex::new(0),
                sender: Mutex::new(None),
                close_requested: AtomicBool::new(false),
                handlers: HandlerRegistry::new(),
                event_tx,
                session_task: StdMutex::new(None),
                reconnect_task: StdMutex::new(None),
            }),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(LinkConfig::default())
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Get the current connection state.
    pub async fn state(&self) -> LinkState {
        *self.inner.state.read().await
    }

    /// Check if the link is open.
    pub async fn is_open(&self) -> bool {
        *self.inner.state.read().await == LinkState::Open
    }

    /// Register a handler for a message type. The last registration for a
    /// given type wins. The handler runs on the session task and must not
    /// block.
    pub fn on<F>(&self, msg_type: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner.handlers.register(msg_type, handler);
    }

    /// Register the fallback handler for message types without a registered
    /// handler of their own.
    pub fn on_unhandled<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner.handlers.register_fallback(handler);
    }

    /// Connect to the controller at `endpoint`.
    ///
    /// Fails fast with [`LinkError::AlreadyConnecting`] unless the client is
    /// disconnected. The transport is opened on a background task; this call
    /// returns immediately. A pending scheduled reconnect is cancelled in
    /// favor of this attempt.
    pub async fn connect(&self, endpoint: Endpoint) -> LinkResult<()> {
        self.inner.abort_reconnect_timer();

        {
            let mut state = self.inner.state.write().await;
            if *state != LinkState::Disconnected {
                return Err(LinkError::AlreadyConnecting);
            }
            *state = LinkState::Connecting;
        }

        self.inner.close_requested.store(false, Ordering::SeqCst);
        *self.inner.endpoint.write().await = Some(endpoint);
        LinkInner::spawn_session(self.inner.clone());
        Ok(())
    }

    /// Disconnect from the controller.
    ///
    /// Cancels any pending scheduled reconnect and requests transport
    /// closure. Idempotent: calling while already disconnected is a no-op and
    /// produces no additional events. An explicit disconnect never triggers a
    /// reconnect.
    pub async fn disconnect(&self) {
        self.inner.abort_reconnect_timer();

        let mut state = self.inner.state.write().await;
        match *state {
            LinkState::Open => {
                *state = LinkState::Closing;
                drop(state);
                self.inner.close_requested.store(true, Ordering::SeqCst);
                let sender = self.inner.sender.lock().await;
                if let Some(tx) = sender.as_ref() {
                    let _ = tx.send(Command::Close);
                }
                info!("disconnect requested");
            }
            LinkState::Connecting => {
                *state = LinkState::Disconnected;
                drop(state);
                self.inner.close_requested.store(true, Ordering::SeqCst);
                // The abort lands at the task's next await point; force the
                // state back afterwards in case it won the race.
                self.inner.abort_session_task();
                *self.inner.sender.lock().await = None;
                *self.inner.state.write().await = LinkState::Disconnected;
                debug!("connect attempt aborted");
            }
            LinkState::Closing | LinkState::Disconnected => {
                debug!("already disconnected");
            }
        }
    }

    /// Serialize `payload` and transmit it.
    ///
    /// Transmits only while the link is open; otherwise fails with
    /// [`LinkError::NotConnected`] without queueing or retrying. Each call
    /// transmits at most one frame.
    pub async fn send(&self, payload: &Value) -> LinkResult<()> {
        let text = serde_json::to_string(payload)?;
        self.send_text(text).await
    }

    /// Transmit a hand-crafted frame without re-serializing it.
    ///
    /// Same gating as [`send`](Self::send); the text is passed through as the
    /// frame body.
    pub async fn send_raw(&self, text: &str) -> LinkResult<()> {
        self.send_text(text.to_string()).await
    }

    async fn send_text(&self, text: String) -> LinkResult<()> {
        if *self.inner.state.read().await != LinkState::Open {
            return Err(LinkError::NotConnected);
        }

        let sender = self.inner.sender.lock().await;
        let tx = sender.as_ref().ok_or(LinkError::NotConnected)?;
        debug!(payload = %text, "sent");
        tx.send(Command::Frame(text))
            .map_err(|_| LinkError::NotConnected)?;
        Ok(())
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        // Tear down background tasks so no timer or socket outlives the
        // client handle.
        self.inner.abort_reconnect_timer();
        self.inner.abort_session_task();
    }
}

impl std::fmt::Debug for LinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkClient").finish_non_exhaustive()
    }
}

impl LinkInner {
    fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }

    fn abort_reconnect_timer(&self) {
        if let Some(handle) = self
            .reconnect_task
            .lock()
            .expect("reconnect task lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    fn abort_session_task(&self) {
        if let Some(handle) = self
            .session_task
            .lock()
            .expect("session task lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    /// Spawn the session task for the endpoint stored on the client. The
    /// caller must already have moved the state to `Connecting`.
    fn spawn_session(inner: Arc<LinkInner>) {
        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            task_inner.run_session().await;
        });
        *inner
            .session_task
            .lock()
            .expect("session task lock poisoned") = Some(handle);
    }

    async fn run_session(self: Arc<Self>) {
        // A disconnect issued between scheduling and startup wins.
        if *self.state.read().await != LinkState::Connecting {
            return;
        }

        let Some(endpoint) = self.endpoint.read().await.clone() else {
            *self.state.write().await = LinkState::Disconnected;
            return;
        };

        info!(endpoint = %endpoint, "connecting");

        let stream = match Self::establish(&endpoint).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "connect failed");
                *self.state.write().await = LinkState::Disconnected;
                self.emit(LinkEvent::Error(format!("connect failed: {e}")));
                self.emit(LinkEvent::Closed {
                    code: None,
                    reason: None,
                });
                self.evaluate_reconnect().await;
                return;
            }
        };

        {
            *self.state.write().await = LinkState::Open;
            *self.attempts.lock().await = 0;
        }
        info!(endpoint = %endpoint, "link open");
        self.emit(LinkEvent::Open);

        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        *self.sender.lock().await = Some(tx);

        let (mut write, mut read) = stream.split();
        let mut user_closed = false;
        let mut close_code: Option<u16> = None;
        let mut close_reason: Option<String> = None;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Frame(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            self.emit(LinkEvent::Error(format!("send failed: {e}")));
                            close_code = Some(1006);
                            break;
                        }
                    }
                    Some(Command::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        user_closed = true;
                        close_code = Some(1000);
                        break;
                    }
                },

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Out of protocol: the controller speaks text frames.
                        debug!(len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Pong replies are handled by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            close_code = Some(u16::from(frame.code));
                            if !frame.reason.is_empty() {
                                close_reason = Some(frame.reason.to_string());
                            }
                        }
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "transport error");
                        self.emit(LinkEvent::Error(e.to_string()));
                        close_code = Some(1006);
                        break;
                    }
                    None => {
                        close_code = Some(1006);
                        break;
                    }
                },
            }
        }

        *self.sender.lock().await = None;
        *self.state.write().await = LinkState::Disconnected;
        info!(code = ?close_code, user_closed, "link closed");
        self.emit(LinkEvent::Closed {
            code: close_code,
            reason: close_reason,
        });

        if !user_closed {
            self.evaluate_reconnect().await;
        }
    }

    /// Open the transport for an endpoint, honoring the TLS bypass flag.
    async fn establish(endpoint: &Endpoint) -> LinkResult<WsStream> {
        let request = endpoint.as_str().into_client_request()?;

        let (stream, _response) = if endpoint.is_secure() && endpoint.accepts_invalid_certs() {
            warn!(endpoint = %endpoint, "certificate verification disabled");
            let connector = tls::insecure_connector()?;
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, Some(connector))
                .await?
        } else {
            tokio_tungstenite::connect_async(request).await?
        };

        Ok(stream)
    }

    /// Decode an inbound frame and route it.
    ///
    /// Malformed frames become a decode-error event; they never panic the
    /// session and never reach a handler.
    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                self.emit(LinkEvent::Message {
                    raw: text.to_string(),
                    parsed: Some(value.clone()),
                    decode_error: None,
                });

                let msg_type = value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                if !self.handlers.dispatch(&msg_type, value) {
                    debug!(msg_type = %msg_type, "no handler registered");
                }
            }
            Err(e) => {
                warn!(error = %e, raw = %text, "undecodable frame");
                self.emit(LinkEvent::Message {
                    raw: text.to_string(),
                    parsed: None,
                    decode_error: Some(e.to_string()),
                });
            }
        }
    }

    /// Decide whether to schedule another connect after an unexpected close.
    ///
    /// Runs only for closes the caller did not request. Exhaustion is checked
    /// before the counter is bumped, so a spent policy emits
    /// `ReconnectExhausted` exactly once per terminal sequence.
    async fn evaluate_reconnect(self: &Arc<Self>) {
        if self.close_requested.load(Ordering::SeqCst) {
            debug!("close requested; skipping reconnect evaluation");
            return;
        }

        let policy = &self.config.reconnect;

        let attempt = {
            let mut attempts = self.attempts.lock().await;
            if *attempts >= policy.max_attempts {
                warn!(max_attempts = policy.max_attempts, "reconnect attempts exhausted");
                self.emit(LinkEvent::ReconnectExhausted);
                return;
            }
            *attempts += 1;
            *attempts
        };

        let delay = policy.delay_for_attempt(attempt);
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.emit(LinkEvent::ReconnectScheduled { attempt, delay });

        let timer_inner = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut state = timer_inner.state.write().await;
                if *state != LinkState::Disconnected {
                    return;
                }
                *state = LinkState::Connecting;
            }
            LinkInner::spawn_session(timer_inner.clone());
        });

        let mut slot = self
            .reconnect_task
            .lock()
            .expect("reconnect task lock poisoned");
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }
}
