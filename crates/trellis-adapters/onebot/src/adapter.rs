//! OneBot adapter: connection lifecycle, reconnect, event demux.
//!
//! One outbound WebSocket connection per bot. The run loop multiplexes:
//!
//! - outbound API frames from the [`WsCaller`] write channel;
//! - inbound frames, demultiplexed into API responses (routed by `echo`)
//!   and events (parsed and handed to the dispatch handler);
//! - keepalive pings every 30s with a 10s pong deadline;
//! - the shutdown signal.
//!
//! A dropped connection reconnects with a 5s delay, indefinitely, until the
//! adapter is stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at, sleep, sleep_until};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, trace, warn};

use trellis_core::{
    Adapter, AdapterError, AdapterResult, AdapterState, AdapterStatus, ApiError, ApiResult, Bot,
    BoxedEvent, Event, EventHandler, START_BUDGET_SECS,
};

use crate::bot::OneBotBot;
use crate::caller::WsCaller;
use crate::config::OneBotConfig;
use crate::events::{build_event, is_api_response, is_self_echo};

/// Delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Keepalive ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// How long a ping may go unanswered before the connection is declared dead.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

struct Runtime {
    caller: Arc<WsCaller>,
    bot: Arc<OneBotBot>,
    shutdown: watch::Sender<bool>,
}

struct Inner {
    bot_id: i64,
    config: OneBotConfig,
    handler: RwLock<Option<EventHandler>>,
    runtime: RwLock<Option<Runtime>>,
    state: RwLock<AdapterState>,
    last_error: RwLock<Option<String>>,
    message_count: AtomicU64,
    started_at: RwLock<Option<i64>>,
}

/// The OneBot v11 forward-WebSocket adapter for one bot.
pub struct OneBotAdapter {
    inner: Arc<Inner>,
}

impl OneBotAdapter {
    /// Registry constructor for the adapter manager.
    pub fn create(bot_id: i64, config: Value) -> AdapterResult<Arc<dyn Adapter>> {
        let config = OneBotConfig::from_value(&config)?;
        Ok(Arc::new(Self {
            inner: Arc::new(Inner {
                bot_id,
                config,
                handler: RwLock::new(None),
                runtime: RwLock::new(None),
                state: RwLock::new(AdapterState::Stopped),
                last_error: RwLock::new(None),
                message_count: AtomicU64::new(0),
                started_at: RwLock::new(None),
            }),
        }))
    }
}

async fn connect(config: &OneBotConfig) -> Result<WsStream, String> {
    let url = config.ws_url();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| err.to_string())?;
    if let Some(token) = &config.access_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| err.to_string())?;
        request.headers_mut().insert("Authorization", value);
    }

    let (stream, _response) = connect_async(request).await.map_err(|err| err.to_string())?;
    Ok(stream)
}

#[async_trait]
impl Adapter for OneBotAdapter {
    fn protocol_name(&self) -> &'static str {
        "onebot"
    }

    async fn start(&self) -> AdapterResult<()> {
        let inner = &self.inner;
        *inner.state.write() = AdapterState::Starting;

        let connected = tokio::time::timeout(
            Duration::from_secs(START_BUDGET_SECS),
            connect(&inner.config),
        )
        .await;

        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(reason)) => {
                *inner.last_error.write() = Some(reason.clone());
                *inner.state.write() = AdapterState::Stopped;
                return Err(AdapterError::Transport(
                    trellis_core::TransportError::ConnectionFailed {
                        url: inner.config.ws_url(),
                        reason,
                    },
                ));
            }
            Err(_) => {
                let err = AdapterError::StartTimeout(START_BUDGET_SECS);
                *inner.last_error.write() = Some(err.to_string());
                *inner.state.write() = AdapterState::Stopped;
                return Err(err);
            }
        };

        let (message_tx, message_rx) = mpsc::channel::<Vec<u8>>(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let caller = Arc::new(WsCaller::new(message_tx));
        let bot = Arc::new(OneBotBot::new(
            inner.bot_id,
            inner.bot_id.to_string(),
            Arc::clone(&caller),
        ));

        *inner.runtime.write() = Some(Runtime {
            caller: Arc::clone(&caller),
            bot,
            shutdown: shutdown_tx,
        });
        *inner.state.write() = AdapterState::Running;
        *inner.started_at.write() = Some(Utc::now().timestamp());
        *inner.last_error.write() = None;

        info!(bot_id = inner.bot_id, url = %inner.config.ws_url(), "OneBot adapter connected");

        tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            stream,
            message_rx,
            shutdown_rx,
        ));
        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.inner;
        *inner.state.write() = AdapterState::Stopping;

        if let Some(runtime) = inner.runtime.write().take() {
            let _ = runtime.shutdown.send(true);
            runtime.caller.on_disconnect();
        }

        *inner.state.write() = AdapterState::Stopped;
        info!(bot_id = inner.bot_id, "OneBot adapter stopped");
    }

    fn parse_event(&self, raw: &Value) -> Option<BoxedEvent> {
        if is_api_response(raw) {
            return None;
        }
        if is_self_echo(raw) && !self.inner.config.self_trigger {
            return None;
        }
        let event = build_event(raw)?;
        let bot = self
            .inner
            .runtime
            .read()
            .as_ref()
            .map(|r| Arc::clone(&r.bot) as Arc<dyn Bot>);
        Some(match bot {
            Some(bot) => event.with_bot(&bot),
            None => event,
        })
    }

    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        let bot = self
            .inner
            .runtime
            .read()
            .as_ref()
            .map(|r| Arc::clone(&r.bot));
        match bot {
            Some(bot) => bot.call_api(action, params).await,
            None => Err(ApiError::NotConnected),
        }
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.inner.handler.write() = Some(handler);
    }

    fn event_handler(&self) -> Option<EventHandler> {
        self.inner.handler.read().clone()
    }

    fn bot(&self) -> Option<Arc<dyn Bot>> {
        self.inner
            .runtime
            .read()
            .as_ref()
            .map(|r| Arc::clone(&r.bot) as Arc<dyn Bot>)
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            state: *self.inner.state.read(),
            last_error: self.inner.last_error.read().clone(),
            message_count: self.inner.message_count.load(Ordering::Relaxed),
            started_at: *self.inner.started_at.read(),
        }
    }
}

async fn run_loop(
    inner: Arc<Inner>,
    stream: WsStream,
    mut message_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut ws_tx, mut ws_rx) = stream.split();
    let mut ping_timer = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        // Resolves only while a ping is outstanding.
        let pong_watchdog = async {
            match pong_deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!(bot_id = inner.bot_id, "OneBot run loop shutting down");
                    let _ = ws_tx.close().await;
                    break;
                }
            }

            Some(data) = message_rx.recv() => {
                let frame = WsMessage::Text(String::from_utf8_lossy(&data).to_string().into());
                if let Err(err) = ws_tx.send(frame).await {
                    warn!(bot_id = inner.bot_id, error = %err, "Failed to send frame");
                }
            }

            _ = ping_timer.tick() => {
                trace!(bot_id = inner.bot_id, "Sending keepalive ping");
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_ok()
                    && pong_deadline.is_none()
                {
                    pong_deadline = Some(Instant::now() + PING_TIMEOUT);
                }
            }

            _ = pong_watchdog => {
                warn!(bot_id = inner.bot_id, "Ping unanswered, reconnecting");
                pong_deadline = None;
                match reconnect(&inner, &mut shutdown_rx).await {
                    Some((new_tx, new_rx)) => {
                        ws_tx = new_tx;
                        ws_rx = new_rx;
                    }
                    None => break,
                }
            }

            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&inner, text.as_bytes());
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        handle_frame(&inner, &data);
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_tx.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Ok(WsMessage::Frame(_))) | Some(Err(_)) | None => {
                        info!(bot_id = inner.bot_id, "Connection lost");
                        pong_deadline = None;
                        match reconnect(&inner, &mut shutdown_rx).await {
                            Some((new_tx, new_rx)) => {
                                ws_tx = new_tx;
                                ws_rx = new_rx;
                            }
                            None => break,
                        }
                    }
                }
            }
        }
    }

    // Loop exit is either a requested stop or an unrecoverable teardown;
    // either way the adapter is no longer running.
    if let Some(runtime) = inner.runtime.read().as_ref() {
        runtime.caller.on_disconnect();
    }
    *inner.state.write() = AdapterState::Stopped;
}

/// Re-establishes the connection with a fixed delay, forever, until stopped.
/// Returns `None` when shutdown was requested while waiting.
async fn reconnect(
    inner: &Arc<Inner>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<(WsSink, WsSource)> {
    // Pending calls on the dead socket can never complete.
    if let Some(runtime) = inner.runtime.read().as_ref() {
        runtime.caller.on_disconnect();
    }

    loop {
        if *shutdown_rx.borrow() {
            return None;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return None;
                }
            }
            _ = sleep(RECONNECT_DELAY) => {}
        }

        match connect(&inner.config).await {
            Ok(stream) => {
                info!(bot_id = inner.bot_id, "Reconnected");
                *inner.last_error.write() = None;
                return Some(stream.split());
            }
            Err(reason) => {
                warn!(bot_id = inner.bot_id, reason = %reason, "Reconnect failed");
                *inner.last_error.write() = Some(reason);
            }
        }
    }
}

/// Demultiplexes one inbound frame: API response or event.
fn handle_frame(inner: &Arc<Inner>, data: &[u8]) {
    let Ok(frame) = serde_json::from_slice::<Value>(data) else {
        warn!(bot_id = inner.bot_id, "Non-JSON frame dropped");
        return;
    };

    if is_api_response(&frame) {
        if let Some(runtime) = inner.runtime.read().as_ref() {
            runtime.caller.on_incoming_response(&frame);
        }
        return;
    }

    if is_self_echo(&frame) && !inner.config.self_trigger {
        trace!(bot_id = inner.bot_id, "Own message echo filtered");
        return;
    }

    let Some(event) = build_event(&frame) else {
        debug!(bot_id = inner.bot_id, "Unparseable event frame dropped");
        return;
    };

    let event = {
        let runtime = inner.runtime.read();
        match runtime.as_ref() {
            Some(runtime) => event.with_bot(&(Arc::clone(&runtime.bot) as Arc<dyn Bot>)),
            None => event,
        }
    };

    inner.message_count.fetch_add(1, Ordering::Relaxed);
    trace!(bot_id = inner.bot_id, event = %event.event_name(), "Event received");

    // Handler execution crosses onto the runtime's task pool; the reader
    // stays responsive.
    if let Some(handler) = inner.handler.read().clone() {
        tokio::spawn(handler(event));
    }
}
