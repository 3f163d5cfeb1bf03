//! Streaming feed client
//!
//! Owns the persistent quote-provider connection: reconnects with
//! exponential backoff, answers server pings, correlates request/response
//! pairs by `req_id`, and batches tick subscriptions so bursts of new
//! instruments do not flood the provider.
//!
//! The public [`FeedClient`] is a cheap cloneable handle; the socket itself
//! lives in a background task that is the single writer of all connection
//! state (pending requests, backoff, subscription ids), so the exactly-once
//! resolution invariant never needs a lock.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use super::messages::{
    ActiveSymbolsRequest, ForgetRequest, HistoryRequest, PingRequest, PongReply, ServerMessage,
    SubscribeRequest,
};
use crate::common::errors::{MonitorError, Result};
use crate::common::types::{Candle, FeedEvent, Instrument, Tick};
use crate::config::types::FeedConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsError = tokio_tungstenite::tungstenite::Error;

/// Safety timeout for the one-shot price probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// How often stale pending requests are swept
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Command channel depth between handles and the feed task
const COMMAND_BUFFER: usize = 256;

/// Exponential reconnect backoff: 1s doubling to a 30s ceiling, reset to 1s
/// after any successful connection.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_millis(1000);
    const CEILING: Duration = Duration::from_millis(30_000);

    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Delay to wait before the next attempt; doubles the stored delay
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(delay * 2, Self::CEILING);
        delay
    }

    pub fn reset(&mut self) {
        self.current = Self::INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands processed by the feed task
enum Command {
    /// Correlated request: gets a `req_id` and a pending-map entry
    Request {
        payload: Value,
        reply: oneshot::Sender<Result<ServerMessage>>,
    },
    /// Fire-and-forget release of a live subscription
    ForgetId(String),
}

/// Commands processed by the subscription pump
enum SubCommand {
    Subscribe(String),
    Unsubscribe(String),
}

struct Pending {
    reply: oneshot::Sender<Result<ServerMessage>>,
    issued_at: Instant,
}

/// Handle to the background feed task. Clone freely.
#[derive(Clone)]
pub struct FeedClient {
    commands: mpsc::Sender<Command>,
    subs: mpsc::Sender<SubCommand>,
    connected: watch::Receiver<bool>,
}

impl FeedClient {
    /// Spawn the feed task and subscription pump, returning the handle.
    ///
    /// Ticks and connection transitions are delivered on `events`.
    pub fn spawn(config: FeedConfig, events: mpsc::Sender<FeedEvent>) -> Result<Self> {
        let mut url = Url::parse(&config.endpoint)
            .map_err(|e| MonitorError::Configuration(format!("bad feed endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("app_id", &config.app_id);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (sub_tx, sub_rx) = mpsc::channel(COMMAND_BUFFER);
        let (connected_tx, connected_rx) = watch::channel(false);

        let task = FeedTask {
            url: url.to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            keepalive: Duration::from_secs(config.keepalive_interval_seconds),
            commands: command_rx,
            events,
            connected_tx,
            pending: HashMap::new(),
            next_req_id: 0,
            backoff: Backoff::new(),
        };
        tokio::spawn(task.run());

        let pump = SubscriptionPump {
            batch_size: config.subscribe_batch_size.max(1),
            batch_delay: Duration::from_millis(config.subscribe_batch_delay_ms),
            jitter_ms: config.subscribe_jitter_ms,
            commands: command_tx.clone(),
            inbox: sub_rx,
            connected: connected_rx.clone(),
            active: HashMap::new(),
            queue: VecDeque::new(),
        };
        tokio::spawn(pump.run());

        Ok(Self {
            commands: command_tx,
            subs: sub_tx,
            connected: connected_rx,
        })
    }

    /// Whether the streaming connection is currently up
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolve once the connection is established.
    ///
    /// One-shot completion signal; there is no polling loop behind this.
    pub async fn wait_until_connected(&self) -> Result<()> {
        let mut connected = self.connected.clone();
        while !*connected.borrow_and_update() {
            connected
                .changed()
                .await
                .map_err(|_| MonitorError::ConnectionLost)?;
        }
        Ok(())
    }

    /// Send a correlated request and await its response.
    ///
    /// Resolves exactly once: with the matching response, a timeout error
    /// after the configured deadline, `NotConnected` when sent while the
    /// connection is down, or `ConnectionLost` if the connection drops while
    /// the request is in flight.
    pub async fn request<T: Serialize>(&self, request: T) -> Result<ServerMessage> {
        let payload = serde_json::to_value(request)?;
        raw_request(&self.commands, payload).await
    }

    /// Queue a symbol for live tick subscription. Re-subscribing a live
    /// symbol is a no-op.
    pub async fn subscribe_ticks(&self, symbol: &str) {
        let _ = self
            .subs
            .send(SubCommand::Subscribe(symbol.to_string()))
            .await;
    }

    /// Best-effort unsubscribe; any failure is ignored.
    pub async fn unsubscribe_ticks(&self, symbol: &str) {
        let _ = self
            .subs
            .send(SubCommand::Unsubscribe(symbol.to_string()))
            .await;
    }

    /// Fetch historical candles for a symbol. Returns an empty vector on any
    /// error so backfilling can never wedge the caller.
    pub async fn request_history(&self, symbol: &str, count: u32, granularity: u32) -> Vec<Candle> {
        match self.request(HistoryRequest::new(symbol, count, granularity)).await {
            Ok(message) => {
                if let Some(error) = message.error {
                    warn!(symbol, code = %error.code, "history request rejected: {}", error.message);
                    return Vec::new();
                }
                message
                    .candles
                    .unwrap_or_default()
                    .into_iter()
                    .map(Candle::from)
                    .collect()
            }
            Err(e) => {
                warn!(symbol, "history request failed: {e}");
                Vec::new()
            }
        }
    }

    /// Discover the tradable instrument universe
    pub async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        let message = self.request(ActiveSymbolsRequest::default()).await?;
        if let Some(error) = message.error {
            return Err(MonitorError::Api {
                code: error.code,
                message: error.message,
            });
        }
        Ok(message
            .active_symbols
            .unwrap_or_default()
            .into_iter()
            .map(Instrument::from)
            .collect())
    }

    /// One-shot price probe: subscribe, take the first quote, release the
    /// subscription on every exit path. Guarded by a 10-second safety
    /// timeout; the underlying oneshot guarantees the result is delivered at
    /// most once.
    pub async fn latest_price(&self, symbol: &str) -> Result<f64> {
        let response = timeout(PROBE_TIMEOUT, self.request(SubscribeRequest::new(symbol)))
            .await
            .map_err(|_| MonitorError::RequestTimeout)??;

        // Release before inspecting: a rejected probe carries no
        // subscription, an accepted one must always be forgotten.
        if let Some(sub) = &response.subscription {
            let _ = self.commands.send(Command::ForgetId(sub.id.clone())).await;
        }

        if let Some(error) = response.error {
            return Err(MonitorError::Api {
                code: error.code,
                message: error.message,
            });
        }

        response
            .tick
            .map(|tick| tick.quote)
            .ok_or_else(|| MonitorError::MalformedMessage("price probe response had no tick".into()))
    }
}

async fn raw_request(
    commands: &mpsc::Sender<Command>,
    payload: Value,
) -> Result<ServerMessage> {
    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .send(Command::Request {
            payload,
            reply: reply_tx,
        })
        .await
        .map_err(|_| MonitorError::ChannelSend("feed task is gone".into()))?;
    reply_rx.await.map_err(|_| MonitorError::ConnectionLost)?
}

// ============================================================================
// Feed task: owns the socket and all correlation state
// ============================================================================

struct FeedTask {
    url: String,
    request_timeout: Duration,
    keepalive: Duration,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<FeedEvent>,
    connected_tx: watch::Sender<bool>,
    pending: HashMap<u64, Pending>,
    next_req_id: u64,
    backoff: Backoff,
}

impl FeedTask {
    async fn run(mut self) {
        loop {
            match connect_async(&self.url).await {
                Ok((stream, _response)) => {
                    info!("feed connected");
                    self.backoff.reset();
                    let _ = self.connected_tx.send(true);
                    let _ = self.events.send(FeedEvent::Connected).await;

                    let reason = self.drive(stream).await;
                    warn!("feed disconnected: {}", reason.as_deref().unwrap_or("stream ended"));

                    let _ = self.connected_tx.send(false);
                    self.fail_all_pending();
                    let _ = self.events.send(FeedEvent::Disconnected { reason }).await;
                }
                Err(e) => {
                    warn!("feed connection attempt failed: {e}");
                }
            }

            let delay = self.backoff.next_delay();
            info!("reconnecting in {}ms", delay.as_millis());
            if !self.wait_disconnected(delay).await {
                return;
            }
        }
    }

    /// Run one established connection until it drops. Returns the close
    /// reason, if one was observed.
    async fn drive(&mut self, stream: WsStream) -> Option<String> {
        enum DriveEvent {
            Frame(Option<std::result::Result<Message, WsError>>),
            Command(Option<Command>),
            Keepalive,
            Sweep,
        }

        let (mut sink, mut source) = stream.split();

        let mut keepalive = interval_at(Instant::now() + self.keepalive, self.keepalive);
        let mut sweep = interval_at(
            Instant::now() + PENDING_SWEEP_INTERVAL,
            PENDING_SWEEP_INTERVAL,
        );

        loop {
            let event = tokio::select! {
                frame = source.next() => DriveEvent::Frame(frame),
                command = self.commands.recv() => DriveEvent::Command(command),
                _ = keepalive.tick() => DriveEvent::Keepalive,
                _ = sweep.tick() => DriveEvent::Sweep,
            };

            match event {
                DriveEvent::Frame(Some(Ok(Message::Text(text)))) => {
                    if let Err(reason) = self.handle_text(&mut sink, &text).await {
                        return Some(reason);
                    }
                }
                DriveEvent::Frame(Some(Ok(Message::Ping(data)))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        return Some("pong send failed".into());
                    }
                }
                DriveEvent::Frame(Some(Ok(Message::Close(frame)))) => {
                    return frame.map(|f| f.reason.to_string());
                }
                DriveEvent::Frame(Some(Ok(_))) => {}
                DriveEvent::Frame(Some(Err(e))) => return Some(e.to_string()),
                DriveEvent::Frame(None) => return None,
                DriveEvent::Command(Some(command)) => {
                    if let Err(reason) = self.handle_command(&mut sink, command).await {
                        return Some(reason);
                    }
                }
                DriveEvent::Command(None) => return Some("all client handles dropped".into()),
                DriveEvent::Keepalive => {
                    let ping = serde_json::to_string(&PingRequest::default())
                        .expect("ping serializes");
                    if sink.send(Message::Text(ping)).await.is_err() {
                        return Some("keepalive send failed".into());
                    }
                }
                DriveEvent::Sweep => self.sweep_pending(),
            }
        }
    }

    async fn handle_text(&mut self, sink: &mut WsSink, text: &str) -> std::result::Result<(), String> {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                // Malformed frames are logged and dropped; the connection
                // stays open.
                warn!("malformed feed message ({e}): {}", truncate(text, 200));
                return Ok(());
            }
        };

        if message.is_ping() {
            let pong = serde_json::to_string(&PongReply::default()).expect("pong serializes");
            return sink
                .send(Message::Text(pong))
                .await
                .map_err(|e| e.to_string());
        }

        if let Some(req_id) = message.req_id() {
            if let Some(entry) = self.pending.remove(&req_id) {
                if let Err(unclaimed) = entry.reply.send(Ok(message)) {
                    // The caller gave up (e.g. probe safety timeout). If the
                    // late response opened a subscription, release it so the
                    // provider side does not leak.
                    if let Ok(response) = unclaimed {
                        if let Some(sub) = response.subscription {
                            debug!("releasing orphaned subscription {}", sub.id);
                            let forget = serde_json::to_string(&ForgetRequest::new(&sub.id))
                                .expect("forget serializes");
                            sink.send(Message::Text(forget))
                                .await
                                .map_err(|e| e.to_string())?;
                        }
                    }
                }
                return Ok(());
            }
        }

        if let Some(tick_data) = message.tick {
            let tick = Tick {
                symbol: tick_data.symbol,
                epoch: tick_data.epoch,
                quote: tick_data.quote,
            };
            let _ = self.events.send(FeedEvent::Tick(tick)).await;
            return Ok(());
        }

        if let Some(error) = message.error {
            warn!("unsolicited feed error {}: {}", error.code, error.message);
        }

        Ok(())
    }

    async fn handle_command(
        &mut self,
        sink: &mut WsSink,
        command: Command,
    ) -> std::result::Result<(), String> {
        match command {
            Command::Request { mut payload, reply } => {
                self.next_req_id += 1;
                let req_id = self.next_req_id;

                match payload.as_object_mut() {
                    Some(object) => {
                        object.insert("req_id".to_string(), Value::from(req_id));
                    }
                    None => {
                        let _ = reply.send(Err(MonitorError::Internal(
                            "request payload must be a JSON object".into(),
                        )));
                        return Ok(());
                    }
                }

                let frame = payload.to_string();
                self.pending.insert(
                    req_id,
                    Pending {
                        reply,
                        issued_at: Instant::now(),
                    },
                );

                if let Err(e) = sink.send(Message::Text(frame)).await {
                    if let Some(entry) = self.pending.remove(&req_id) {
                        let _ = entry.reply.send(Err(MonitorError::Connection(e.to_string())));
                    }
                    return Err(e.to_string());
                }
                Ok(())
            }
            Command::ForgetId(id) => {
                let forget =
                    serde_json::to_string(&ForgetRequest::new(&id)).expect("forget serializes");
                sink.send(Message::Text(forget))
                    .await
                    .map_err(|e| e.to_string())
            }
        }
    }

    /// Resolve requests that outlived the response deadline
    fn sweep_pending(&mut self) {
        let deadline = self.request_timeout;
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.issued_at.elapsed() >= deadline)
            .map(|(&id, _)| id)
            .collect();

        for id in expired {
            if let Some(entry) = self.pending.remove(&id) {
                debug!("request {id} timed out");
                let _ = entry.reply.send(Err(MonitorError::RequestTimeout));
            }
        }
    }

    /// Resolve every in-flight request with an explicit ConnectionLost error
    /// instead of leaving callers hanging across a reconnect.
    fn fail_all_pending(&mut self) {
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(MonitorError::ConnectionLost));
        }
    }

    /// Sleep out the backoff delay while answering requests with
    /// NotConnected; they must fail immediately rather than queue. Returns
    /// false when every client handle is gone.
    async fn wait_disconnected(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Request { reply, .. }) => {
                        let _ = reply.send(Err(MonitorError::NotConnected));
                    }
                    Some(Command::ForgetId(_)) => {}
                    None => return false,
                },
            }
        }
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

// ============================================================================
// Subscription pump: batched, jittered subscribe requests
// ============================================================================

struct SubscriptionPump {
    batch_size: usize,
    batch_delay: Duration,
    jitter_ms: u64,
    commands: mpsc::Sender<Command>,
    inbox: mpsc::Receiver<SubCommand>,
    connected: watch::Receiver<bool>,
    /// symbol -> live subscription id, None while still pending
    active: HashMap<String, Option<String>>,
    queue: VecDeque<String>,
}

impl SubscriptionPump {
    async fn run(mut self) {
        enum PumpEvent {
            Command(SubCommand),
            ConnectionChange,
            Closed,
        }

        loop {
            // Block until there is work and a connection to do it on.
            while self.queue.is_empty() || !*self.connected.borrow() {
                let event = tokio::select! {
                    command = self.inbox.recv() => match command {
                        Some(command) => PumpEvent::Command(command),
                        None => PumpEvent::Closed,
                    },
                    changed = self.connected.changed() => match changed {
                        Ok(()) => PumpEvent::ConnectionChange,
                        Err(_) => PumpEvent::Closed,
                    },
                };

                match event {
                    PumpEvent::Command(command) => self.handle(command).await,
                    PumpEvent::ConnectionChange => {
                        // Every observed (re)connection invalidates server-side
                        // subscription ids; watch notifications coalesce, so a
                        // drop-and-reconnect may arrive as one change.
                        if *self.connected.borrow() {
                            self.requeue_all();
                        }
                    }
                    PumpEvent::Closed => return,
                }
            }

            // Drain anything else already waiting before cutting a batch.
            while let Ok(command) = self.inbox.try_recv() {
                self.handle(command).await;
            }

            let batch: Vec<String> = {
                let take = self.batch_size.min(self.queue.len());
                self.queue.drain(..take).collect()
            };
            if batch.is_empty() {
                continue;
            }

            let results = futures_util::future::join_all(batch.iter().map(|symbol| {
                let commands = self.commands.clone();
                let jitter = Duration::from_millis(if self.jitter_ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=self.jitter_ms)
                });
                let symbol = symbol.clone();
                async move {
                    sleep(jitter).await;
                    let payload = serde_json::to_value(SubscribeRequest::new(&symbol))
                        .expect("subscribe serializes");
                    raw_request(&commands, payload).await
                }
            }))
            .await;

            for (symbol, result) in batch.into_iter().zip(results) {
                match result {
                    Ok(response) => {
                        if let Some(error) = response.error {
                            // No retry storm: the instrument simply stays
                            // unsubscribed.
                            warn!(symbol, "subscription rejected: {} ({})", error.message, error.code);
                            self.active.remove(&symbol);
                        } else if let Some(sub) = response.subscription {
                            debug!(symbol, subscription = %sub.id, "subscribed");
                            self.active.insert(symbol, Some(sub.id));
                        }
                    }
                    Err(e) => {
                        // Transport-level failure, not a provider rejection:
                        // keep the symbol and retry once the connection is
                        // back.
                        warn!(symbol, "subscribe failed: {e}; requeueing");
                        self.queue.push_back(symbol);
                    }
                }
            }

            if !self.queue.is_empty() {
                sleep(self.batch_delay).await;
            }
        }
    }

    async fn handle(&mut self, command: SubCommand) {
        match command {
            SubCommand::Subscribe(symbol) => {
                if self.active.contains_key(&symbol) {
                    return; // already live or queued
                }
                self.active.insert(symbol.clone(), None);
                self.queue.push_back(symbol);
            }
            SubCommand::Unsubscribe(symbol) => {
                self.queue.retain(|queued| queued != &symbol);
                if let Some(Some(id)) = self.active.remove(&symbol) {
                    let _ = self.commands.send(Command::ForgetId(id)).await;
                }
            }
        }
    }

    /// After a reconnect every server-side subscription is gone; queue all
    /// known symbols again.
    fn requeue_all(&mut self) {
        self.queue.clear();
        for (symbol, id) in self.active.iter_mut() {
            *id = None;
            self.queue.push_back(symbol.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_ceiling() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn backoff_resets_after_success() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn backoff_matches_power_of_two_schedule() {
        // delay after n consecutive failures = min(1000 * 2^n, 30000)
        let mut backoff = Backoff::new();
        for n in 0..10u32 {
            let expected = std::cmp::min(1000u64 * 2u64.pow(n), 30_000);
            assert_eq!(backoff.next_delay(), Duration::from_millis(expected));
        }
    }
}
