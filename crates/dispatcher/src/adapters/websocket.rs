//! WebSocketAdapter - bidirectional push to connected clients
//!
//! Each accepted socket is split: the sink goes into the client registry
//! behind its own async mutex (so concurrent sends keep per-client order),
//! the stream is drained by a reader task that handles the small control
//! protocol and refreshes liveness.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use contracts::{
    merge_settings, now_millis, AdapterResult, ContractError, DistributorKind, DistributorStats,
    ErrorCode, Payload, ProtocolAdapter, TargetConfig, Timing, WebSocketConfig, BROADCAST_EVENT,
};
use futures::future::join_all;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::adapters::observe;
use crate::clients::{narrow_to_ids, ClientRegistry, ConnectedClient};
use crate::heartbeat::{classify, spawn_heartbeat, Liveness, SweepReport};
use crate::metrics::StatsCell;
use crate::server::{at_capacity, health_response, not_found, RunningServer};

const PROTOCOL: &str = "websocket";
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

type Writer = Mutex<SplitSink<WebSocket, Message>>;
type Client = ConnectedClient<Writer>;

/// Control frames accepted from clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Inbound {
    Subscribe {
        event: Option<String>,
        #[serde(default)]
        channels: Vec<String>,
    },
    Unsubscribe {
        event: Option<String>,
        #[serde(default)]
        channels: Vec<String>,
    },
    Ping,
    Data {
        event: Option<String>,
        #[serde(default)]
        data: Value,
    },
}

fn channel_names(event: Option<String>, channels: Vec<String>) -> Vec<String> {
    event.into_iter().chain(channels).collect()
}

async fn write(client: &Client, message: Message) -> Result<(), axum::Error> {
    client.writer.lock().await.send(message).await
}

/// State reachable from both the adapter and the axum handlers
struct Shared {
    config: RwLock<Arc<WebSocketConfig>>,
    clients: ClientRegistry<Writer>,
    stats: StatsCell,
}

impl Shared {
    fn config(&self) -> Arc<WebSocketConfig> {
        Arc::clone(&self.config.read())
    }

    fn publish_connections(&self) {
        let count = self.clients.len();
        self.stats.update(|s| s.active_connections = count as u64);
        observability::record_active_connections(PROTOCOL, count);
    }

    /// Forced removal (failed write or heartbeat timeout)
    fn evict(&self, id: &str, reason: &str) -> bool {
        if self.clients.remove(id).is_none() {
            return false;
        }
        self.stats.update(|s| s.clients_evicted += 1);
        observability::record_client_evicted(PROTOCOL);
        self.publish_connections();
        warn!(client_id = id, reason, "WebSocket client evicted");
        true
    }

    /// Removal after the peer went away on its own
    fn disconnect(&self, id: &str) {
        if self.clients.remove(id).is_some() {
            self.publish_connections();
            info!(client_id = id, "WebSocket client disconnected");
        }
    }

    async fn reply(&self, client: &Client, body: Value) {
        if write(client, Message::Text(body.to_string().into())).await.is_err() {
            self.evict(&client.id, "reply failed");
        }
    }

    async fn on_text(&self, client: &Client, text: &str) {
        let now = now_millis();
        let reply = match serde_json::from_str::<Inbound>(text) {
            Ok(Inbound::Subscribe { event, channels }) => {
                let names = channel_names(event, channels);
                if names.is_empty() {
                    json!({"type": "error", "error": "subscribe needs an event or channels"})
                } else {
                    client.join(names.iter().cloned());
                    debug!(client_id = %client.id, channels = ?names, "subscribed");
                    json!({"type": "subscribed", "channels": names, "timestamp": now})
                }
            }
            Ok(Inbound::Unsubscribe { event, channels }) => {
                let names = channel_names(event, channels);
                client.leave(names.iter().map(String::as_str));
                json!({"type": "unsubscribed", "channels": names, "timestamp": now})
            }
            Ok(Inbound::Ping) => json!({"type": "pong", "timestamp": now}),
            Ok(Inbound::Data { event, data }) => {
                self.stats.update(|s| {
                    s.bytes_received += text.len() as u64;
                    s.last_activity = Some(now);
                });
                debug!(client_id = %client.id, event = ?event, size = data.to_string().len(), "client data");
                return;
            }
            Err(e) => {
                debug!(client_id = %client.id, error = %e, "malformed client frame");
                json!({"type": "error", "error": format!("invalid message: {e}")})
            }
        };
        self.reply(client, reply).await;
    }

    /// Probe idle clients and evict expired ones
    async fn sweep(&self, now: i64) -> SweepReport {
        let interval = self.config().heartbeat_interval_ms;
        let verdicts = join_all(self.clients.all().into_iter().map(|client| async move {
            match classify(client.idle_ms(now), interval) {
                Liveness::Fresh => (Liveness::Fresh, false),
                Liveness::Probe => {
                    let failed = write(&client, Message::Ping(Bytes::new())).await.is_err();
                    let evicted = failed && self.evict(&client.id, "ping failed");
                    (Liveness::Probe, evicted)
                }
                Liveness::Expired => (Liveness::Expired, self.evict(&client.id, "heartbeat timeout")),
            }
        }))
        .await;

        let mut report = SweepReport::default();
        for (liveness, evicted) in verdicts {
            if liveness == Liveness::Probe {
                report.probed += 1;
            }
            if evicted {
                report.evicted += 1;
            }
        }
        if report.evicted > 0 {
            debug!(?report, "WebSocket heartbeat sweep");
        }
        report
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(shared): State<Arc<Shared>>) -> Response {
    let limit = shared.config().max_connections;
    if limit.is_some_and(|max| shared.clients.len() >= max) {
        warn!(connections = shared.clients.len(), "WebSocket connection refused, at capacity");
        return at_capacity();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
}

async fn health_handler(State(shared): State<Arc<Shared>>) -> impl IntoResponse {
    health_response(PROTOCOL, shared.clients.len())
}

async fn handle_socket(socket: WebSocket, shared: Arc<Shared>) {
    let (sink, mut stream) = socket.split();
    let client = shared
        .clients
        .insert(ConnectedClient::new(Mutex::new(sink), [], now_millis()));
    shared.stats.update(|s| s.connections_total += 1);
    shared.publish_connections();
    info!(client_id = %client.id, "WebSocket client connected");

    let welcome = json!({"type": "connected", "clientId": client.id, "timestamp": now_millis()});
    if write(&client, Message::Text(welcome.to_string().into())).await.is_err() {
        shared.evict(&client.id, "welcome failed");
        return;
    }

    let closed = client.closed();
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(message)) => {
                    client.touch(now_millis());
                    match message {
                        Message::Text(text) => shared.on_text(&client, text.as_str()).await,
                        Message::Binary(data) => {
                            shared.stats.update(|s| s.bytes_received += data.len() as u64);
                        }
                        Message::Close(_) => break,
                        Message::Ping(_) | Message::Pong(_) => {}
                    }
                }
                Some(Err(e)) => {
                    debug!(client_id = %client.id, error = %e, "WebSocket read error");
                    break;
                }
                None => break,
            }
        }
    }
    shared.disconnect(&client.id);
}

/// WebSocket server adapter
pub struct WebSocketAdapter {
    shared: Arc<Shared>,
    server: Mutex<Option<RunningServer>>,
}

impl WebSocketAdapter {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(Arc::new(config)),
                clients: ClientRegistry::new(),
                stats: StatsCell::new(),
            }),
            server: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Arc<WebSocketConfig> {
        self.shared.config()
    }

    /// Bound listener address while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.local_addr)
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.shared
            .clients
            .ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// Run one heartbeat pass as if the clock read `now`
    pub async fn sweep_idle(&self, now: i64) -> SweepReport {
        self.shared.sweep(now).await
    }

    fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(ws_handler))
            .route("/health", get(health_handler))
            .fallback(not_found)
            .with_state(Arc::clone(&self.shared))
    }

    fn finish(&self, result: AdapterResult, bytes: u64) -> AdapterResult {
        self.shared
            .stats
            .record_send(result.success, result.timing.duration, bytes);
        observe(PROTOCOL, &result, bytes);
        result
    }
}

#[async_trait]
impl ProtocolAdapter for WebSocketAdapter {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "bidirectional".into(),
            "broadcast".into(),
            "subscriptions".into(),
            "heartbeat".into(),
        ]
    }

    #[instrument(name = "websocket_send", skip_all, fields(event = ?target.event))]
    async fn send(&self, payload: &Payload, target: &TargetConfig) -> AdapterResult {
        let guard = Timing::start();
        let event = target
            .event
            .clone()
            .unwrap_or_else(|| BROADCAST_EVENT.to_string());

        let candidates = if event == BROADCAST_EVENT {
            self.shared.clients.all()
        } else {
            self.shared.clients.select(|c| c.in_channel(&event))
        };
        let recipients = narrow_to_ids(candidates, &target.client_ids);
        if recipients.is_empty() {
            let result = AdapterResult::failed(
                PROTOCOL,
                ErrorCode::NoTargets,
                format!("no clients subscribed to '{event}'"),
                guard.finish(),
            );
            return self.finish(result, 0);
        }

        let frame: Utf8Bytes = json!({
            "type": "data",
            "event": event,
            "data": payload.to_json(),
            "timestamp": now_millis(),
        })
        .to_string()
        .into();
        let frame_len = frame.len() as u64;

        let outcomes = join_all(recipients.iter().map(|client| {
            let message = Message::Text(frame.clone());
            async move { write(client, message).await }
        }))
        .await;

        let mut delivered = 0usize;
        for (client, outcome) in recipients.iter().zip(&outcomes) {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(client_id = %client.id, error = %e, "WebSocket write failed");
                    self.shared.evict(&client.id, "write failed");
                }
            }
        }
        let failed = recipients.len() - delivered;
        let bytes = frame_len * delivered as u64;

        let detail = json!({
            "targetClients": recipients.len(),
            "successfulDeliveries": delivered,
            "failedDeliveries": failed,
            "bytesSent": bytes,
        });
        let timing = guard.finish();
        let result = if delivered > 0 {
            AdapterResult::ok(PROTOCOL, detail, timing)
        } else {
            AdapterResult::failed(
                PROTOCOL,
                ErrorCode::SendFailed,
                format!("delivery failed for all {failed} clients"),
                timing,
            )
            .with_data(detail)
        };
        self.finish(result, bytes)
    }

    async fn health_check(&self) -> bool {
        self.server.lock().await.is_some()
    }

    fn configure(&self, partial: &Value) -> Result<(), ContractError> {
        let mut slot = self.shared.config.write();
        let next = merge_settings(DistributorKind::WebSocket, &**slot, partial)?;
        *slot = Arc::new(next);
        Ok(())
    }

    fn stats(&self) -> DistributorStats {
        DistributorStats::clone(&self.shared.stats.snapshot())
    }

    async fn start(&self) -> Result<(), ContractError> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Ok(());
        }

        let config = self.config();
        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };
        if path == "/health" {
            return Err(ContractError::config_validation(
                "websocket.path",
                "'/health' is reserved",
            ));
        }

        let mut running =
            RunningServer::bind(PROTOCOL, &config.host, config.port, self.router(&path)).await?;

        let shared = Arc::clone(&self.shared);
        running.attach(spawn_heartbeat(
            Duration::from_millis(config.heartbeat_interval_ms),
            running.cancel_token(),
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    shared.sweep(now_millis()).await;
                }
            },
        ));

        info!(addr = %running.local_addr, path = %path, "WebSocket adapter started");
        *server = Some(running);
        Ok(())
    }

    async fn shutdown(&self) {
        let running = self.server.lock().await.take();

        let clients = self.shared.clients.drain();
        join_all(clients.iter().map(|client| async move {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, write(client, Message::Close(None))).await;
        }))
        .await;
        self.shared.publish_connections();

        if let Some(running) = running {
            running.stop().await;
            info!(closed = clients.len(), "WebSocket adapter stopped");
        }
    }
}
