//! SseAdapter - one-way `text/event-stream` push
//!
//! Every connection owns a bounded channel whose receiver is the HTTP
//! response body. Dropping the body (peer gone, eviction, shutdown)
//! removes the client through a guard carried by the stream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use contracts::{
    merge_settings, now_millis, AdapterResult, ClientId, ContractError, DistributorKind,
    DistributorStats, ErrorCode, Payload, ProtocolAdapter, SseConfig, TargetConfig, Timing,
    BROADCAST_EVENT,
};
use futures::Stream;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::adapters::observe;
use crate::clients::{narrow_to_ids, ClientRegistry, ConnectedClient};
use crate::heartbeat::{classify, spawn_heartbeat, Liveness, SweepReport};
use crate::metrics::StatsCell;
use crate::server::{at_capacity, health_response, not_found, RunningServer};

const PROTOCOL: &str = "sse";
const CLIENT_BUFFER: usize = 64;
const HEARTBEAT_COMMENT: &[u8] = b": heartbeat\n\n";

/// One server-sent event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<u64>,
}

impl SseFrame {
    /// True when `value` fits in one `id` or `event` field
    pub fn is_single_line(value: &str) -> bool {
        !value.contains(['\r', '\n'])
    }

    /// Wire form, terminated by a blank line.
    ///
    /// Data is split on every line terminator (`\r\n`, `\r`, `\n`); line
    /// breaks inside `id` and `event` are dropped.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str(&format!("id: {}\n", single_line(id)));
        }
        if let Some(event) = &self.event {
            out.push_str(&format!("event: {}\n", single_line(event)));
        }
        for line in self.data.split("\r\n").flat_map(|part| part.split(['\r', '\n'])) {
            out.push_str(&format!("data: {line}\n"));
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {retry}\n"));
        }
        out.push('\n');
        out
    }

    /// Parse complete events out of `text`.
    ///
    /// Comment lines are skipped, a trailing block without its blank line
    /// is left unparsed, and blocks without `data` are not dispatched.
    pub fn parse(text: &str) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        let mut current = SseFrame::default();
        let mut data: Option<Vec<String>> = None;

        for line in complete_lines(text) {
            if line.is_empty() {
                if let Some(lines) = data.take() {
                    current.data = lines.join("\n");
                    frames.push(std::mem::take(&mut current));
                } else {
                    current = SseFrame::default();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "id" => current.id = Some(value.to_string()),
                "event" => current.event = Some(value.to_string()),
                "data" => data.get_or_insert_with(Vec::new).push(value.to_string()),
                "retry" => current.retry = value.parse().ok(),
                _ => {}
            }
        }
        frames
    }
}

fn single_line(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// Lines ended by `\r\n`, `\r` or `\n`; an unterminated tail is skipped
fn complete_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(['\r', '\n']) {
        let (line, tail) = rest.split_at(pos);
        rest = if let Some(after) = tail.strip_prefix("\r\n") {
            after
        } else if tail == "\r" {
            // the matching \n may still be in flight
            break;
        } else {
            &tail[1..]
        };
        lines.push(line);
    }
    lines
}

type Writer = mpsc::Sender<Bytes>;
type Client = ConnectedClient<Writer>;

/// Why a write to one client did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteError {
    /// Client is not draining its stream
    Full,
    /// Stream already dropped
    Closed,
}

fn write(client: &Client, frame: Bytes) -> Result<(), WriteError> {
    match client.writer.try_send(frame) {
        Ok(()) => {
            client.touch(now_millis());
            Ok(())
        }
        Err(TrySendError::Full(_)) => Err(WriteError::Full),
        Err(TrySendError::Closed(_)) => Err(WriteError::Closed),
    }
}

struct Shared {
    config: RwLock<Arc<SseConfig>>,
    clients: ClientRegistry<Writer>,
    stats: StatsCell,
    next_id: AtomicU64,
}

impl Shared {
    fn config(&self) -> Arc<SseConfig> {
        Arc::clone(&self.config.read())
    }

    fn publish_connections(&self) {
        let count = self.clients.len();
        self.stats.update(|s| s.active_connections = count as u64);
        observability::record_active_connections(PROTOCOL, count);
    }

    fn evict(&self, id: &str, reason: &str) -> bool {
        if self.clients.remove(id).is_none() {
            return false;
        }
        self.stats.update(|s| s.clients_evicted += 1);
        observability::record_client_evicted(PROTOCOL);
        self.publish_connections();
        warn!(client_id = id, reason, "SSE client evicted");
        true
    }

    fn disconnect(&self, id: &str) {
        if self.clients.remove(id).is_some() {
            self.publish_connections();
            info!(client_id = id, "SSE client disconnected");
        }
    }

    fn sweep(&self, now: i64) -> SweepReport {
        let interval = self.config().heartbeat_interval_ms;
        let mut report = SweepReport::default();
        for client in self.clients.all() {
            match classify(client.idle_ms(now), interval) {
                Liveness::Fresh => {}
                Liveness::Probe => {
                    report.probed += 1;
                    if let Err(e) = write(&client, Bytes::from_static(HEARTBEAT_COMMENT)) {
                        if self.evict(&client.id, &format!("heartbeat write failed ({e:?})")) {
                            report.evicted += 1;
                        }
                    }
                }
                Liveness::Expired => {
                    if self.evict(&client.id, "heartbeat timeout") {
                        report.evicted += 1;
                    }
                }
            }
        }
        if report.evicted > 0 {
            debug!(?report, "SSE heartbeat sweep");
        }
        report
    }
}

/// Removes the client when its response body is dropped
struct DisconnectGuard {
    id: ClientId,
    shared: Weak<Shared>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.disconnect(&self.id);
        }
    }
}

/// Response body of one SSE connection
struct ClientStream {
    inner: ReceiverStream<Bytes>,
    _guard: DisconnectGuard,
}

impl Stream for ClientStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|item| item.map(Ok))
    }
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    /// Comma-separated initial channels
    channels: Option<String>,
}

async fn stream_handler(
    State(shared): State<Arc<Shared>>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let config = shared.config();
    if config
        .max_connections
        .is_some_and(|max| shared.clients.len() >= max)
    {
        warn!(connections = shared.clients.len(), "SSE connection refused, at capacity");
        return at_capacity();
    }

    let channels: Vec<String> = query
        .channels
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
    let now = now_millis();
    let client = shared.clients.insert(ConnectedClient::new(tx, channels, now));
    shared.stats.update(|s| s.connections_total += 1);
    shared.publish_connections();
    info!(client_id = %client.id, channels = ?client.channels(), "SSE client connected");

    let connected = SseFrame {
        id: None,
        event: Some("connected".into()),
        data: json!({"clientId": client.id, "timestamp": now}).to_string(),
        retry: config.retry_ms,
    };
    // Fresh channel, cannot be full
    let _ = write(&client, Bytes::from(connected.format()));

    let body = ClientStream {
        inner: ReceiverStream::new(rx),
        _guard: DisconnectGuard {
            id: client.id.clone(),
            shared: Arc::downgrade(&shared),
        },
    };
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

async fn health_handler(State(shared): State<Arc<Shared>>) -> impl IntoResponse {
    health_response(PROTOCOL, shared.clients.len())
}

/// Server-sent events adapter
pub struct SseAdapter {
    shared: Arc<Shared>,
    server: Mutex<Option<RunningServer>>,
}

impl SseAdapter {
    pub fn new(config: SseConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(Arc::new(config)),
                clients: ClientRegistry::new(),
                stats: StatsCell::new(),
                next_id: AtomicU64::new(0),
            }),
            server: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Arc<SseConfig> {
        self.shared.config()
    }

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

    /// Add channels to a connected client; false when it is unknown
    pub fn assign_channels(&self, client_id: &str, channels: &[String]) -> bool {
        match self.shared.clients.get(client_id) {
            Some(client) => {
                client.join(channels.iter().cloned());
                true
            }
            None => false,
        }
    }

    /// Run one heartbeat pass as if the clock read `now`
    pub fn sweep_idle(&self, now: i64) -> SweepReport {
        self.shared.sweep(now)
    }

    fn next_event_id(&self) -> String {
        (self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(stream_handler))
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
impl ProtocolAdapter for SseAdapter {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "server-push".into(),
            "channels".into(),
            "auto-reconnect".into(),
            "heartbeat".into(),
        ]
    }

    #[instrument(name = "sse_send", skip_all, fields(event = ?target.event))]
    async fn send(&self, payload: &Payload, target: &TargetConfig) -> AdapterResult {
        let guard = Timing::start();

        let multi_line = [target.id.as_deref(), target.event.as_deref()]
            .into_iter()
            .flatten()
            .any(|value| !SseFrame::is_single_line(value));
        if multi_line {
            let result = AdapterResult::failed(
                PROTOCOL,
                ErrorCode::ConfigurationError,
                "SSE event id and name must not contain line breaks",
                guard.finish(),
            );
            return self.finish(result, 0);
        }

        if !target.client_ids.is_empty() && !target.channels.is_empty() {
            for id in &target.client_ids {
                self.assign_channels(id, &target.channels);
            }
        }

        let candidates = if target.channels.is_empty() {
            self.shared.clients.all()
        } else {
            self.shared.clients.select(|c| c.in_any(&target.channels))
        };
        let recipients = narrow_to_ids(candidates, &target.client_ids);
        if recipients.is_empty() {
            let result = AdapterResult::failed(
                PROTOCOL,
                ErrorCode::NoTargets,
                "no SSE clients match the target",
                guard.finish(),
            );
            return self.finish(result, 0);
        }

        let frame = SseFrame {
            id: Some(target.id.clone().unwrap_or_else(|| self.next_event_id())),
            event: Some(
                target
                    .event
                    .clone()
                    .unwrap_or_else(|| BROADCAST_EVENT.to_string()),
            ),
            data: payload.to_text(),
            retry: target.retry_ms,
        };
        let encoded = Bytes::from(frame.format());

        let mut delivered = 0usize;
        for client in &recipients {
            match write(client, encoded.clone()) {
                Ok(()) => delivered += 1,
                Err(WriteError::Full) => {
                    debug!(client_id = %client.id, "SSE client buffer full, frame dropped");
                }
                Err(WriteError::Closed) => {
                    self.shared.evict(&client.id, "stream closed");
                }
            }
        }
        let failed = recipients.len() - delivered;
        let bytes = encoded.len() as u64 * delivered as u64;

        let detail = json!({
            "eventId": frame.id,
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
        let next = merge_settings(DistributorKind::Sse, &**slot, partial)?;
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
                "sse.path",
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
                shared.sweep(now_millis());
                std::future::ready(())
            },
        ));

        info!(addr = %running.local_addr, path = %path, "SSE adapter started");
        *server = Some(running);
        Ok(())
    }

    async fn shutdown(&self) {
        let running = self.server.lock().await.take();
        // Dropping the senders ends every response body
        let closed = self.shared.clients.drain().len();
        self.shared.publish_connections();
        if let Some(running) = running {
            running.stop().await;
            info!(closed, "SSE adapter stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_format_is_exact() {
        let frame = SseFrame {
            id: Some("7".into()),
            event: Some("alerts".into()),
            data: "line one\nline two".into(),
            retry: Some(3000),
        };
        assert_eq!(
            frame.format(),
            "id: 7\nevent: alerts\ndata: line one\ndata: line two\nretry: 3000\n\n"
        );
    }

    #[test]
    fn test_parse_skips_comments_and_partial_blocks() {
        let text = ": heartbeat\n\nid: 1\nevent: a\ndata: x\ndata:y\n\nevent: only\n\nid: 2\ndata: tail";
        let frames = SseFrame::parse(text);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("1"));
        assert_eq!(frames[0].event.as_deref(), Some("a"));
        assert_eq!(frames[0].data, "x\ny");
    }

    #[test]
    fn test_parse_reads_back_formatted_frames() {
        let frame = SseFrame {
            id: Some("3".into()),
            event: Some("face.detected".into()),
            data: r#"{"faces":2}"#.into(),
            retry: None,
        };
        let text = format!("{}{}", frame.format(), frame.format());
        assert_eq!(SseFrame::parse(&text), vec![frame.clone(), frame]);
    }

    #[test]
    fn test_data_splits_on_every_line_terminator() {
        let frame = SseFrame {
            id: Some("1".into()),
            event: None,
            data: "a\r\nb\rc\nd".into(),
            retry: None,
        };
        let wire = frame.format();
        assert_eq!(wire, "id: 1\ndata: a\ndata: b\ndata: c\ndata: d\n\n");
        assert!(!wire.contains('\r'));
        // line terminators come back normalized to \n
        assert_eq!(SseFrame::parse(&wire)[0].data, "a\nb\nc\nd");
    }

    #[test]
    fn test_parse_accepts_crlf_and_cr_terminators() {
        let text = "id: 4\r\nevent: x\rdata: one\r\ndata: two\r\n\r\nid: 5\r";
        let frames = SseFrame::parse(text);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("4"));
        assert_eq!(frames[0].event.as_deref(), Some("x"));
        assert_eq!(frames[0].data, "one\ntwo");
    }

    #[test]
    fn test_line_breaks_in_event_cannot_add_fields() {
        let frame = SseFrame {
            id: Some("1\r".into()),
            event: Some("alerts\ndata: forged".into()),
            data: "real".into(),
            retry: None,
        };
        let frames = SseFrame::parse(&frame.format());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("1"));
        assert_eq!(frames[0].event.as_deref(), Some("alertsdata: forged"));
        assert_eq!(frames[0].data, "real");
    }

    #[tokio::test]
    async fn test_send_rejects_multi_line_event_name() {
        let adapter = SseAdapter::new(SseConfig::default());
        let (tx, _rx) = mpsc::channel(4);
        adapter
            .shared
            .clients
            .insert(ConnectedClient::new(tx, Vec::new(), now_millis()));

        let target = TargetConfig::event("alerts\ndata: forged");
        let result = adapter.send(&Payload::from("real"), &target).await;
        assert_eq!(result.code, Some(ErrorCode::ConfigurationError));
        assert_eq!(adapter.stats().messages_failed, 1);
    }

    #[tokio::test]
    async fn test_partial_delivery_counts_and_evicts_closed_streams() {
        let adapter = SseAdapter::new(SseConfig::default());
        let now = now_millis();

        let (live_tx, mut live_rx) = mpsc::channel(4);
        let live = adapter
            .shared
            .clients
            .insert(ConnectedClient::new(live_tx, Vec::new(), now));

        let (closed_tx, closed_rx) = mpsc::channel(4);
        drop(closed_rx);
        let closed = adapter
            .shared
            .clients
            .insert(ConnectedClient::new(closed_tx, Vec::new(), now));

        let (full_tx, _full_rx) = mpsc::channel(1);
        full_tx.try_send(Bytes::from_static(b"backlog")).unwrap();
        let full = adapter
            .shared
            .clients
            .insert(ConnectedClient::new(full_tx, Vec::new(), now));

        let result = adapter
            .send(&Payload::from("hello"), &TargetConfig::event("alerts"))
            .await;
        assert!(result.success, "{result:?}");
        let data = result.data.unwrap();
        assert_eq!(data["targetClients"], json!(3));
        assert_eq!(data["successfulDeliveries"], json!(1));
        assert_eq!(data["failedDeliveries"], json!(2));

        let frame = live_rx.try_recv().unwrap();
        assert_eq!(SseFrame::parse(std::str::from_utf8(&frame).unwrap())[0].data, "hello");

        // only the closed stream is evicted; a slow reader keeps its slot
        let ids = adapter.client_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&live.id.to_string()));
        assert!(ids.contains(&full.id.to_string()));
        assert!(!ids.contains(&closed.id.to_string()));
        assert_eq!(adapter.stats().clients_evicted, 1);
    }

    #[tokio::test]
    async fn test_all_writes_failing_is_send_failed() {
        let adapter = SseAdapter::new(SseConfig::default());
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        adapter
            .shared
            .clients
            .insert(ConnectedClient::new(tx, Vec::new(), now_millis()));

        let result = adapter.send(&Payload::from("x"), &TargetConfig::default()).await;
        assert!(!result.success);
        assert_eq!(result.code, Some(ErrorCode::SendFailed));
        assert_eq!(result.data.unwrap()["failedDeliveries"], json!(1));
        assert_eq!(adapter.client_count(), 0);
    }

    async fn started() -> (SseAdapter, SocketAddr) {
        let adapter = SseAdapter::new(SseConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        });
        adapter.start().await.unwrap();
        let addr = adapter.local_addr().await.unwrap();
        (adapter, addr)
    }

    async fn read_frames(
        response: &mut reqwest::Response,
        buf: &mut String,
        want: usize,
    ) -> Vec<SseFrame> {
        loop {
            let frames = SseFrame::parse(buf);
            if frames.len() >= want {
                return frames;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    #[tokio::test]
    async fn test_stream_receives_channel_events() {
        let (adapter, addr) = started().await;
        let mut response = reqwest::get(format!("http://{addr}/events?channels=alerts"))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "text/event-stream"
        );

        let mut buf = String::new();
        let frames = read_frames(&mut response, &mut buf, 1).await;
        assert_eq!(frames[0].event.as_deref(), Some("connected"));
        assert_eq!(frames[0].retry, Some(3000));
        assert_eq!(adapter.client_count(), 1);

        let target = TargetConfig {
            event: Some("alerts".into()),
            channels: vec!["alerts".into()],
            ..Default::default()
        };
        let result = adapter.send(&Payload::from("hello"), &target).await;
        assert!(result.success, "{result:?}");

        let miss = TargetConfig {
            channels: vec!["other".into()],
            ..Default::default()
        };
        let result = adapter.send(&Payload::from("x"), &miss).await;
        assert_eq!(result.code, Some(ErrorCode::NoTargets));

        let frames = read_frames(&mut response, &mut buf, 2).await;
        assert_eq!(frames[1].event.as_deref(), Some("alerts"));
        assert_eq!(frames[1].data, "hello");
        assert_eq!(frames[1].id.as_deref(), Some("1"));

        adapter.shutdown().await;
        assert_eq!(adapter.client_count(), 0);
    }

    #[tokio::test]
    async fn test_sender_assigned_channels() {
        let (adapter, addr) = started().await;
        let mut response = reqwest::get(format!("http://{addr}/events")).await.unwrap();
        let mut buf = String::new();
        read_frames(&mut response, &mut buf, 1).await;

        let id = adapter.client_ids().remove(0);
        let target = TargetConfig {
            channels: vec!["gaze".into()],
            client_ids: vec![id.clone()],
            ..Default::default()
        };
        assert!(adapter.send(&Payload::from("a"), &target).await.success);

        let by_channel = TargetConfig {
            channels: vec!["gaze".into()],
            ..Default::default()
        };
        assert!(adapter.send(&Payload::from("b"), &by_channel).await.success);
        assert!(!adapter.assign_channels("client_missing", &["x".into()]));
        adapter.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_clients() {
        let (adapter, addr) = started().await;
        let mut response = reqwest::get(format!("http://{addr}/events")).await.unwrap();
        let mut buf = String::new();
        read_frames(&mut response, &mut buf, 1).await;

        let interval = adapter.config().heartbeat_interval_ms as i64;
        let probe = adapter.sweep_idle(now_millis() + interval + 1);
        assert_eq!(probe.probed, 1);
        assert_eq!(probe.evicted, 0);

        let report = adapter.sweep_idle(now_millis() + interval * 3);
        assert_eq!(report.evicted, 1);
        assert_eq!(adapter.client_count(), 0);
        assert_eq!(adapter.stats().clients_evicted, 1);
        adapter.shutdown().await;
    }
}
