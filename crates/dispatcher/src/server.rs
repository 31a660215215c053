//! Listener lifecycle shared by the streaming adapters

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use contracts::ContractError;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `stop` waits for background tasks before aborting them
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A bound listener plus the tasks that belong to it
#[derive(Debug)]
pub struct RunningServer {
    pub local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Bind `host:port` and serve `router` until the returned server is stopped
    pub async fn bind(
        protocol: &'static str,
        host: &str,
        port: u32,
        router: Router,
    ) -> Result<Self, ContractError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ContractError::bind(protocol, &addr, e.to_string()))?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(protocol, error = %e, "server loop ended with error");
            }
        });

        info!(protocol, addr = %local_addr, "listener started");
        Ok(Self {
            local_addr,
            cancel,
            tasks: vec![serve],
        })
    }

    /// Token cancelled when the server stops
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Keep a background task tied to this server's lifetime
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Cancel everything and wait briefly for tasks to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        for mut task in self.tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

/// Body of `GET /health` on a streaming adapter
pub fn health_response(protocol: &str, connections: usize) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "protocol": protocol,
        "connections": connections,
    }))
}

/// Fallback for every unrouted path
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// Reply sent when `max_connections` is reached
pub fn at_capacity() -> axum::response::Response {
    (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response()
}
