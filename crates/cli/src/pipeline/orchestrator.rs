//! Pipeline orchestrator - owns the coordinator for one run.
//!
//! Reads newline-delimited JSON envelopes, fans each one out and stops on
//! end of input, the message limit, the timeout or cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{DiscoveryConfig, EnvelopeRecord, PayloadEnvelope, SessionConfig};
use dispatcher::{Announcement, Coordinator, DiscoveryAnnouncer};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PipelineStats;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The resolved, validated session
    pub session: SessionConfig,

    /// Maximum number of envelopes to distribute (None = unlimited)
    pub max_messages: Option<u64>,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Discovery beacon settings (None = no beacon)
    pub discovery: Option<DiscoveryConfig>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Start every distributor, pump `input` through them, then shut down.
    ///
    /// Adapters are shut down even when the input loop fails.
    pub async fn run<R>(self, input: R, cancel: CancellationToken) -> Result<PipelineStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let start_time = Instant::now();

        // Initialize Metrics (optional)
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let coordinator = Coordinator::from_session(&self.config.session)
            .context("Failed to build distributors")?;
        coordinator
            .start_all()
            .await
            .context("Failed to start distributors")?;

        let beacon = match &self.config.discovery {
            Some(discovery) => match self.start_discovery(&coordinator, discovery, &cancel).await {
                Ok(beacon) => Some(beacon),
                Err(e) => {
                    coordinator.shutdown().await;
                    return Err(e);
                }
            },
            None => None,
        };

        let outcome = self.pump(&coordinator, input, &cancel).await;

        // Shutdown
        info!("Shutting down pipeline...");
        if let Some((token, handle)) = beacon {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "discovery task ended abnormally");
            }
        }
        let adapters = coordinator.stats();
        coordinator.shutdown().await;

        let mut stats = outcome?;
        stats.adapters = adapters;
        stats.duration = start_time.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            distributed = stats.distributed,
            malformed = stats.malformed,
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }

    async fn start_discovery(
        &self,
        coordinator: &Coordinator,
        discovery: &DiscoveryConfig,
        cancel: &CancellationToken,
    ) -> Result<(CancellationToken, JoinHandle<()>)> {
        let mut capabilities: Vec<String> = coordinator
            .protocols()
            .iter()
            .filter_map(|name| coordinator.adapter(name))
            .flat_map(|adapter| adapter.capabilities())
            .collect();
        capabilities.sort();
        capabilities.dedup();

        let announcement = Announcement::from_session(&self.config.session, capabilities);
        let announcer = DiscoveryAnnouncer::bind(discovery.clone(), announcement)
            .await
            .context("Failed to open discovery socket")?;
        info!(destination = %announcer.destination(), "Discovery enabled");

        let token = cancel.child_token();
        let handle = Arc::new(announcer).spawn(token.clone());
        Ok((token, handle))
    }

    async fn pump<R>(
        &self,
        coordinator: &Coordinator,
        input: R,
        cancel: &CancellationToken,
    ) -> Result<PipelineStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut stats = PipelineStats::default();
        let mut lines = input.lines();

        let timeout = self.config.timeout;
        let deadline = async move {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        info!(max_messages = ?self.config.max_messages, "Pipeline running");

        loop {
            let line = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Pipeline cancelled");
                    break;
                }
                () = &mut deadline => {
                    warn!(timeout_secs = timeout.map(|t| t.as_secs()), "Pipeline timed out");
                    break;
                }
                line = lines.next_line() => line.context("Failed to read input")?,
            };

            let Some(line) = line else {
                info!("Input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            stats.messages_read += 1;

            let envelope: PayloadEnvelope = match serde_json::from_str::<EnvelopeRecord>(&line) {
                Ok(record) => record.into(),
                Err(e) => {
                    stats.malformed += 1;
                    warn!(line = stats.messages_read, error = %e, "Skipping malformed envelope");
                    continue;
                }
            };

            let report = coordinator.distribute(&envelope).await;
            stats
                .aggregator
                .update(report.results.iter().map(|(name, r)| (name.as_str(), r)));
            stats.distributed += 1;

            debug!(
                event = %report.event,
                succeeded = report.succeeded(),
                failed = report.failed(),
                "Envelope distributed"
            );

            if let Some(max) = self.config.max_messages {
                if stats.distributed >= max {
                    info!(messages = stats.distributed, "Reached max messages limit");
                    break;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::UdpSocket;

    async fn udp_session() -> (SessionConfig, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let session = SessionConfig {
            session_id: "pipeline-test".into(),
            distributors: [(
                "udp".to_string(),
                json!({"host": "127.0.0.1", "port": port}),
            )]
            .into(),
            ..Default::default()
        };
        (session, receiver)
    }

    fn config(session: SessionConfig, max_messages: Option<u64>) -> PipelineConfig {
        PipelineConfig {
            session,
            max_messages,
            timeout: Some(Duration::from_secs(5)),
            metrics_port: None,
            discovery: None,
        }
    }

    #[tokio::test]
    async fn test_pumps_lines_and_skips_malformed() {
        let (session, receiver) = udp_session().await;
        let input: &[u8] = b"{\"event\":\"eye.gaze\",\"data\":{\"x\":1}}\n\
                             not json\n\
                             \n\
                             {\"event\":\"eye.blink\",\"data\":\"left\"}\n";

        let stats = Pipeline::new(config(session, None))
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.messages_read, 3);
        assert_eq!(stats.distributed, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.adapters["udp"].messages_succeeded, 2);

        let mut buf = [0u8; 256];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], br#"{"x":1}"#);
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"left");
    }

    #[tokio::test]
    async fn test_stops_at_message_limit() {
        let (session, _receiver) = udp_session().await;
        let input: &[u8] = b"{\"event\":\"a\"}\n{\"event\":\"b\"}\n{\"event\":\"c\"}\n";

        let stats = Pipeline::new(config(session, Some(1)))
            .run(input, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.distributed, 1);
        assert_eq!(stats.aggregator.summary().total_events, 1);
    }

    #[tokio::test]
    async fn test_discovery_failure_releases_listeners() {
        let port = {
            let reserve = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            reserve.local_addr().unwrap().port()
        };
        let session = SessionConfig {
            session_id: "pipeline-test".into(),
            distributors: [(
                "websocket".to_string(),
                json!({"host": "127.0.0.1", "port": port}),
            )]
            .into(),
            ..Default::default()
        };
        let pipeline = Pipeline::new(PipelineConfig {
            discovery: Some(DiscoveryConfig {
                enabled: true,
                address: "beacon.local".into(),
                ..Default::default()
            }),
            ..config(session, None)
        });

        let input: &[u8] = b"";
        let err = pipeline.run(input, CancellationToken::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("discovery"), "{err:#}");

        // The websocket listener was shut down with the failed run
        tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_input_arrives() {
        let (session, _receiver) = udp_session().await;
        let (reader, _writer) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = Pipeline::new(config(session, None))
            .run(tokio::io::BufReader::new(reader), cancel)
            .await
            .unwrap();

        assert_eq!(stats.messages_read, 0);
    }
}
