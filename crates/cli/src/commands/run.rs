//! `run` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigManager, LoadedSession, DEFAULT_TEMPLATE};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let loaded = load_session(args)?;
    for warning in &loaded.warnings {
        warn!(field = %warning.field, "{}", warning.message);
    }

    let session = loaded.session;
    info!(
        template = %loaded.template,
        session = %session.session_id,
        distributors = ?session.enabled_names(),
        routes = session.event_routing.len(),
        "Configuration loaded"
    );

    let discovery = match session.discovery.clone() {
        Some(d) if d.enabled || args.discovery => Some(d),
        None if args.discovery => Some(Default::default()),
        _ => None,
    };

    // Build pipeline configuration
    let pipeline_config = PipelineConfig {
        session,
        max_messages: (args.max_messages > 0).then_some(args.max_messages),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        discovery,
    };

    let pipeline = Pipeline::new(pipeline_config);

    // Setup graceful shutdown handler
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, stopping pipeline...");
        signal_token.cancel();
    });

    info!("Starting pipeline...");

    let stats = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            pipeline.run(BufReader::new(file), cancel).await
        }
        None => pipeline.run(BufReader::new(tokio::io::stdin()), cancel).await,
    }
    .context("Pipeline execution failed")?;

    info!(
        distributed = stats.distributed,
        malformed = stats.malformed,
        duration_secs = stats.duration.as_secs_f64(),
        "Pipeline completed successfully"
    );
    stats.print_summary();

    info!("Fanout finished");
    Ok(())
}

/// Resolve the session from template, file and CLI overrides
fn load_session(args: &RunArgs) -> Result<LoadedSession, CliError> {
    let manager = ConfigManager::from_process_env();
    let overrides = cli_overrides(args);

    match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()));
            }
            info!(config = %path.display(), "Loading configuration");
            Ok(manager.load_with_overrides(path, args.template.as_deref(), &overrides)?)
        }
        None => {
            let template = args.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
            info!(template, "Building session from template");
            Ok(manager.build_session(template, &overrides)?)
        }
    }
}

/// Flags that land as the topmost merge layer
fn cli_overrides(args: &RunArgs) -> Value {
    let mut overrides = json!({});
    if let Some(port) = args.ws_port {
        info!(port, "Overriding WebSocket port from CLI");
        overrides["distributors"]["websocket"]["port"] = json!(port);
    }
    if let Some(port) = args.sse_port {
        info!(port, "Overriding SSE port from CLI");
        overrides["distributors"]["sse"]["port"] = json!(port);
    }
    if let Some(url) = &args.http_base_url {
        info!(url = %url, "Overriding HTTP base URL from CLI");
        overrides["distributors"]["http"]["base_url"] = json!(url);
    }
    overrides
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
