//! HttpAdapter - webhook-style request/response delivery

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contracts::{
    merge_settings, url_scheme, AdapterResult, ContractError, DistributorKind, DistributorStats,
    ErrorCode, HttpConfig, HttpMethod, Payload, ProtocolAdapter, TargetConfig, Timing,
};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use crate::adapters::observe;
use crate::metrics::StatsCell;

const PROTOCOL: &str = "http";

/// Delivers each payload as one HTTP request
pub struct HttpAdapter {
    config: RwLock<Arc<HttpConfig>>,
    client: reqwest::Client,
    stats: StatsCell,
}

impl HttpAdapter {
    /// # Errors
    /// Fails when the HTTP client cannot be initialised (TLS backend)
    pub fn new(config: HttpConfig) -> Result<Self, ContractError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ContractError::transport(PROTOCOL, e.to_string()))?;
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            client,
            stats: StatsCell::new(),
        })
    }

    pub fn config(&self) -> Arc<HttpConfig> {
        Arc::clone(&self.config.read())
    }

    /// Final request URL for a send, or `None` when a relative endpoint
    /// has no base to resolve against
    pub fn resolve_url(config: &HttpConfig, target: &TargetConfig) -> Option<String> {
        let endpoint = target.endpoint.as_deref().unwrap_or(&config.endpoint);
        if matches!(url_scheme(endpoint).as_deref(), Some("http" | "https")) {
            return Some(endpoint.to_string());
        }
        let base = config.base_url.as_deref().filter(|b| !b.is_empty())?;
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ))
    }

    fn build_headers(
        config: &HttpConfig,
        target: &TargetConfig,
        content_type: &'static str,
    ) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        for (name, value) in config.headers.iter().chain(target.headers.iter()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| format!("invalid header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| format!("invalid value for header '{name}': {e}"))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    async fn exchange(
        &self,
        url: &str,
        method: HttpMethod,
        headers: HeaderMap,
        body: bytes::Bytes,
    ) -> Result<(u16, Value, Value, usize), reqwest::Error> {
        let method = match method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let response_headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()),
                )
            })
            .collect();
        let raw = response.bytes().await?;
        let body = serde_json::from_slice::<Value>(&raw)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&raw).into_owned()));
        Ok((status, Value::Object(response_headers), body, raw.len()))
    }
}

#[async_trait]
impl ProtocolAdapter for HttpAdapter {
    fn protocol(&self) -> &str {
        PROTOCOL
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["request-response".into(), "webhook".into()]
    }

    #[instrument(name = "http_send", skip_all, fields(event = ?target.event))]
    async fn send(&self, payload: &Payload, target: &TargetConfig) -> AdapterResult {
        let guard = Timing::start();
        let config = self.config();

        let Some(url) = Self::resolve_url(&config, target) else {
            let result = AdapterResult::failed(
                PROTOCOL,
                ErrorCode::ConfigurationError,
                "base_url is required for a relative endpoint",
                guard.finish(),
            );
            self.stats.record_send(false, result.timing.duration, 0);
            observe(PROTOCOL, &result, 0);
            return result;
        };

        let headers = match Self::build_headers(&config, target, payload.content_type()) {
            Ok(headers) => headers,
            Err(message) => {
                let result = AdapterResult::failed(
                    PROTOCOL,
                    ErrorCode::ConfigurationError,
                    message,
                    guard.finish(),
                );
                self.stats.record_send(false, result.timing.duration, 0);
                observe(PROTOCOL, &result, 0);
                return result;
            }
        };

        let body = payload.to_bytes();
        let sent = body.len() as u64;
        let method = target.method.unwrap_or(config.method);
        let deadline = Duration::from_millis(target.timeout_ms.unwrap_or(config.timeout_ms));

        let outcome = tokio::time::timeout(deadline, self.exchange(&url, method, headers, body)).await;
        let timing = guard.finish();

        let (result, bytes_out, bytes_in) = match outcome {
            Err(_) => {
                warn!(url = %url, timeout_ms = deadline.as_millis() as u64, "HTTP request timed out");
                (
                    AdapterResult::failed(
                        PROTOCOL,
                        ErrorCode::Timeout,
                        format!("request exceeded {} ms", deadline.as_millis()),
                        timing,
                    ),
                    0,
                    0,
                )
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "HTTP request failed");
                let code = if e.is_timeout() {
                    ErrorCode::Timeout
                } else {
                    ErrorCode::NetworkError
                };
                (AdapterResult::failed(PROTOCOL, code, e.to_string(), timing), 0, 0)
            }
            Ok(Ok((status, headers, body, received))) => {
                let data = json!({"status": status, "headers": headers, "body": body});
                if (200..300).contains(&status) {
                    debug!(url = %url, status, "HTTP delivery ok");
                    (AdapterResult::ok(PROTOCOL, data, timing), sent, received as u64)
                } else {
                    warn!(url = %url, status, "HTTP endpoint returned an error status");
                    (
                        AdapterResult::failed(
                            PROTOCOL,
                            ErrorCode::HttpError,
                            format!("HTTP {status}"),
                            timing,
                        )
                        .with_data(data),
                        sent,
                        received as u64,
                    )
                }
            }
        };

        self.stats
            .record_exchange(result.success, result.timing.duration, bytes_out, bytes_in);
        observe(PROTOCOL, &result, bytes_out);
        result
    }

    #[instrument(name = "http_health_check", skip(self))]
    async fn health_check(&self) -> bool {
        let config = self.config();
        let Some(base) = config.base_url.as_deref().filter(|b| !b.is_empty()) else {
            return false;
        };
        let url = format!("{}/health", base.trim_end_matches('/'));
        let deadline = Duration::from_millis(config.health_timeout_ms);
        match tokio::time::timeout(deadline, self.client.get(&url).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                debug!(url = %url, error = %e, "health probe failed");
                false
            }
            Err(_) => false,
        }
    }

    fn configure(&self, partial: &Value) -> Result<(), ContractError> {
        let mut slot = self.config.write();
        let next = merge_settings(DistributorKind::Http, &**slot, partial)?;
        if let Some(base) = next.base_url.as_deref() {
            if !matches!(url_scheme(base).as_deref(), Some("http" | "https")) {
                return Err(ContractError::config_validation(
                    "http.base_url",
                    format!("'{base}' is not an http(s) URL"),
                ));
            }
        }
        *slot = Arc::new(next);
        Ok(())
    }

    fn stats(&self) -> DistributorStats {
        DistributorStats::clone(&self.stats.snapshot())
    }
}
