//! Session validation
//!
//! Fail-slow: every check runs and every issue is collected.
//!
//! Rules:
//! - distributor keys are known protocols
//! - fragments deserialize into their typed config and pass field checks
//! - HTTP `base_url` present with `http`/`https`
//! - MQTT `broker_url` with `mqtt`/`mqtts`
//! - UDP multicast group is an IPv4 multicast address
//! - route patterns compile
//!
//! Warnings: oversize UDP limit, UDP without any destination, routing or
//! allow-list entries naming unconfigured distributors.

use std::net::Ipv4Addr;

use contracts::{
    url_scheme, validation_issues, ContractError, DistributorConfig, DistributorKind,
    RoutePattern, SessionConfig, ValidationIssue, MAX_UDP_PAYLOAD,
};
use serde::Serialize;
use validator::{Validate, ValidationErrors};

/// Outcome of one validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(field, message));
    }

    fn warn(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(field, message));
    }

    /// Collapse into a single error when anything failed; warnings pass through
    pub fn into_result(self) -> Result<Vec<ValidationIssue>, ContractError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ContractError::ConfigInvalid {
                issues: self.errors,
            })
        }
    }
}

/// Validate a session; never short-circuits
pub fn validate(session: &SessionConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (name, fragment) in &session.distributors {
        let Some(kind) = DistributorKind::from_name(name) else {
            report.error(
                format!("distributors.{name}"),
                format!(
                    "unknown distributor type (expected one of: {})",
                    DistributorKind::ALL.map(|k| k.as_str()).join(", ")
                ),
            );
            continue;
        };
        match DistributorConfig::parse(kind, fragment) {
            Ok(config) => validate_distributor(name, &config, &mut report),
            Err(e) => report.error(format!("distributors.{name}"), e.to_string()),
        }
    }

    validate_routing(session, &mut report);
    validate_allow_list(session, &mut report);

    if let Some(discovery) = &session.discovery {
        if let Err(errors) = discovery.validate() {
            push_field_errors("discovery", &errors, &mut report);
        }
    }

    report
}

fn validate_distributor(name: &str, config: &DistributorConfig, report: &mut ValidationReport) {
    let prefix = format!("distributors.{name}");
    if let Err(errors) = config.validate_fields() {
        push_field_errors(&prefix, &errors, report);
    }

    match config {
        DistributorConfig::Http(http) => match http.base_url.as_deref() {
            None | Some("") => report.error(format!("{prefix}.base_url"), "base_url is required"),
            Some(url) => match url_scheme(url).as_deref() {
                Some("http" | "https") => {}
                _ => report.error(
                    format!("{prefix}.base_url"),
                    format!("'{url}' is not an http(s) URL"),
                ),
            },
        },
        DistributorConfig::Mqtt(mqtt) => match url_scheme(&mqtt.broker_url).as_deref() {
            Some("mqtt" | "mqtts") => {}
            _ => report.error(
                format!("{prefix}.broker_url"),
                format!("'{}' is not an mqtt(s) URL", mqtt.broker_url),
            ),
        },
        DistributorConfig::Udp(udp) => {
            if udp.max_payload_size > MAX_UDP_PAYLOAD {
                report.warn(
                    format!("{prefix}.max_payload_size"),
                    format!(
                        "{} exceeds the largest UDP datagram ({MAX_UDP_PAYLOAD})",
                        udp.max_payload_size
                    ),
                );
            }
            if udp.has_no_targets() {
                report.warn(
                    prefix.as_str(),
                    "no host, targets, broadcast or multicast configured; sends need per-send targets",
                );
            }
            if let Some(group) = &udp.multicast_group {
                match group.parse::<Ipv4Addr>() {
                    Ok(addr) if addr.is_multicast() => {}
                    _ => report.error(
                        format!("{prefix}.multicast_group"),
                        format!("'{group}' is not an IPv4 multicast address"),
                    ),
                }
            }
        }
        DistributorConfig::WebSocket(_) | DistributorConfig::Sse(_) => {}
    }
}

fn validate_routing(session: &SessionConfig, report: &mut ValidationReport) {
    for (key, names) in &session.event_routing {
        if let Err(e) = RoutePattern::parse(key) {
            report.error(format!("event_routing[{key}]"), e.to_string());
        }
        for name in names {
            if !session.distributors.contains_key(name) {
                report.warn(
                    format!("event_routing[{key}]"),
                    format!("routes to unconfigured distributor '{name}'"),
                );
            }
        }
    }
}

fn validate_allow_list(session: &SessionConfig, report: &mut ValidationReport) {
    let Some(enabled) = &session.enabled_distributors else {
        return;
    };
    for name in enabled {
        if !session.distributors.contains_key(name) {
            report.warn(
                "enabled_distributors",
                format!("'{name}' is enabled but not configured"),
            );
        }
    }
}

fn push_field_errors(prefix: &str, errors: &ValidationErrors, report: &mut ValidationReport) {
    report.errors.extend(validation_issues(prefix, errors));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(distributors: serde_json::Value) -> SessionConfig {
        SessionConfig {
            session_id: "t".into(),
            distributors: serde_json::from_value(distributors).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_session() {
        let s = session(json!({
            "http": {"base_url": "https://hooks.example.test"},
            "websocket": {"port": 8080},
            "udp": {"host": "127.0.0.1"}
        }));
        let report = validate(&s);
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_collects_all_errors() {
        let s = session(json!({
            "http": {},
            "sse": {"port": 70000},
            "mqtt": {"broker_url": "tcp://broker"},
            "kafka": {}
        }));
        let report = validate(&s);
        let fields: Vec<_> = report.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"distributors.http.base_url"));
        assert!(fields.contains(&"distributors.sse.port"));
        assert!(fields.contains(&"distributors.mqtt.broker_url"));
        assert!(fields.contains(&"distributors.kafka"));
        assert_eq!(report.errors.len(), 4);
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let s = session(json!({"http": {"base_url": "ftp://files.example.test"}}));
        let report = validate(&s);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("ftp://"));
    }

    #[test]
    fn test_udp_warnings() {
        let s = session(json!({"udp": {"max_payload_size": 70000}}));
        let report = validate(&s);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_nested_target_port() {
        let s = session(json!({"udp": {"targets": [{"host": "a", "port": 0}]}}));
        let report = validate(&s);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].field.starts_with("distributors.udp.targets[0]"));
    }

    #[test]
    fn test_multicast_group_must_be_multicast() {
        let s = session(json!({"udp": {"multicast_group": "10.0.0.1"}}));
        assert!(!validate(&s).is_valid());
        let s = session(json!({"udp": {"multicast_group": "239.1.2.3"}}));
        assert!(validate(&s).is_valid());
    }

    #[test]
    fn test_dangling_references_warn() {
        let mut s = session(json!({"websocket": {}}));
        s.event_routing
            .insert("alerts".into(), vec!["websocket".into(), "http".into()]);
        s.enabled_distributors = Some(vec!["websocket".into(), "udp".into()]);
        let report = validate(&s);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_into_result_lists_issues() {
        let s = session(json!({"http": {"base_url": "nope"}, "udp": {"port": 0}}));
        let err = validate(&s).into_result().unwrap_err();
        match err {
            ContractError::ConfigInvalid { issues } => assert_eq!(issues.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_idempotent() {
        let s = session(json!({"sse": {"port": 0}}));
        assert_eq!(validate(&s), validate(&s));
    }
}
