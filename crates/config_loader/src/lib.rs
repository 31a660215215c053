//! # Config Loader
//!
//! Distribution configuration manager.
//!
//! Responsibilities:
//! - Hold the named template registry (environment resolved at construction)
//! - Layer template, session file and explicit overrides with deep merge
//! - Validate the result fail-slow and produce a `SessionConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigManager;
//! use std::path::Path;
//!
//! let manager = ConfigManager::from_process_env();
//! let loaded = manager.load_from_path(Path::new("session.toml"), None).unwrap();
//! println!("session: {}", loaded.session.session_id);
//! ```

mod parser;
mod template;
mod validator;

pub use contracts::SessionConfig;
pub use crate::parser::{ConfigFormat, SessionFile};
pub use crate::template::{
    ConfigTemplate, EnvSource, MapEnv, ProcessEnv, TemplateRegistry, ENV_HTTP_BASE_URL,
    ENV_HTTP_ENDPOINT, ENV_MQTT_BROKER, ENV_SSE_PORT, ENV_UDP_HOST, ENV_UDP_PORT, ENV_WS_HOST,
    ENV_WS_PORT,
};
pub use crate::validator::{validate, ValidationReport};

use contracts::{merge_layers, ContractError, DiscoveryConfig, ValidationIssue};
use serde_json::Value;
use std::path::Path;

/// Template used when neither the caller nor the file names one
pub const DEFAULT_TEMPLATE: &str = "default";

/// A validated session plus the warnings found on the way
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub template: String,
    pub session: SessionConfig,
    pub warnings: Vec<ValidationIssue>,
}

/// A resolved but unvalidated session with its validation report
#[derive(Debug, Clone)]
pub struct InspectedSession {
    pub template: String,
    pub session: SessionConfig,
    pub report: ValidationReport,
}

/// Configuration manager
#[derive(Debug, Clone)]
pub struct ConfigManager {
    registry: TemplateRegistry,
}

impl ConfigManager {
    pub fn new(registry: TemplateRegistry) -> Self {
        Self { registry }
    }

    /// Built-in templates resolved against the process environment
    pub fn from_process_env() -> Self {
        Self::new(TemplateRegistry::builtin(&ProcessEnv))
    }

    /// Built-in templates resolved against `env`
    pub fn with_env(env: &dyn EnvSource) -> Self {
        Self::new(TemplateRegistry::builtin(env))
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.registry
    }

    /// Template with explicit overrides layered on top
    ///
    /// # Errors
    /// - Unknown template
    /// - Merged tree does not have the session shape
    /// - Validation failure (all issues listed)
    pub fn build_session(
        &self,
        template: &str,
        overrides: &Value,
    ) -> Result<LoadedSession, ContractError> {
        self.build_layers(template, &[overrides])
    }

    /// Load a session file from disk
    ///
    /// Format is detected from the extension (.toml / .json). `template`
    /// overrides the file's own `template` key.
    pub fn load_from_path(
        &self,
        path: &Path,
        template: Option<&str>,
    ) -> Result<LoadedSession, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        self.load_from_str(&content, format, template)
    }

    /// Load a session from a string
    pub fn load_from_str(
        &self,
        content: &str,
        format: ConfigFormat,
        template: Option<&str>,
    ) -> Result<LoadedSession, ContractError> {
        let file = parser::parse(content, format)?;
        let name = template
            .or(file.template.as_deref())
            .unwrap_or(DEFAULT_TEMPLATE)
            .to_string();
        self.build_layers(&name, &[&file.overlay])
    }

    /// Load a session file and apply explicit overrides above it
    pub fn load_with_overrides(
        &self,
        path: &Path,
        template: Option<&str>,
        overrides: &Value,
    ) -> Result<LoadedSession, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let file = parser::parse(&content, format)?;
        let name = template
            .or(file.template.as_deref())
            .unwrap_or(DEFAULT_TEMPLATE)
            .to_string();
        self.build_layers(&name, &[&file.overlay, overrides])
    }

    /// Resolve a session file and report every issue without failing on them
    ///
    /// # Errors
    /// Only read, parse and template lookup failures; validation findings
    /// are returned in the report.
    pub fn inspect_path(
        &self,
        path: &Path,
        template: Option<&str>,
    ) -> Result<InspectedSession, ContractError> {
        let format = Self::detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let file = parser::parse(&content, format)?;
        let name = template
            .or(file.template.as_deref())
            .unwrap_or(DEFAULT_TEMPLATE)
            .to_string();
        let (session, shape_issues) = self.resolve(&name, &[&file.overlay])?;
        let mut report = self.validate(&session);
        report.errors.splice(0..0, shape_issues);
        Ok(InspectedSession {
            template: name,
            session,
            report,
        })
    }

    /// Validate without building
    pub fn validate(&self, session: &SessionConfig) -> ValidationReport {
        crate::validator::validate(session)
    }

    /// Merge and parse without validating, for inspection tools.
    ///
    /// Session-level keys with the wrong shape fall back to their defaults.
    pub fn resolve_unchecked(
        &self,
        template: &str,
        overrides: &Value,
    ) -> Result<SessionConfig, ContractError> {
        self.resolve(template, &[overrides]).map(|(session, _)| session)
    }

    /// Serialize a session to TOML
    pub fn to_toml(session: &SessionConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(session)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize a session to JSON
    pub fn to_json(session: &SessionConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(session)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigManager {
    fn build_layers(
        &self,
        template: &str,
        layers: &[&Value],
    ) -> Result<LoadedSession, ContractError> {
        let (session, shape_issues) = self.resolve(template, layers)?;
        let mut report = crate::validator::validate(&session);
        report.errors.splice(0..0, shape_issues);
        let warnings = report.into_result()?;
        Ok(LoadedSession {
            template: template.to_string(),
            session,
            warnings,
        })
    }

    /// Merge `layers` over the template and read the session out of the tree
    fn resolve(
        &self,
        template: &str,
        layers: &[&Value],
    ) -> Result<(SessionConfig, Vec<ValidationIssue>), ContractError> {
        let base = self.registry.get(template)?.to_session_value();
        let merged = merge_layers(std::iter::once(&base).chain(layers.iter().copied()));
        Ok(Self::into_session(merged))
    }

    /// Read each session key on its own so one bad key does not hide the rest
    fn into_session(merged: Value) -> (SessionConfig, Vec<ValidationIssue>) {
        let mut session = SessionConfig::default();
        let mut issues = Vec::new();

        let Value::Object(tree) = merged else {
            issues.push(ValidationIssue::new("session", "expected a table of settings"));
            return (session, issues);
        };

        for (key, value) in tree {
            match key.as_str() {
                "session_id" => match value {
                    Value::String(id) => session.session_id = id,
                    Value::Null => {}
                    other => issues.push(shape_issue("session_id", "a string", &other)),
                },
                "distributors" => match value {
                    Value::Object(map) => session.distributors = map.into_iter().collect(),
                    Value::Null => {}
                    other => issues.push(shape_issue("distributors", "a table", &other)),
                },
                "event_routing" => match value {
                    Value::Object(map) => {
                        for (pattern, names) in map {
                            match serde_json::from_value::<Vec<String>>(names) {
                                Ok(names) => {
                                    session.event_routing.insert(pattern, names);
                                }
                                Err(e) => issues.push(ValidationIssue::new(
                                    format!("event_routing.{pattern}"),
                                    e.to_string(),
                                )),
                            }
                        }
                    }
                    Value::Null => {}
                    other => issues.push(shape_issue("event_routing", "a table", &other)),
                },
                "enabled_distributors" => {
                    match serde_json::from_value::<Option<Vec<String>>>(value) {
                        Ok(names) => session.enabled_distributors = names,
                        Err(e) => issues.push(ValidationIssue::new(
                            "enabled_distributors",
                            e.to_string(),
                        )),
                    }
                }
                "discovery" => match value {
                    Value::Object(map) => {
                        session.discovery = Some(read_discovery(map, &mut issues));
                    }
                    Value::Null => {}
                    other => issues.push(shape_issue("discovery", "a table", &other)),
                },
                // `template` and unknown keys are not part of the session
                _ => {}
            }
        }

        if session.session_id.is_empty() {
            session.session_id = format!("session-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"));
        }
        (session, issues)
    }

    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }
}

fn shape_issue(field: &str, expected: &str, found: &Value) -> ValidationIssue {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a table",
    };
    ValidationIssue::new(field, format!("expected {expected}, found {found}"))
}

/// Discovery settings read key by key; bad keys keep their defaults
fn read_discovery(
    map: serde_json::Map<String, Value>,
    issues: &mut Vec<ValidationIssue>,
) -> DiscoveryConfig {
    let mut accepted = serde_json::Map::new();
    for (key, value) in map {
        let single = Value::Object([(key.clone(), value.clone())].into_iter().collect());
        match serde_json::from_value::<DiscoveryConfig>(single) {
            Ok(_) => {
                accepted.insert(key, value);
            }
            Err(e) => issues.push(ValidationIssue::new(format!("discovery.{key}"), e.to_string())),
        }
    }
    serde_json::from_value(Value::Object(accepted)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn manager() -> ConfigManager {
        ConfigManager::with_env(&MapEnv::default())
    }

    #[test]
    fn test_build_from_template_with_overrides() {
        let loaded = manager()
            .build_session(
                "default",
                &json!({
                    "session_id": "s1",
                    "distributors": {"http": {"timeout_ms": 250}}
                }),
            )
            .unwrap();
        let http = &loaded.session.distributors["http"];
        assert_eq!(http["timeout_ms"], json!(250));
        assert_eq!(http["base_url"], json!("http://localhost:3000"));
        assert_eq!(loaded.session.session_id, "s1");
        assert_eq!(loaded.template, "default");
    }

    #[test]
    fn test_empty_override_is_identity() {
        let m = manager();
        let loaded = m.build_session("realtime", &json!({})).unwrap();
        let template = m.registry().get("realtime").unwrap().to_session_value();

        let distributors: std::collections::BTreeMap<String, Value> =
            serde_json::from_value(template["distributors"].clone()).unwrap();
        let routes: std::collections::BTreeMap<String, Vec<String>> =
            serde_json::from_value(template["event_routing"].clone()).unwrap();
        assert!(!distributors.is_empty());
        assert_eq!(loaded.session.distributors, distributors);
        assert_eq!(loaded.session.event_routing, routes);
    }

    #[test]
    fn test_override_array_replaces_targets() {
        let loaded = manager()
            .build_session(
                "realtime",
                &json!({"distributors": {"udp": {"targets": [{"host": "10.0.0.1", "port": 9}]}}}),
            )
            .unwrap();
        assert_eq!(
            loaded.session.distributors["udp"]["targets"],
            json!([{"host": "10.0.0.1", "port": 9}])
        );
    }

    #[test]
    fn test_unknown_template() {
        let err = manager().build_session("missing", &json!({})).unwrap_err();
        assert!(matches!(err, ContractError::UnknownTemplate { .. }));
    }

    #[test]
    fn test_invalid_override_reports_every_issue() {
        let err = manager()
            .build_session(
                "default",
                &json!({"distributors": {
                    "http": {"base_url": "localhost"},
                    "websocket": {"port": 0}
                }}),
            )
            .unwrap_err();
        match err {
            ContractError::ConfigInvalid { issues } => assert_eq!(issues.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_session_shape_errors_do_not_hide_distributor_issues() {
        let err = manager()
            .build_session(
                "default",
                &json!({
                    "distributors": {"websocket": {"port": 0}},
                    "discovery": {"port": "x", "interval_ms": 1000},
                    "event_routing": {"alerts": "websocket"},
                    "enabled_distributors": 3
                }),
            )
            .unwrap_err();
        let ContractError::ConfigInvalid { issues } = err else {
            panic!("expected ConfigInvalid, got {err:?}");
        };
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        for field in [
            "discovery.port",
            "event_routing.alerts",
            "enabled_distributors",
            "distributors.websocket.port",
        ] {
            assert!(fields.contains(&field), "{field} missing from {fields:?}");
        }
        assert!(!fields.contains(&"discovery.interval_ms"));
    }

    #[test]
    fn test_inspect_lists_shape_errors() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"session_id": 5, "distributors": {{"sse": {{"port": 70000}}}}}}"#).unwrap();
        let inspected = manager().inspect_path(file.path(), None).unwrap();
        let fields: Vec<&str> = inspected
            .report
            .errors
            .iter()
            .map(|i| i.field.as_str())
            .collect();
        assert_eq!(fields[0], "session_id");
        assert!(fields.contains(&"distributors.sse.port"), "{fields:?}");
    }

    #[test]
    fn test_env_port_error_surfaces_at_validation() {
        let env = MapEnv::new([(ENV_WS_PORT, "not-a-port")]);
        let err = ConfigManager::with_env(&env)
            .build_session("default", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ContractError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_load_from_path_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
template = "legacy"
session_id = "bench"

[distributors.udp]
port = 5151
"#
        )
        .unwrap();

        let loaded = manager().load_from_path(file.path(), None).unwrap();
        assert_eq!(loaded.template, "legacy");
        assert_eq!(loaded.session.distributors["udp"]["port"], json!(5151));
        assert_eq!(loaded.session.distributors["udp"]["broadcast"], json!(true));
        assert_eq!(loaded.session.discovery.as_ref().map(|d| d.port), Some(8083));
    }

    #[test]
    fn test_template_argument_beats_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"template": "legacy"}}"#).unwrap();
        let loaded = manager()
            .load_from_path(file.path(), Some("realtime"))
            .unwrap();
        assert_eq!(loaded.template, "realtime");
        assert!(loaded.session.distributors.contains_key("sse"));
    }

    #[test]
    fn test_load_with_overrides_layers_last() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[distributors.sse]\nport = 9001\n").unwrap();
        let loaded = manager()
            .load_with_overrides(
                file.path(),
                None,
                &json!({"distributors": {"sse": {"port": 9002}}}),
            )
            .unwrap();
        assert_eq!(loaded.session.distributors["sse"]["port"], json!(9002));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = manager().load_from_path(file.path(), None).unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_inspect_reports_instead_of_failing() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[distributors.websocket]\nport = 0").unwrap();
        let inspected = manager().inspect_path(file.path(), None).unwrap();
        assert_eq!(inspected.template, "default");
        assert!(!inspected.report.is_valid());
        assert!(inspected
            .report
            .errors
            .iter()
            .any(|issue| issue.field == "distributors.websocket.port"));
    }

    #[test]
    fn test_generated_session_id() {
        let loaded = manager().build_session("default", &json!({})).unwrap();
        assert!(loaded.session.session_id.starts_with("session-"));
    }

    #[test]
    fn test_round_trip_toml() {
        let loaded = manager().build_session("realtime", &json!({})).unwrap();
        let text = ConfigManager::to_toml(&loaded.session).unwrap();
        let again = manager()
            .load_from_str(&text, ConfigFormat::Toml, Some("realtime"))
            .unwrap();
        assert_eq!(again.session.distributors, loaded.session.distributors);
        assert_eq!(again.session.session_id, loaded.session.session_id);
    }
}
