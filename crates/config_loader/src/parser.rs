//! Session file parsing
//!
//! TOML (primary) and JSON. Files are read into a value tree so they can be
//! layered over a template before the typed `SessionConfig` is built.

use contracts::ContractError;
use serde_json::{Map, Value};

/// Session file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML (recommended)
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A parsed session file: optional template name plus the overlay tree
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFile {
    pub template: Option<String>,
    pub overlay: Value,
}

/// Parse TOML into a value tree
pub fn parse_toml(content: &str) -> Result<Value, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse JSON into a value tree
pub fn parse_json(content: &str) -> Result<Value, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parse a session file according to its format
pub fn parse(content: &str, format: ConfigFormat) -> Result<SessionFile, ContractError> {
    let tree = match format {
        ConfigFormat::Toml => parse_toml(content)?,
        ConfigFormat::Json => parse_json(content)?,
    };
    split_template(tree)
}

fn split_template(tree: Value) -> Result<SessionFile, ContractError> {
    let Value::Object(mut root) = tree else {
        return Err(ContractError::config_parse(
            "session file must be a table/object at the top level",
        ));
    };
    let template = match root.remove("template") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name),
        Some(other) => {
            return Err(ContractError::config_validation(
                "template",
                format!("expected a template name, got {other}"),
            ))
        }
    };
    Ok(SessionFile {
        template,
        overlay: Value::Object(root),
    })
}

impl Default for SessionFile {
    fn default() -> Self {
        Self {
            template: None,
            overlay: Value::Object(Map::new()),
        }
    }
}
