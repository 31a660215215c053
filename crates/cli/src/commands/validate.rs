//! `validate` command implementation.

use anyhow::{Context, Result};
use config_loader::ConfigManager;
use contracts::ValidationIssue;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::error::CliError;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<SessionSummary>,
}

#[derive(Serialize)]
struct SessionSummary {
    session_id: String,
    distributors: Vec<String>,
    routes: usize,
    discovery: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(&ConfigManager::from_process_env(), args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        Err(CliError::ValidationFailed {
            count: result.errors.len().max(1),
        }
        .into())
    }
}

fn validate_config(manager: &ConfigManager, args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();
    let failed = |issue: ValidationIssue| ValidationResult {
        valid: false,
        config_path: config_path.clone(),
        template: None,
        errors: vec![issue],
        warnings: Vec::new(),
        summary: None,
    };

    // Check file exists
    if !args.config.exists() {
        return failed(ValidationIssue::new(
            "config",
            CliError::config_not_found(config_path.clone()).to_string(),
        ));
    }

    let inspected = match manager.inspect_path(&args.config, args.template.as_deref()) {
        Ok(inspected) => inspected,
        Err(e) => return failed(ValidationIssue::new("config", e.to_string())),
    };

    let session = &inspected.session;
    ValidationResult {
        valid: inspected.report.is_valid(),
        config_path: config_path.clone(),
        template: Some(inspected.template.clone()),
        summary: Some(SessionSummary {
            session_id: session.session_id.clone(),
            distributors: session.enabled_names(),
            routes: session.event_routing.len(),
            discovery: session.discovery.as_ref().is_some_and(|d| d.enabled),
        }),
        errors: inspected.report.errors,
        warnings: inspected.report.warnings,
    }
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            if let Some(ref template) = result.template {
                println!("\n  Template: {}", template);
            }
            println!("  Session: {}", summary.session_id);
            println!("  Distributors: {}", summary.distributors.join(", "));
            println!("  Routes: {}", summary.routes);
            println!("  Discovery: {}", if summary.discovery { "on" } else { "off" });
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        for error in &result.errors {
            println!("  - {}: {}", error.field, error.message);
        }
    }

    if !result.warnings.is_empty() {
        println!("\n⚠ Warnings:");
        for warning in &result.warnings {
            println!("  - {}: {}", warning.field, warning.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::MapEnv;
    use std::io::Write;
    use std::path::PathBuf;

    fn args(config: PathBuf) -> ValidateArgs {
        ValidateArgs {
            config,
            template: None,
            json: true,
        }
    }

    fn manager() -> ConfigManager {
        ConfigManager::with_env(&MapEnv::default())
    }

    #[test]
    fn test_valid_file_has_summary() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "template = \"default\"\nsession_id = \"lab\"").unwrap();

        let result = validate_config(&manager(), &args(file.path().to_path_buf()));
        assert!(result.valid, "{:?}", serde_json::to_string(&result.errors));
        assert_eq!(result.template.as_deref(), Some("default"));
        assert_eq!(result.summary.unwrap().session_id, "lab");
    }

    #[test]
    fn test_every_issue_is_listed() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[distributors.websocket]\nport = 0\n\n[distributors.sse]\nport = 70000"
        )
        .unwrap();

        let result = validate_config(&manager(), &args(file.path().to_path_buf()));
        assert!(!result.valid);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"distributors.websocket.port"));
        assert!(fields.contains(&"distributors.sse.port"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&manager(), &args(PathBuf::from("/nonexistent.toml")));
        assert!(!result.valid);
        assert!(result.summary.is_none());
        assert_eq!(result.errors[0].field, "config");
    }
}
