//! `info` command implementation.

use anyhow::{Context, Result};
use config_loader::{ConfigManager, DEFAULT_TEMPLATE};
use contracts::SessionConfig;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::cli::InfoArgs;

#[derive(Serialize)]
struct TemplateInfo {
    name: String,
    description: String,
    distributors: Vec<String>,
}

#[derive(Serialize)]
struct InfoOutput {
    templates: Vec<TemplateInfo>,
    resolved_template: String,
    session: SessionConfig,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let manager = ConfigManager::from_process_env();

    let (resolved_template, session) = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration info");
            let loaded = manager
                .load_from_path(path, args.template.as_deref())
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            (loaded.template, loaded.session)
        }
        None => {
            let template = args.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
            let loaded = manager
                .build_session(template, &json!({}))
                .with_context(|| format!("Failed to resolve template '{template}'"))?;
            (loaded.template, loaded.session)
        }
    };

    let templates: Vec<TemplateInfo> = manager
        .registry()
        .iter()
        .map(|t| TemplateInfo {
            name: t.name.clone(),
            description: t.description.clone(),
            distributors: t.distributors.keys().cloned().collect(),
        })
        .collect();

    if args.json {
        let output = InfoOutput {
            templates,
            resolved_template,
            session,
        };
        let json =
            serde_json::to_string_pretty(&output).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_info(&templates, &resolved_template, &session)?;
    }

    Ok(())
}

fn print_info(templates: &[TemplateInfo], resolved: &str, session: &SessionConfig) -> Result<()> {
    println!("=== Templates ===\n");
    for template in templates {
        let marker = if template.name == resolved { "*" } else { " " };
        println!("{marker} {:<10} {}", template.name, template.description);
        println!("             distributors: {}", template.distributors.join(", "));
    }

    println!("\n=== Resolved session ({resolved}) ===\n");
    let toml = ConfigManager::to_toml(session).context("Failed to render session")?;
    println!("{toml}");
    Ok(())
}
