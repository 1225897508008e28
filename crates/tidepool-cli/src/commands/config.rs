//! Config command - View and manage Tidepool configuration
//!
//! Provides the `tidepool config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration file and reports errors
//! 3. Writes a default configuration file

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use tidepool_core::config::{Config, ValidationError};

use crate::app::App;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Validate configuration file
    Validate,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    /// Execute the config command
    pub async fn execute(&self, app: &App, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(app, format),
            ConfigCommand::Validate => execute_validate(&app.config_path, format),
            ConfigCommand::Init { force } => execute_init(&app.config_path, *force, format),
        }
    }
}

fn execute_show(app: &App, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    info!(config_path = %app.config_path.display(), "Showing configuration");

    // The API key never leaves the process in clear text
    let mut config = app.config.clone();
    if !config.remote.api_key.is_empty() {
        config.remote.api_key = "********".to_string();
    }

    if format.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
    } else {
        formatter.success(&format!("Configuration ({})", app.config_path.display()));
        formatter.info("");
        for line in config.to_yaml()?.lines() {
            formatter.info(line);
        }
    }
    Ok(())
}

/// Outcome of validating a configuration file
#[derive(Debug)]
enum Validation {
    Missing,
    Unparseable(String),
    Checked(Vec<ValidationError>),
}

fn validate_file(path: &Path) -> Validation {
    if !path.exists() {
        return Validation::Missing;
    }
    match Config::load(path) {
        Ok(config) => Validation::Checked(config.validate()),
        Err(e) => Validation::Unparseable(e.to_string()),
    }
}

fn execute_validate(path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    info!(config_path = %path.display(), "Validating configuration");

    let errors: Vec<String> = match validate_file(path) {
        Validation::Missing => {
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": path.display().to_string(),
                    "errors": ["Configuration file not found. Using defaults."],
                }));
            } else {
                formatter.info(&format!("Configuration file not found at {}", path.display()));
                formatter.info("Using default configuration. Run 'tidepool config init' to create one.");
            }
            return Ok(());
        }
        Validation::Unparseable(e) => vec![format!("Failed to parse configuration: {e}")],
        Validation::Checked(errors) => errors.iter().map(ToString::to_string).collect(),
    };

    if format.is_json() {
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": path.display().to_string(),
            "errors": errors,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {error}"));
        }
    }
    Ok(())
}

/// Writes `Config::default()` to `path`
fn write_default(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml = Config::default().to_yaml()?;
    std::fs::write(path, yaml).context("Failed to write configuration file")?;
    Ok(())
}

fn execute_init(path: &Path, force: bool, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    write_default(path, force)?;
    info!(config_path = %path.display(), "Wrote default configuration");

    if format.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "config_path": path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Wrote {}", path.display()));
        formatter.info("Set remote.base_url and remote.api_key before running 'tidepool sync'.");
    }
    Ok(())
}
