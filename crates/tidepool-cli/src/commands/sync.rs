//! Sync command - Run a sync pass
//!
//! Pushes pending local rows of every syncable table (or only the tables
//! named with `--table`) and pulls remote rows back when `sync.pull_remote`
//! is enabled.

use anyhow::Result;
use clap::Args;
use tracing::info;

use tidepool_core::domain::SyncError;
use tidepool_sync::{SyncOutcome, SyncReport};

use crate::app::App;
use crate::output::{format_duration_ms, get_formatter, plural, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only sync this table (can be repeated)
    #[arg(long = "table", value_name = "NAME")]
    pub tables: Vec<String>,
}

impl SyncCommand {
    pub async fn execute(&self, app: &App, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let pool = app.open_database().await?;
        let remote = app.remote()?;
        let orchestrator = app.orchestrator(&pool, remote)?;

        if !format.is_json() {
            formatter.info(&format!("Syncing with {}...", app.config.remote.base_url));
        }
        info!(tables = ?self.tables, "Starting sync pass");

        let result = if self.tables.is_empty() {
            orchestrator.sync_all().await
        } else {
            orchestrator.sync_selected(&self.tables).await
        };

        match result {
            Ok(SyncOutcome::Completed(report)) => {
                print_report(formatter.as_ref(), format, &report);
                Ok(())
            }
            Ok(SyncOutcome::AlreadyRunning) => {
                formatter.warn("A sync pass is already running");
                Ok(())
            }
            Err(SyncError::PartialFailure { failed_tables }) => {
                if let Some(report) = orchestrator.last_report() {
                    print_report(formatter.as_ref(), format, &report);
                }
                anyhow::bail!(
                    "Sync failed for {}: {}",
                    plural(failed_tables.len() as u64, "table"),
                    failed_tables.join(", ")
                )
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn print_report(formatter: &dyn OutputFormatter, format: OutputFormat, report: &SyncReport) {
    if format.is_json() {
        match serde_json::to_value(report) {
            Ok(json) => formatter.print_json(&json),
            Err(e) => formatter.error(&format!("Failed to serialize report: {e}")),
        }
        return;
    }

    for table in &report.tables {
        match &table.error {
            None => formatter.info(&format!(
                "{:<24} pushed {:>5}  pulled {:>5}  skipped {:>3}",
                table.table, table.pushed, table.pulled, table.skipped
            )),
            Some(error) => formatter.info(&format!("{:<24} FAILED: {}", table.table, error)),
        }
    }

    if report.is_success() {
        formatter.success(&format!(
            "Synced {} in {} ({} pushed, {} pulled)",
            plural(report.tables.len() as u64, "table"),
            format_duration_ms(report.duration_ms),
            report.records_pushed(),
            report.records_pulled()
        ));
    }
}
