//! Tables command - List syncable tables
//!
//! Shows every candidate table with its category, whether it is synced,
//! and local/remote row counts. `--detect` additionally reports remote
//! tables the local database has never seen.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use tidepool_core::ports::ILocalStore;
use tidepool_store::SqliteLocalStore;

use crate::app::App;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct TablesCommand {
    /// Also list remote tables that are missing locally
    #[arg(long)]
    pub detect: bool,
}

fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

impl TablesCommand {
    pub async fn execute(&self, app: &App, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let pool = app.open_database().await?;
        let remote = app.remote()?;
        let registry = app.registry(remote)?;
        let local: Arc<dyn ILocalStore> = Arc::new(SqliteLocalStore::new(pool.pool().clone()));

        let report = registry.table_report(local.as_ref()).await;
        let new_tables = if self.detect {
            Some(registry.detect_new_tables(local.as_ref()).await?)
        } else {
            None
        };

        if format.is_json() {
            let json = serde_json::json!({
                "discovery": registry.mode(),
                "tables": report,
                "new_tables": new_tables,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        let included = report.iter().filter(|t| t.included).count() as u64;
        formatter.success(&format!(
            "{} syncable ({} known)",
            plural(included, "table"),
            report.len()
        ));
        formatter.info("");
        formatter.info(&format!(
            "{:<24} {:<9} {:>8} {:>8} {:>8}",
            "TABLE", "CATEGORY", "LOCAL", "PENDING", "REMOTE"
        ));
        for table in &report {
            let name = if table.included {
                table.name.clone()
            } else {
                format!("{} (excluded)", table.name)
            };
            formatter.info(&format!(
                "{:<24} {:<9} {:>8} {:>8} {:>8}",
                name,
                table.category,
                count(table.local_rows),
                count(table.pending_rows),
                count(table.remote_rows)
            ));
        }

        if let Some(new_tables) = new_tables {
            formatter.info("");
            if new_tables.is_empty() {
                formatter.success("No new remote tables");
            } else {
                formatter.warn(&format!(
                    "{} on the backend but not local:",
                    plural(new_tables.len() as u64, "table")
                ));
                for name in &new_tables {
                    formatter.info(&format!("  {name}"));
                }
            }
        }

        Ok(())
    }
}
