//! Status command - Show local sync state
//!
//! Reports pending rows per table, the offline request queue and the
//! cache without contacting the backend.

use anyhow::Result;
use clap::Args;

use tidepool_core::ports::ILocalStore;
use tidepool_store::SqliteLocalStore;

use crate::app::App;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(&self, app: &App, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let pool = app.open_database().await?;
        let local = SqliteLocalStore::new(pool.pool().clone());

        let mut tables = Vec::new();
        for name in local.table_names().await? {
            let total = local.count(&name, false).await?;
            let pending = local.count(&name, true).await?;
            tables.push((name, total, pending));
        }
        let pending_total: u64 = tables.iter().map(|(_, _, p)| p).sum();

        let queue = app.queue(&pool).get_queue_status().await?;

        let cache = app.cache(&pool);
        if cache.is_persistent() {
            cache.restore().await?;
        }
        let cache_stats = cache.stats();

        if format.is_json() {
            let json = serde_json::json!({
                "database": app.config.storage.database_path.display().to_string(),
                "remote": app.config.remote.base_url,
                "pending_records": pending_total,
                "tables": tables
                    .iter()
                    .map(|(name, total, pending)| serde_json::json!({
                        "name": name,
                        "records": total,
                        "pending": pending,
                    }))
                    .collect::<Vec<_>>(),
                "queue": queue,
                "caches": cache_stats,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        if pending_total == 0 {
            formatter.success("Everything is synced");
        } else {
            formatter.warn(&format!(
                "{} waiting to be pushed",
                plural(pending_total, "record")
            ));
        }
        formatter.field("Database", &app.config.storage.database_path.display().to_string());
        formatter.field(
            "Backend",
            if app.config.remote.base_url.is_empty() {
                "(not configured)"
            } else {
                app.config.remote.base_url.as_str()
            },
        );

        formatter.info("");
        formatter.info("Tables:");
        if tables.is_empty() {
            formatter.info("  (none registered yet)");
        }
        for (name, total, pending) in &tables {
            formatter.info(&format!("  {:<24} {:>8} rows  {:>6} pending", name, total, pending));
        }

        formatter.info("");
        formatter.field("Queued requests", &queue.queued_requests.to_string());
        if let Some(oldest) = queue.oldest {
            formatter.field("Oldest queued", &oldest.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        }

        formatter.info("");
        formatter.info("Caches:");
        for stats in &cache_stats {
            formatter.info(&format!(
                "  {:<12} {:<24} {:>4}/{:<4} ({} expired)",
                stats.name, stats.strategy, stats.entries, stats.max_entries, stats.expired
            ));
        }

        Ok(())
    }
}
