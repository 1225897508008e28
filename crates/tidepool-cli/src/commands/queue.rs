//! Queue command - Inspect and replay the offline request queue

use anyhow::Result;
use clap::Subcommand;
use tracing::info;

use tidepool_queue::ReplayOutcome;

use crate::app::App;
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Show how many requests are waiting
    Status,
    /// Replay every due request now
    Process,
    /// Delete every queued request
    Clear {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
}

impl QueueCommand {
    pub async fn execute(&self, app: &App, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let pool = app.open_database().await?;
        let queue = app.queue(&pool);

        match self {
            QueueCommand::Status => {
                let status = queue.get_queue_status().await?;
                if format.is_json() {
                    formatter.print_json(&serde_json::to_value(&status)?);
                } else if status.queued_requests == 0 {
                    formatter.success("Request queue is empty");
                } else {
                    formatter.success(&format!(
                        "{} queued",
                        plural(status.queued_requests, "request")
                    ));
                    if let Some(oldest) = status.oldest {
                        formatter.field("Oldest", &oldest.to_rfc3339());
                    }
                }
            }
            QueueCommand::Process => {
                info!("Replaying request queue");
                match queue.process_queue().await? {
                    ReplayOutcome::Completed(summary) => {
                        if format.is_json() {
                            formatter.print_json(&serde_json::to_value(&summary)?);
                        } else {
                            formatter.success(&format!(
                                "Replayed {} ({} sent)",
                                plural(summary.attempted, "request"),
                                summary.sent
                            ));
                            formatter.field("Will retry", &summary.retried.to_string());
                            formatter.field("Dropped", &summary.dropped.to_string());
                            formatter.field("Not yet due", &summary.deferred.to_string());
                        }
                    }
                    ReplayOutcome::AlreadyRunning => {
                        formatter.warn("A queue replay is already running");
                    }
                    ReplayOutcome::Offline => {
                        formatter.warn("Offline, nothing replayed");
                    }
                }
            }
            QueueCommand::Clear { yes } => {
                if !yes {
                    let status = queue.get_queue_status().await?;
                    anyhow::bail!(
                        "Refusing to delete {} without --yes",
                        plural(status.queued_requests, "queued request")
                    );
                }
                let removed = queue.clear_queue().await?;
                if format.is_json() {
                    formatter.print_json(&serde_json::json!({ "removed": removed }));
                } else {
                    formatter.success(&format!("Removed {}", plural(removed, "request")));
                }
            }
        }

        Ok(())
    }
}
