// `huddle publish`: start a publish job and follow it to a terminal state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use uuid::Uuid;

use huddle_common::types::{JobStatus, PublishJob, PublishOptions};
use huddle_engine::bus::JobEvent;
use huddle_engine::transport::ws::WsTransport;
use huddle_engine::{EngineConfig, RealtimeManager};

use crate::output::{print_output, OutputFormat};

#[derive(Args)]
pub struct PublishArgs {
    /// Content item to publish.
    pub content_id: Uuid,
    /// Target platforms, comma separated (e.g. `mastodon,bluesky`).
    #[arg(long, value_delimiter = ',', required = true)]
    pub platforms: Vec<String>,
    /// Defer the publish until this time (RFC 3339).
    #[arg(long)]
    pub schedule_at: Option<DateTime<Utc>>,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: PublishArgs) -> Result<()> {
    let config = EngineConfig::load();
    let format = OutputFormat::detect(args.json);

    let manager = RealtimeManager::new(config);
    manager.initialize(WsTransport::new()).context("failed to start the engine")?;
    manager.subscribe_to_content(args.content_id).await;

    let mut job_rx = manager.events().subscribe_jobs();

    let job = manager
        .publishing()
        .start_publishing(
            args.content_id,
            args.platforms,
            PublishOptions { scheduled_at: args.schedule_at },
        )
        .await
        .context("publish start was not acknowledged")?;
    print_job(format, &job)?;

    if job.status.is_terminal() {
        manager.shutdown().await;
        return Ok(());
    }

    // Follow the job until it reaches a terminal state.
    while let Ok(event) = job_rx.recv().await {
        let updated = match event {
            JobEvent::Updated(updated) => updated,
            _ => continue,
        };
        if updated.id != job.id {
            continue;
        }
        print_job(format, &updated)?;
        if updated.status.is_terminal() {
            break;
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn print_job(format: OutputFormat, job: &PublishJob) -> Result<()> {
    print_output(format, job, |job| {
        let status = match job.status {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Publishing => "publishing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        let mut line = format!("{} {:>3}% {}", job.id, job.progress, status);
        if let Some(error) = &job.error {
            line.push_str(&format!(" ({error})"));
        }
        line
    })?;
    Ok(())
}
