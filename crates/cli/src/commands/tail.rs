// `huddle tail`: connect, subscribe, and print events as they arrive.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use uuid::Uuid;

use huddle_engine::bus::{CollabEvent, ConnectionEvent, JobEvent, MetricEvent, PresenceEvent};
use huddle_engine::presence::UserIdentity;
use huddle_engine::transport::ws::WsTransport;
use huddle_engine::{EngineConfig, RealtimeManager};

use crate::output::{print_output, OutputFormat};

#[derive(Args)]
pub struct TailArgs {
    /// Workspace to follow.
    #[arg(long)]
    pub workspace: Uuid,
    /// Also join this content item's collaboration session.
    #[arg(long)]
    pub content: Option<Uuid>,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: TailArgs) -> Result<()> {
    let config = EngineConfig::load();
    let format = OutputFormat::detect(args.json);

    let manager = RealtimeManager::new(config.clone());
    manager.initialize(WsTransport::new()).context("failed to start the engine")?;

    if let Some(display_name) = config.display_name.clone() {
        manager
            .presence()
            .initialize_user(UserIdentity {
                user_id: format!("cli-{}", Uuid::new_v4().simple()),
                display_name,
                avatar_url: None,
            })
            .await;
    }

    manager.subscribe_to_workspace(args.workspace);
    if let Some(content) = args.content {
        manager.subscribe_to_content(content).await;
    }

    let mut connection_rx = manager.events().subscribe_connection();
    let mut presence_rx = manager.events().subscribe_presence();
    let mut collab_rx = manager.events().subscribe_collab();
    let mut job_rx = manager.events().subscribe_jobs();
    let mut metric_rx = manager.events().subscribe_metrics();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = connection_rx.recv() => {
                let Ok(event) = event else { continue };
                let offline = event == ConnectionEvent::Offline;
                print_connection(format, &event)?;
                if offline {
                    break;
                }
            }

            event = presence_rx.recv() => {
                if let Ok(event) = event {
                    print_presence(format, &event)?;
                }
            }

            event = collab_rx.recv() => {
                if let Ok(event) = event {
                    print_collab(format, &event)?;
                }
            }

            event = job_rx.recv() => {
                if let Ok(event) = event {
                    print_job(format, &event)?;
                }
            }

            event = metric_rx.recv() => {
                if let Ok(event) = event {
                    print_metric(format, &event)?;
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn print_connection(format: OutputFormat, event: &ConnectionEvent) -> Result<()> {
    let value = match event {
        ConnectionEvent::Connected { resumed } => {
            json!({"event": "connected", "resumed": resumed})
        }
        ConnectionEvent::Disconnected { reason } => {
            json!({"event": "disconnected", "reason": reason})
        }
        ConnectionEvent::Offline => json!({"event": "offline"}),
    };
    print_line(format, value)
}

fn print_presence(format: OutputFormat, event: &PresenceEvent) -> Result<()> {
    let value = match event {
        PresenceEvent::Updated(record) => {
            json!({"event": "presence", "record": record})
        }
        PresenceEvent::Left { user_id } => json!({"event": "presence_left", "user_id": user_id}),
        PresenceEvent::Typing { user_id, active, .. } => {
            json!({"event": "typing", "user_id": user_id, "active": active})
        }
    };
    print_line(format, value)
}

fn print_collab(format: OutputFormat, event: &CollabEvent) -> Result<()> {
    let value = match event {
        CollabEvent::ContentJoined { content_id } => {
            json!({"event": "content_joined", "content_id": content_id})
        }
        CollabEvent::ContentLeft { content_id } => {
            json!({"event": "content_left", "content_id": content_id})
        }
        CollabEvent::OperationProcessed { content_id, op } => {
            json!({"event": "operation", "content_id": content_id, "op": op})
        }
        CollabEvent::OperationConfirmed { content_id, op_id } => {
            json!({"event": "operation_confirmed", "content_id": content_id, "op_id": op_id})
        }
    };
    print_line(format, value)
}

fn print_job(format: OutputFormat, event: &JobEvent) -> Result<()> {
    let (name, job) = match event {
        JobEvent::Started(job) => ("job_started", job),
        JobEvent::Updated(job) => ("job_updated", job),
        JobEvent::Completed(job) => ("job_completed", job),
        JobEvent::Failed(job) => ("job_failed", job),
        JobEvent::Cancelled(job) => ("job_cancelled", job),
    };
    print_line(format, json!({"event": name, "job": job}))
}

fn print_metric(format: OutputFormat, event: &MetricEvent) -> Result<()> {
    let value = match event {
        MetricEvent::Flushed { metric_ids } => {
            json!({"event": "metrics_flushed", "metric_ids": metric_ids})
        }
        MetricEvent::ChartUpdated { chart_id } => {
            json!({"event": "chart_updated", "chart_id": chart_id})
        }
    };
    print_line(format, value)
}

fn print_line(format: OutputFormat, value: serde_json::Value) -> Result<()> {
    print_output(format, &value, |v| {
        let event = v["event"].as_str().unwrap_or("event");
        let mut rest = v.clone();
        if let Some(map) = rest.as_object_mut() {
            map.remove("event");
        }
        format!("{event:<20} {rest}")
    })?;
    Ok(())
}
