use std::sync::Arc;

use anyhow::{Context, Result};
use chatgate::{
    Channel, ChannelEdit, ChannelEditor, ChannelId, Config, DrainMode, EditOutcome, GuildId,
    LoopbackTransport, Method, Overwrite, PendingChannelEdit, Permissions, PrincipalId,
};
use chatgate_scheduler::{metrics as scheduler_metrics, ManualClock, SchedulerEvent};
use clap::Args;
use permissions_broker::{InMemoryCapabilities, PermissionsBroker};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

use super::output::{emit_structured, OutputFormat};

const SIM_GUILD: GuildId = GuildId(1);
const SIM_ACTOR: PrincipalId = PrincipalId(2);

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Number of back-to-back name edits to issue
    #[arg(long, default_value_t = 3)]
    pub edits: usize,

    /// Channel id used for the simulated resource
    #[arg(long, default_value = "100")]
    pub channel: ChannelId,

    /// Drain ticks to run after issuing the edits
    #[arg(long, default_value_t = 2)]
    pub ticks: usize,
}

#[derive(Serialize)]
struct SimulationLine {
    elapsed_secs: u64,
    event: String,
}

#[derive(Serialize)]
struct SimulationReport {
    channel: ChannelId,
    issued: usize,
    patches_sent: usize,
    still_queued: usize,
    final_name: Option<String>,
    timeline: Vec<SimulationLine>,
    metrics: scheduler_metrics::SchedulerMetricsSnapshot,
}

/// Drives the editor against a loopback transport on a virtual clock. Time only moves
/// between drain ticks, by one drain interval each.
pub async fn cmd_simulate(args: SimulateArgs, config: &Config, output: OutputFormat) -> Result<()> {
    let throttle = config.throttle_config();
    let transport = Arc::new(LoopbackTransport::new());
    let mut channel = Channel::text(args.channel, SIM_GUILD, "general");
    channel.permission_overwrites = vec![Overwrite::role(
        SIM_GUILD,
        Permissions::MANAGE_CHANNELS,
        Permissions::empty(),
    )];
    transport.seed(channel);

    let capabilities = Arc::new(InMemoryCapabilities::new());
    capabilities.grant_guild(SIM_ACTOR, SIM_GUILD, Permissions::MANAGE_CHANNELS);
    let broker = Arc::new(
        PermissionsBroker::with_audit_capacity(capabilities, config.audit_buffer)
            .with_overwrite_policy(config.overwrite_policy),
    );

    let clock = Arc::new(ManualClock::new());
    let editor = ChannelEditor::builder(SIM_ACTOR, transport.clone(), broker)
        .clock(clock.clone())
        .throttle(throttle.clone())
        .drain_mode(DrainMode::Manual)
        .build()
        .context("Failed to build editor")?;
    editor
        .fetch_channel(args.channel)
        .await
        .context("Failed to seed the cache")?;
    let mut events = editor.subscribe();

    let mut timeline = Vec::new();
    let mut pending: Vec<PendingChannelEdit> = Vec::new();
    for index in 1..=args.edits {
        let name = format!("sim-{index}");
        let outcome = editor
            .edit_channel(args.channel, ChannelEdit::new().name(&name), Some("simulation"))
            .await
            .with_context(|| format!("Edit {index} failed"))?;
        let line = match outcome {
            EditOutcome::Applied(_) => format!("edit {index} ({name}) forwarded"),
            EditOutcome::Deferred { pending: handle, .. } => {
                let line = format!(
                    "edit {index} ({name}) deferred at position {}",
                    handle.position()
                );
                pending.push(handle);
                line
            }
        };
        timeline.push(SimulationLine {
            elapsed_secs: clock.elapsed().as_secs(),
            event: line,
        });
    }

    for tick in 1..=args.ticks {
        clock.advance(throttle.drain_interval);
        let report = editor.drain_tick().await;
        info!(tick, released = report.released.len(), "simulated drain tick");
        timeline.push(SimulationLine {
            elapsed_secs: clock.elapsed().as_secs(),
            event: format!(
                "tick {tick}: {} records remaining{}",
                report.remaining,
                if report.idle { ", cycle stopped" } else { "" }
            ),
        });
        let (received, skipped) = drain_events(&mut events);
        if skipped > 0 {
            timeline.push(SimulationLine {
                elapsed_secs: clock.elapsed().as_secs(),
                event: format!("{skipped} earlier events dropped"),
            });
        }
        for event in &received {
            if let Some(line) = describe(event) {
                timeline.push(SimulationLine {
                    elapsed_secs: clock.elapsed().as_secs(),
                    event: line,
                });
            }
        }
    }

    let still_queued = pending
        .iter_mut()
        .map(|handle| handle.try_result())
        .filter(Option::is_none)
        .count();
    let report = SimulationReport {
        channel: args.channel,
        issued: args.edits,
        patches_sent: transport.count(Method::Patch),
        still_queued,
        final_name: transport.channel(args.channel).and_then(|channel| channel.name),
        timeline,
        metrics: scheduler_metrics::snapshot(),
    };

    if emit_structured(output, &report)? {
        return Ok(());
    }

    println!("Simulating {} name edits on channel {}", report.issued, report.channel);
    for line in &report.timeline {
        println!("  [{:>6}s] {}", line.elapsed_secs, line.event);
    }
    println!(
        "PATCH requests sent: {}, still queued: {}, final name: {}",
        report.patches_sent,
        report.still_queued,
        report.final_name.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// Everything currently buffered on the receiver, plus how many events it fell behind by.
fn drain_events(events: &mut broadcast::Receiver<SchedulerEvent>) -> (Vec<SchedulerEvent>, u64) {
    let mut received = Vec::new();
    let mut skipped = 0;
    loop {
        match events.try_recv() {
            Ok(event) => received.push(event),
            Err(TryRecvError::Lagged(count)) => skipped += count,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    (received, skipped)
}

fn describe(event: &SchedulerEvent) -> Option<String> {
    match event {
        SchedulerEvent::Released { edit, .. } => Some(format!("released {edit}")),
        SchedulerEvent::Delivered { edit, .. } => Some(format!("delivered {edit}")),
        SchedulerEvent::Failed { edit, error, .. } => Some(format!("failed {edit}: {error}")),
        SchedulerEvent::Withdrawn { edit, .. } => Some(format!("withdrawn {edit}")),
        SchedulerEvent::WindowClosed { resource } => Some(format!("window closed for {resource}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagging_receiver_keeps_the_newest_events() {
        let (tx, mut rx) = broadcast::channel(2);
        for resource in 1..=5 {
            tx.send(SchedulerEvent::WindowClosed {
                resource: ChannelId(resource),
            })
            .unwrap();
        }

        let (received, skipped) = drain_events(&mut rx);
        assert_eq!(skipped, 3);
        let closed: Vec<_> = received
            .iter()
            .filter_map(|event| match event {
                SchedulerEvent::WindowClosed { resource } => Some(*resource),
                _ => None,
            })
            .collect();
        assert_eq!(closed, vec![ChannelId(4), ChannelId(5)]);
        assert!(drain_events(&mut rx).0.is_empty());
    }
}
