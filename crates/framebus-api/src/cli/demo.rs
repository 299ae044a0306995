//! `fbus demo`: ping every frame, then broadcast a mode change.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;

use framebus_core::message::{ConfirmOptions, SendReport};
use framebus_types::config::{BusConfig, PeerConfig};
use framebus_types::message::{types, Destination, Envelope, Payload};

use super::sandbox::{ping_once, with_default_frames, PingOutcome, PingRow, Sandbox};

#[derive(Serialize)]
struct DemoReport {
    context: String,
    pings: Vec<PingRow>,
    broadcast: SendReport,
    mode_changes_received: usize,
}

pub async fn run(
    config: BusConfig,
    frames: Vec<String>,
    mute: Vec<String>,
    detach: Vec<String>,
    timeout_ms: Option<u64>,
    json_output: bool,
) -> Result<()> {
    let mut config = config;
    if !frames.is_empty() {
        config.peers = frames
            .into_iter()
            .map(|id| PeerConfig {
                label: id.clone(),
                id,
            })
            .collect();
    }
    let config = with_default_frames(config);
    let options = ConfirmOptions::new(
        timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.confirmation_timeout()),
    );

    let sandbox = Sandbox::start(&config, &mute).await?;

    let received = Arc::new(AtomicUsize::new(0));
    for frame in &sandbox.frames {
        let counter = Arc::clone(&received);
        let context = frame.context_id().to_string();
        frame.on_type(types::SYSTEM_MODE_CHANGE, move |env: Envelope| {
            let counter = Arc::clone(&counter);
            let context = context.clone();
            async move {
                tracing::info!(context = %context, mode = ?env.payload.get("mode"), "mode changed");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }

    for id in &detach {
        sandbox.hub.detach(id)?;
    }

    let pings = join_all(config.peers.iter().map(|peer| {
        ping_once(
            &sandbox.root,
            Destination::from(peer.id.as_str()),
            types::SYSTEM_PING,
            Payload::new(),
            options,
        )
    }))
    .await;

    let mut mode = Payload::new();
    mode.insert("mode".to_string(), json!("night"));
    let broadcast = sandbox
        .root
        .send_with_retry(Destination::Broadcast, types::SYSTEM_MODE_CHANGE, mode)
        .await?;

    // Handlers run on the frames' dispatch tasks; give them a moment.
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while received.load(Ordering::SeqCst) < broadcast.delivered {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let report = DemoReport {
        context: config.context_id.clone(),
        pings,
        broadcast,
        mode_changes_received: received.load(Ordering::SeqCst),
    };
    sandbox.shutdown().await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&config, &report);
    Ok(())
}

fn print_report(config: &BusConfig, report: &DemoReport) {
    println!();
    println!(
        "  {} {} with {} frame(s)",
        style("⚡").bold(),
        style(config.display_label()).cyan().bold(),
        config.peers.len()
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Frame").fg(Color::White),
        Cell::new("Ping").fg(Color::White),
        Cell::new("Round trip").fg(Color::White),
        Cell::new("Detail").fg(Color::White),
    ]);

    for row in &report.pings {
        let outcome = match row.outcome {
            PingOutcome::Confirmed => Cell::new("● confirmed").fg(Color::Green),
            PingOutcome::NoReply => Cell::new("○ no reply").fg(Color::Yellow),
            PingOutcome::Failed => Cell::new("✗ failed").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&row.to).fg(Color::Cyan),
            outcome,
            Cell::new(format!("{} ms", row.round_trip_ms)).fg(Color::DarkGrey),
            Cell::new(row.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    println!();

    let broadcast = &report.broadcast;
    let summary = format!(
        "{}/{} delivered in {} attempt(s), {} handled",
        broadcast.delivered, broadcast.attempted, broadcast.attempts, report.mode_changes_received
    );
    if broadcast.is_complete() {
        println!("  {} Broadcast {}: {}", style("✓").green(), types::SYSTEM_MODE_CHANGE, summary);
    } else {
        println!("  {} Broadcast {}: {}", style("✗").red(), types::SYSTEM_MODE_CHANGE, summary);
        for failed in &broadcast.failed {
            println!("      {} {}", style(&failed.id).yellow(), style(&failed.error).dim());
        }
    }
    println!();
}
