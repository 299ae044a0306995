//! `fbus config`: show the configuration a bus would start with.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::json;

use framebus_infra::config::{load_bus_config, resolve_config_path, try_load_bus_config};
use framebus_types::config::BusConfig;

/// Load the bus config from `explicit` or the default location.
///
/// Lenient by default (defaults on any problem); `strict` surfaces errors.
pub async fn load(explicit: Option<&Path>, strict: bool) -> Result<BusConfig> {
    let path = resolve_config_path(explicit);
    if strict {
        try_load_bus_config(&path)
            .await
            .with_context(|| format!("cannot use {}", path.display()))
    } else {
        Ok(load_bus_config(&path).await)
    }
}

pub async fn show(explicit: Option<&Path>, strict: bool, json_output: bool) -> Result<()> {
    let path = resolve_config_path(explicit);
    let config = load(explicit, strict).await?;

    if json_output {
        let out = json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Context").bold(),
        style(format!("{} ({})", config.display_label(), config.context_id)).cyan()
    );
    println!(
        "  Source:       {}{}",
        style(path.display()).dim(),
        if path.exists() { "" } else { " (not found, defaults)" }
    );
    println!(
        "  Confirmation: {} ms{}",
        config.confirmation_timeout_ms,
        if config.silent_timeouts { ", silent" } else { "" }
    );
    println!(
        "  Retry:        {} attempt(s), {} ms base, x{}",
        config.retry.max_attempts, config.retry.base_delay_ms, config.retry.backoff_factor
    );
    println!();

    if config.peers.is_empty() {
        println!("  {} No peers configured.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Peer").fg(Color::White),
        Cell::new("Label").fg(Color::White),
    ]);
    for peer in &config.peers {
        table.add_row(vec![
            Cell::new(&peer.id).fg(Color::Cyan),
            Cell::new(&peer.label),
        ]);
    }
    println!("{table}");
    println!();

    Ok(())
}
