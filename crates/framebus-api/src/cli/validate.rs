//! `fbus validate`: run one raw message through the envelope decoder.

use std::path::Path;

use anyhow::{bail, Context, Result};
use console::style;
use serde_json::json;
use tokio::io::AsyncReadExt;

use framebus_core::message::envelope::{self, Decoded};

pub async fn run(file: Option<&Path>, json_output: bool) -> Result<()> {
    let raw = read_input(file).await?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("input is not valid JSON")?;
    let decoded = envelope::validate(&value);

    if json_output {
        let report = match &decoded {
            Decoded::Valid(env) => json!({ "outcome": "valid", "envelope": env }),
            Decoded::Foreign => json!({ "outcome": "foreign" }),
            Decoded::Malformed(err) => json!({ "outcome": "malformed", "reason": err.to_string() }),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        match &decoded {
            Decoded::Valid(env) => {
                println!("  {} valid envelope", style("✓").green().bold());
                println!();
                println!("  Type:        {}", style(&env.message_type).bold());
                println!("  Origin:      {}", style(&env.origin).cyan());
                println!("  Destination: {}", style(&env.destination).cyan());
                if let Some(cid) = env.correlation() {
                    println!("  Correlation: {}", style(cid).dim());
                }
                println!("  Protocol:    {}", env.protocol_version);
            }
            Decoded::Foreign => {
                println!(
                    "  {} foreign message (not part of this protocol, ignored)",
                    style("○").yellow().bold()
                );
            }
            Decoded::Malformed(err) => {
                println!("  {} malformed envelope: {err}", style("✗").red().bold());
            }
        }
        println!();
    }

    if let Decoded::Malformed(err) = decoded {
        bail!("malformed envelope: {err}");
    }
    Ok(())
}

async fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}
