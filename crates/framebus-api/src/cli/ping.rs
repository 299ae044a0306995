//! `fbus ping`: one confirmation round between two contexts of the kiosk.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use console::style;

use framebus_core::message::ConfirmOptions;
use framebus_types::config::BusConfig;
use framebus_types::message::{Destination, Payload};

use super::sandbox::{ping_once, with_default_frames, PingOutcome, Sandbox};

pub struct PingArgs {
    pub from: Option<String>,
    pub to: String,
    pub message_type: String,
    pub payload: Option<String>,
    pub timeout_ms: Option<u64>,
    pub silent: bool,
    pub no_reply: bool,
}

pub async fn run(config: BusConfig, args: PingArgs, json: bool) -> Result<()> {
    let config = with_default_frames(config);
    let payload = parse_payload(args.payload.as_deref())?;
    let destination = Destination::from(args.to.as_str());

    let mut options = ConfirmOptions::new(
        args.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.confirmation_timeout()),
    );
    if args.silent || config.silent_timeouts {
        options = options.silent();
    }

    let mute = if args.no_reply {
        vec![args.to.clone()]
    } else {
        Vec::new()
    };
    let sandbox = Sandbox::start(&config, &mute).await?;
    let from = args.from.as_deref().unwrap_or(&config.context_id);
    let Some(bus) = sandbox.bus(from) else {
        sandbox.shutdown().await;
        bail!("unknown sending context '{from}'");
    };

    let row = ping_once(bus, destination, &args.message_type, payload, options).await;
    sandbox.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&row)?);
    } else {
        println!();
        match row.outcome {
            PingOutcome::Confirmed => {
                println!(
                    "  {} {} confirmed {} in {} ms",
                    style("✓").green().bold(),
                    style(&row.to).cyan(),
                    style(&args.message_type).bold(),
                    row.round_trip_ms
                );
                if let Some(reply) = &row.reply {
                    println!(
                        "  {}",
                        style(serde_json::to_string(reply)?).dim()
                    );
                }
            }
            PingOutcome::NoReply => {
                println!(
                    "  {} no confirmation from {} after {} ms",
                    style("○").yellow().bold(),
                    style(&row.to).cyan(),
                    row.round_trip_ms
                );
            }
            PingOutcome::Failed => {
                println!(
                    "  {} {}",
                    style("✗").red().bold(),
                    row.error.as_deref().unwrap_or("send failed")
                );
            }
        }
        println!();
    }

    match (row.outcome, row.error) {
        (PingOutcome::Confirmed, _) | (PingOutcome::NoReply, None) => Ok(()),
        (_, Some(error)) => bail!(error),
        (_, None) => bail!("ping failed"),
    }
}

/// Parse `--payload` as a JSON object; absent means empty.
fn parse_payload(raw: Option<&str>) -> Result<Payload> {
    let Some(raw) = raw else {
        return Ok(Payload::new());
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--payload is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--payload must be a JSON object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_must_be_an_object() {
        assert!(parse_payload(None).unwrap().is_empty());
        assert_eq!(parse_payload(Some(r#"{"poi": 12}"#)).unwrap()["poi"], 12);
        assert!(parse_payload(Some("[1, 2]")).is_err());
        assert!(parse_payload(Some("not json")).is_err());
    }
}
