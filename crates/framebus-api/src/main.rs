//! framebus CLI entry point.
//!
//! Binary name: `fbus`
//!
//! Parses CLI arguments, sets up tracing, loads the bus configuration and
//! dispatches to the command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,framebus_core=debug,framebus_infra=debug",
        _ => "trace",
    };
    framebus_observe::init_tracing(filter, cli.log_json, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    framebus_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "fbus", &mut std::io::stdout());
        }

        Commands::Validate { file } => {
            cli::validate::run(file.as_deref(), cli.json).await?;
        }

        Commands::Config { strict } => {
            cli::config::show(config_path, strict, cli.json).await?;
        }

        Commands::Demo {
            frames,
            mute,
            detach,
            timeout_ms,
        } => {
            let config = cli::config::load(config_path, false).await?;
            cli::demo::run(config, frames, mute, detach, timeout_ms, cli.json).await?;
        }

        Commands::Ping {
            from,
            to,
            message_type,
            payload,
            timeout_ms,
            silent,
            no_reply,
        } => {
            let config = cli::config::load(config_path, false).await?;
            let args = cli::ping::PingArgs {
                from,
                to,
                message_type,
                payload,
                timeout_ms,
                silent,
                no_reply,
            };
            cli::ping::run(config, args, cli.json).await?;
        }
    }

    Ok(())
}
