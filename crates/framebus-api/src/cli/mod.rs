//! CLI command definitions for the `fbus` binary.
//!
//! Uses clap derive macros for argument parsing. Every command that talks
//! to a bus runs against an in-process frame hub, so the binary doubles as
//! a smoke test for a configuration.

pub mod config;
pub mod demo;
pub mod ping;
pub mod sandbox;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Inspect and exercise cross-frame message buses.
#[derive(Parser)]
#[command(name = "fbus", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for bus debug logs, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Bus config file (defaults to ~/.framebus/config.toml).
    #[arg(long, global = true, env = "FRAMEBUS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode one envelope and report whether it is valid, foreign or malformed.
    Validate {
        /// JSON file to read (stdin when omitted or "-").
        file: Option<PathBuf>,
    },

    /// Wire the configured context and its frames in-process, ping every
    /// frame and broadcast a mode change.
    Demo {
        /// Frames to embed, overriding the configured peers.
        #[arg(long, value_delimiter = ',')]
        frames: Vec<String>,

        /// Frames that never answer pings.
        #[arg(long, value_delimiter = ',')]
        mute: Vec<String>,

        /// Frames to detach before sending.
        #[arg(long, value_delimiter = ',')]
        detach: Vec<String>,

        /// Confirmation deadline per ping, in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Send one confirmation-seeking message and wait for the reply.
    Ping {
        /// Sending context (defaults to the configured context).
        #[arg(long)]
        from: Option<String>,

        /// Destination: a frame id, "parent" or "broadcast".
        #[arg(long, default_value = "mapa")]
        to: String,

        /// Message type to send.
        #[arg(long, default_value = framebus_types::message::types::SYSTEM_PING)]
        message_type: String,

        /// JSON object payload.
        #[arg(long)]
        payload: Option<String>,

        /// Confirmation deadline in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Resolve with "no reply" instead of failing on timeout.
        #[arg(long)]
        silent: bool,

        /// Leave the destination frame without a responder.
        #[arg(long)]
        no_reply: bool,
    },

    /// Show the resolved bus configuration.
    Config {
        /// Fail on a missing or invalid file instead of showing defaults.
        #[arg(long)]
        strict: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
