//! In-process kiosk used by `demo` and `ping`.
//!
//! The configured context becomes a top-level page on a `LocalHub`, each
//! configured peer an embedded frame with its own bus, all created through
//! one `BusDirectory`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use framebus_core::lifecycle::BusDirectory;
use framebus_core::message::{ConfirmOptions, MessageBus};
use framebus_infra::hub::LocalHub;
use framebus_types::config::{BusConfig, PeerConfig};
use framebus_types::error::BusError;
use framebus_types::message::{Destination, Payload};

/// Frames used when the configuration declares none.
const DEFAULT_FRAMES: &[(&str, &str)] = &[("mapa", "Mapa"), ("audio", "Audio")];

pub struct Sandbox {
    pub hub: LocalHub,
    pub directory: BusDirectory,
    pub root: Arc<MessageBus>,
    pub frames: Vec<Arc<MessageBus>>,
}

impl Sandbox {
    /// Build the page and its frames. Every bus answers pings except the
    /// frames listed in `mute`.
    pub async fn start(config: &BusConfig, mute: &[String]) -> Result<Self> {
        let hub = LocalHub::new();
        let root_host = hub.add_page(&config.context_id)?;
        for peer in &config.peers {
            hub.add_frame(&peer.id, &config.context_id)?;
        }

        let directory = BusDirectory::new();
        let root = directory
            .configure(config.clone(), root_host)
            .await
            .with_context(|| format!("failed to start context '{}'", config.context_id))?;
        root.respond_to_pings();

        let mut frames = Vec::with_capacity(config.peers.len());
        for peer in &config.peers {
            let mut frame_config = BusConfig::new(&peer.id);
            frame_config.label = Some(peer.label.clone());
            frame_config.retry = config.retry;
            frame_config.confirmation_timeout_ms = config.confirmation_timeout_ms;

            let bus = directory
                .configure(frame_config, hub.host(&peer.id))
                .await
                .with_context(|| format!("failed to start frame '{}'", peer.id))?;
            if !mute.contains(&peer.id) {
                bus.respond_to_pings();
            }
            frames.push(bus);
        }

        Ok(Self {
            hub,
            directory,
            root,
            frames,
        })
    }

    /// The bus for `context_id`, root or frame.
    pub fn bus(&self, context_id: &str) -> Option<&Arc<MessageBus>> {
        std::iter::once(&self.root)
            .chain(self.frames.iter())
            .find(|bus| bus.context_id() == context_id)
    }

    pub async fn shutdown(&self) {
        self.directory.shutdown_all().await;
    }
}

/// `config` with the default frames filled in when it declares no peers.
pub fn with_default_frames(mut config: BusConfig) -> BusConfig {
    if config.peers.is_empty() {
        config.peers = DEFAULT_FRAMES
            .iter()
            .map(|(id, label)| PeerConfig {
                id: id.to_string(),
                label: label.to_string(),
            })
            .collect();
    }
    config
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PingOutcome {
    Confirmed,
    NoReply,
    Failed,
}

/// One confirmation round, as shown by `demo` and `ping`.
#[derive(Debug, Clone, Serialize)]
pub struct PingRow {
    pub from: String,
    pub to: String,
    pub outcome: PingOutcome,
    pub round_trip_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Send one confirmation-seeking message from `bus` and time the answer.
pub async fn ping_once(
    bus: &MessageBus,
    destination: Destination,
    message_type: &str,
    payload: Payload,
    options: ConfirmOptions,
) -> PingRow {
    let started = Instant::now();
    let result = bus
        .send_awaiting_confirmation(destination.clone(), message_type, payload, options)
        .await;
    let round_trip_ms = started.elapsed().as_millis() as u64;

    let (outcome, reply, error) = match result {
        Ok(Some(reply)) => (PingOutcome::Confirmed, Some(reply), None),
        Ok(None) => (PingOutcome::NoReply, None, None),
        Err(err @ BusError::ConfirmationTimeout { .. }) => {
            (PingOutcome::NoReply, None, Some(err.to_string()))
        }
        Err(err) => (PingOutcome::Failed, None, Some(err.to_string())),
    };

    PingRow {
        from: bus.context_id().to_string(),
        to: destination.to_string(),
        outcome,
        round_trip_ms,
        reply,
        error,
    }
}
