//! Bus configuration types for framebus.
//!
//! `BusConfig` describes one context: its own id, the frames it embeds, the
//! retry policy for unconfirmed sends, and confirmation defaults. Loaded from
//! `config.toml`; all fields except `context_id` have sensible defaults.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::message::{BROADCAST_TOKEN, PARENT_TOKEN};

/// Configuration for a single context's bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// This context's id (e.g. `"main"`, `"mapa"`).
    pub context_id: String,

    /// Human label used in logs and CLI output.
    #[serde(default)]
    pub label: Option<String>,

    /// Child contexts (embedded frames) this context talks to.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Retry policy for unconfirmed sends.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Default deadline for confirmation-seeking sends.
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    /// Whether confirmation timeouts resolve to "no reply" instead of failing.
    #[serde(default)]
    pub silent_timeouts: bool,
}

fn default_confirmation_timeout_ms() -> u64 {
    5_000
}

impl BusConfig {
    /// Minimal config for a context with no peers.
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            label: None,
            peers: Vec::new(),
            retry: RetryPolicy::default(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            silent_timeouts: false,
        }
    }

    /// Add a peer (builder style).
    pub fn with_peer(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.peers.push(PeerConfig {
            id: id.into(),
            label: label.into(),
        });
        self
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Label for display, falling back to the context id.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.context_id)
    }

    /// Check ids: non-empty, not a reserved token, no duplicates, and no
    /// peer sharing this context's own id.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_context_id(&self.context_id)?;

        let mut seen = HashSet::new();
        for peer in &self.peers {
            check_context_id(&peer.id)?;
            if peer.id == self.context_id {
                return Err(ConfigError::Invalid(format!(
                    "peer '{}' has the same id as this context",
                    peer.id
                )));
            }
            if !seen.insert(peer.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate peer id '{}'",
                    peer.id
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_factor must be >= 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_context_id(id: &str) -> Result<(), ConfigError> {
    if id.trim().is_empty() {
        return Err(ConfigError::Invalid("context id must not be empty".to_string()));
    }
    if id == PARENT_TOKEN || id == BROADCAST_TOKEN {
        return Err(ConfigError::Invalid(format!(
            "'{id}' is a reserved addressing token"
        )));
    }
    Ok(())
}

/// A known child context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub label: String,
}

/// Retry policy for unconfirmed sends: up to `max_attempts` with
/// multiplicative backoff starting at `base_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt (default 100ms).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt (default 2.0).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_config_defaults() {
        let config = BusConfig::new("main");
        assert_eq!(config.confirmation_timeout_ms, 5_000);
        assert!(!config.silent_timeouts);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.display_label(), "main");
    }

    #[test]
    fn test_bus_config_deserialize_with_defaults() {
        let config: BusConfig = toml::from_str(r#"context_id = "main""#).unwrap();
        assert_eq!(config.context_id, "main");
        assert!(config.peers.is_empty());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert!((config.retry.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bus_config_deserialize_with_values() {
        let toml_str = r#"
context_id = "main"
label = "Pagina principal"
confirmation_timeout_ms = 250
silent_timeouts = true

[retry]
max_attempts = 5
base_delay_ms = 20
backoff_factor = 1.5

[[peers]]
id = "mapa"
label = "Mapa"

[[peers]]
id = "audio"
label = "Audio"
"#;
        let config: BusConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.display_label(), "Pagina principal");
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[1].id, "audio");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.confirmation_timeout(), Duration::from_millis(250));
        assert!(config.silent_timeouts);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_reserved_and_duplicate_ids() {
        assert!(BusConfig::new("parent").validate().is_err());
        assert!(BusConfig::new("").validate().is_err());

        let dup = BusConfig::new("main")
            .with_peer("mapa", "Mapa")
            .with_peer("mapa", "Otra");
        assert!(dup.validate().is_err());

        let selfish = BusConfig::new("main").with_peer("main", "Yo");
        assert!(selfish.validate().is_err());

        let reserved_peer = BusConfig::new("main").with_peer("broadcast", "Todos");
        assert!(reserved_peer.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_retry_policy() {
        let mut config = BusConfig::new("main");
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = BusConfig::new("main");
        config.retry.backoff_factor = 0.5;
        assert!(config.validate().is_err());
    }
}
