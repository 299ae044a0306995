//! Bus configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.framebus/` by default)
//! and deserializes it into [`BusConfig`]. `load_bus_config` falls back to
//! defaults when the file is missing, unreadable, malformed or invalid;
//! `try_load_bus_config` reports those as [`ConfigError`] instead.

use std::path::{Path, PathBuf};

use framebus_types::config::BusConfig;
use framebus_types::error::ConfigError;

/// Context id used when no configuration is available.
pub const DEFAULT_CONTEXT_ID: &str = "main";

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "FRAMEBUS_DATA_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Resolve the data directory.
///
/// Priority:
/// 1. `FRAMEBUS_DATA_DIR` environment variable
/// 2. `~/.framebus`
/// 3. `.framebus` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".framebus");
    }
    PathBuf::from(".framebus")
}

/// Path of the config file: `explicit` if given, else `{data_dir}/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => resolve_data_dir().join(CONFIG_FILE),
    }
}

/// Load and validate the config at `path`.
pub async fn try_load_bus_config(path: &Path) -> Result<BusConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let config: BusConfig =
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load the config at `path`, falling back to a peerless `main` context.
///
/// - Missing file: defaults, logged at debug.
/// - Unreadable, malformed or invalid file: defaults, logged as a warning.
pub async fn load_bus_config(path: &Path) -> BusConfig {
    match try_load_bus_config(path).await {
        Ok(config) => config,
        Err(ConfigError::Read { .. }) if !path.exists() => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            BusConfig::new(DEFAULT_CONTEXT_ID)
        }
        Err(err) => {
            tracing::warn!("{err} ({}), using defaults", path.display());
            BusConfig::new(DEFAULT_CONTEXT_ID)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_bus_config(&tmp.path().join(CONFIG_FILE)).await;
        assert_eq!(config.context_id, "main");
        assert!(config.peers.is_empty());
        assert_eq!(config.confirmation_timeout_ms, 5_000);
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            r#"
context_id = "main"
label = "Kiosk"
confirmation_timeout_ms = 750

[[peers]]
id = "mapa"
label = "Mapa"

[[peers]]
id = "audio"
label = "Audio"

[retry]
max_attempts = 5
"#,
        )
        .await
        .unwrap();

        let config = load_bus_config(&path).await;
        assert_eq!(config.display_label(), "Kiosk");
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peers[1].id, "audio");
        assert_eq!(config.confirmation_timeout_ms, 750);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 100);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        assert!(matches!(
            try_load_bus_config(&path).await,
            Err(ConfigError::Parse(_))
        ));
        let config = load_bus_config(&path).await;
        assert_eq!(config.context_id, "main");
    }

    #[tokio::test]
    async fn duplicate_peers_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            r#"
context_id = "main"
peers = [{ id = "mapa", label = "A" }, { id = "mapa", label = "B" }]
"#,
        )
        .await
        .unwrap();

        assert!(matches!(
            try_load_bus_config(&path).await,
            Err(ConfigError::Invalid(_))
        ));
        assert!(load_bus_config(&path).await.peers.is_empty());
    }

    #[test]
    fn explicit_path_wins() {
        let path = PathBuf::from("/etc/framebus/kiosk.toml");
        assert_eq!(resolve_config_path(Some(&path)), path);
    }

    #[test]
    fn default_path_is_under_data_dir() {
        assert!(resolve_config_path(None).ends_with("config.toml"));
    }
}
