//! Daemon configuration: `config.json` in the data directory, then env overrides.

use crate::paths::AppPaths;
use cockpit::highlight::LeaderPolicy;
use cockpit::leaderboard::DEFAULT_TOP_K;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Telemetry push channel.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// Control API base; endpoint paths are appended.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Local IPC listener for presentation clients.
    #[serde(default = "default_ipc_addr")]
    pub ipc_addr: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_highlight_decay_ms")]
    pub highlight_decay_ms: u64,
    #[serde(default)]
    pub leader_policy: LeaderPolicy,
}

fn default_feed_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_api_base() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_ipc_addr() -> String {
    "127.0.0.1:9877".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_highlight_decay_ms() -> u64 {
    1000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            api_base: default_api_base(),
            ipc_addr: default_ipc_addr(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            top_k: default_top_k(),
            highlight_decay_ms: default_highlight_decay_ms(),
            leader_policy: LeaderPolicy::default(),
        }
    }
}

impl DaemonConfig {
    /// Read the config file (defaults if it does not exist) and apply env overrides.
    pub fn load(paths: &AppPaths) -> Result<Self, ConfigError> {
        let path = paths.config_file();
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        // COCKPIT_FEED_URL=ws://host:port/ws
        if let Some(v) = get("COCKPIT_FEED_URL").filter(|v| !v.trim().is_empty()) {
            self.feed_url = v.trim().to_string();
        }
        // COCKPIT_API_BASE=http://host:port/api
        if let Some(v) = get("COCKPIT_API_BASE").filter(|v| !v.trim().is_empty()) {
            self.api_base = v.trim().to_string();
        }
        // COCKPIT_IPC_ADDR=127.0.0.1:9877
        if let Some(v) = get("COCKPIT_IPC_ADDR").filter(|v| !v.trim().is_empty()) {
            self.ipc_addr = v.trim().to_string();
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn highlight_decay(&self) -> Duration {
        Duration::from_millis(self.highlight_decay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = DaemonConfig::parse(r#"{"top_k": 5, "leader_policy": "new_entries_only"}"#).unwrap();
        assert_eq!(cfg.top_k, 5);
        assert_eq!(cfg.leader_policy, LeaderPolicy::NewEntriesOnly);
        assert_eq!(cfg.feed_url, "ws://localhost:8080/ws");
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(cfg.highlight_decay(), Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_win() {
        let mut cfg = DaemonConfig::default();
        cfg.apply_overrides(|key| match key {
            "COCKPIT_FEED_URL" => Some(" ws://feed:9000/ws ".to_string()),
            "COCKPIT_IPC_ADDR" => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.feed_url, "ws://feed:9000/ws");
        assert_eq!(cfg.ipc_addr, "127.0.0.1:9877");
        assert_eq!(cfg.api_base, "http://localhost:8080/api");
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = std::env::temp_dir().join(format!("cockpitd-config-{}", std::process::id()));
        let paths = AppPaths::at(dir);
        let cfg = DaemonConfig::load(&paths).unwrap();
        assert_eq!(cfg.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = std::env::temp_dir().join(format!("cockpitd-config-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let paths = AppPaths::at(dir.clone());
        std::fs::write(paths.config_file(), "{ not json").unwrap();
        assert!(matches!(
            DaemonConfig::load(&paths),
            Err(ConfigError::Parse { .. })
        ));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
