//! Configuration file support
//!
//! Loads configuration from ~/.config/perfmux/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerDefaults,
}

/// Default settings for server mode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerDefaults {
    /// Control plane port
    pub control_port: Option<u16>,

    pub tcp_bandwidth_port: Option<u16>,

    pub tcp_cps_port: Option<u16>,

    pub tcp_latency_port: Option<u16>,

    pub udp_pps_port: Option<u16>,

    pub http_bandwidth_port: Option<u16>,

    /// Address family preference (ipv4, ipv6, dual)
    pub address_family: Option<String>,

    /// Stats interval (e.g., "1s", "500ms")
    pub stats_interval: Option<String>,

    /// Disable periodic per-test result lines
    pub no_stats: Option<bool>,

    /// Log file path (e.g., "~/.config/perfmux/perfmux.log", null to disable)
    pub log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from the default path.
    /// Returns default config if file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perfmux")
            .join("config.toml")
    }
}
