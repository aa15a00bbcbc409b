// Configuration management for the dropway CLI
//
// Stored as JSON in:
// - Linux: ~/.config/dropway/config.json
// - macOS: ~/Library/Application Support/dropway/config.json
// - Windows: %APPDATA%\dropway\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` of the rendezvous server used by send/receive
    pub rendezvous_addr: String,

    /// Port `serve` listens on
    pub server_port: u16,

    /// How long a sender's mailbox waits for a receiver (serve)
    pub receiver_timeout_secs: u64,

    /// Always relay through the rendezvous server (receive)
    pub force_relay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rendezvous_addr: "127.0.0.1:8080".to_string(),
            server_port: 8080,
            receiver_timeout_secs: 30,
            force_relay: false,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("dropway");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value in memory
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "rendezvous_addr" => {
                if value.trim().is_empty() {
                    anyhow::bail!("rendezvous_addr must not be empty");
                }
                self.rendezvous_addr = value.trim().to_string();
            }
            "server_port" => {
                self.server_port = value.parse().context("Invalid port number")?;
            }
            "receiver_timeout_secs" => {
                self.receiver_timeout_secs = value.parse().context("Invalid number")?;
            }
            "force_relay" => {
                self.force_relay = value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "rendezvous_addr" => Some(self.rendezvous_addr.clone()),
            "server_port" => Some(self.server_port.to_string()),
            "receiver_timeout_secs" => Some(self.receiver_timeout_secs.to_string()),
            "force_relay" => Some(self.force_relay.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("rendezvous_addr".to_string(), self.rendezvous_addr.clone()),
            ("server_port".to_string(), self.server_port.to_string()),
            (
                "receiver_timeout_secs".to_string(),
                format!("{}s", self.receiver_timeout_secs),
            ),
            ("force_relay".to_string(), self.force_relay.to_string()),
        ]
    }
}
