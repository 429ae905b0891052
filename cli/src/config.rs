// Configuration management for the adradio CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/adradio/config.json
// - Linux: ~/.config/adradio/config.json
// - Windows: %APPDATA%\adradio\config.json

use adradio_core::transport::{DEFAULT_MULTICAST_GROUP, DEFAULT_PORT};
use adradio_core::{validate_channel, RadioConfig, UdpAirConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Link settings (channel)
    pub radio: RadioConfig,

    /// Multicast group the UDP air uses as its shared medium
    pub multicast_group: Ipv4Addr,

    /// UDP port shared by every node
    pub port: u16,

    /// Interface to join the group on (0.0.0.0 = OS default)
    pub interface: Ipv4Addr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            multicast_group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("adradio");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    /// Load config from an explicit path, writing defaults if it is missing
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

    /// Settings for the UDP multicast air
    pub fn air_config(&self) -> UdpAirConfig {
        UdpAirConfig {
            group: self.multicast_group,
            port: self.port,
            interface: self.interface,
        }
    }

    /// Set a config value (in memory; call `save` to persist)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "channel" => {
                let channel: i64 = value.parse().context("Invalid channel number")?;
                self.radio.channel = validate_channel(channel)?;
            }
            "multicast_group" => {
                let group: Ipv4Addr = value.parse().context("Invalid IPv4 address")?;
                if !group.is_multicast() {
                    anyhow::bail!("{} is not a multicast address", group);
                }
                self.multicast_group = group;
            }
            "port" => {
                let port: u16 = value.parse().context("Invalid port number")?;
                if port == 0 {
                    anyhow::bail!("Port must be > 0");
                }
                self.port = port;
            }
            "interface" => {
                self.interface = value.parse().context("Invalid IPv4 address")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "channel" => Some(self.radio.channel.to_string()),
            "multicast_group" => Some(self.multicast_group.to_string()),
            "port" => Some(self.port.to_string()),
            "interface" => Some(self.interface.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        ["channel", "multicast_group", "port", "interface"]
            .iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }
}
