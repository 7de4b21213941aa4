use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use log::warn;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::wake::MacAddress;

pub const DEFAULT_LISTEN: &str = ":8080";
pub const DEFAULT_CACHE_SECS: u64 = 30;
pub const DEFAULT_BROADCAST: &str = "255.255.255.255";
pub const DEFAULT_WOL_PORT: u16 = 9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "proxy")]
    pub general: GeneralConfig,

    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralConfig {
    #[serde(rename = "listenPort", default)]
    pub listen: String,

    #[serde(default)]
    pub main_host_keyword: String,

    pub destination: String,

    /// Seconds a successful probe is trusted for. Zero means the default.
    #[serde(rename = "skipCheckTimeout", default)]
    pub cache_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub destination: String,

    #[serde(default)]
    pub mac_address: String,

    #[serde(rename = "broadcastIP", default = "default_broadcast")]
    pub broadcast_ip: String,

    #[serde(default = "default_wol_port")]
    pub wol_port: u16,

    #[serde(rename = "wolEnable", default)]
    pub wol_enabled: bool,

    #[serde(default)]
    pub ignored_hosts: Vec<String>,

    #[serde(default)]
    pub ignored_paths: Vec<String>,
}

fn default_broadcast() -> String {
    DEFAULT_BROADCAST.to_string()
}

fn default_wol_port() -> u16 {
    DEFAULT_WOL_PORT
}

impl Config {
    /// Loads and validates the configuration file.
    ///
    /// Paths ending in `.yaml` or `.yml` are parsed as YAML, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.finish()
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.finish()
    }

    pub fn cache_window(&self) -> Duration {
        Duration::from_secs(self.general.cache_secs)
    }

    /// Socket address pingora should bind, with a bare `:port` widened to all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.general.listen.starts_with(':') {
            format!("0.0.0.0{}", self.general.listen)
        } else {
            self.general.listen.clone()
        }
    }

    fn finish(mut self) -> Result<Self, ConfigError> {
        if self.general.listen.trim().is_empty() {
            self.general.listen = DEFAULT_LISTEN.to_string();
        }
        if self.general.cache_secs == 0 {
            self.general.cache_secs = DEFAULT_CACHE_SECS;
        }

        let primary = Url::parse(&self.general.destination).map_err(|e| {
            ConfigError::Invalid(format!(
                "proxy.destination '{}': {}",
                self.general.destination, e
            ))
        })?;
        if !matches!(primary.scheme(), "http" | "https") || primary.host_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "proxy.destination '{}' must be an http(s) URL with a host",
                self.general.destination
            )));
        }

        for (name, backend) in &self.backends {
            Url::parse(&backend.destination).map_err(|e| {
                ConfigError::Invalid(format!(
                    "backends.{}.destination '{}': {}",
                    name, backend.destination, e
                ))
            })?;

            if backend.wol_enabled && backend.mac_address.parse::<MacAddress>().is_err() {
                warn!(
                    "⚠️ Backend {} has wake enabled but macAddress '{}' is not valid, wake signals will fail",
                    name, backend.mac_address
                );
            }
        }

        Ok(self)
    }
}
