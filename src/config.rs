// MIT License - Copyright (c) 2026 Peter Wright
// Cloud service configuration, loaded from TOML

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SecCtlError};
use crate::relay::MqttRelayOptions;

/// Top-level configuration of the cloud service.
///
/// ```toml
/// [listen]
/// port = 9754
///
/// [database]
/// url = "sqlite://sec-ctl.db"
///
/// [mqtt]
/// url = "mqtt://localhost:1883"
/// shared_group = "sec-ctl"
/// ```
///
/// Without an `[mqtt]` table commands are relayed in-process, which only
/// works with a single cloud process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

impl CloudConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SecCtlError::Config {
            details: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
    /// How long a new connection may take to send its login frame.
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
}

impl ListenConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
            login_timeout_secs: default_login_timeout(),
        }
    }
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    9754
}
fn default_login_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://sec-ctl.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Set when several cloud processes share the broker, so each command
    /// and event is handled by only one of them.
    #[serde(default)]
    pub shared_group: Option<String>,
}

fn default_client_id() -> String {
    "sec-ctl-cloud".to_string()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_topic_prefix() -> String {
    "sec-ctl".to_string()
}

impl MqttConfig {
    pub fn relay_options(&self) -> Result<MqttRelayOptions> {
        let (host, port) = parse_mqtt_url(&self.url)?;
        Ok(MqttRelayOptions {
            host,
            port,
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            topic_prefix: self.topic_prefix.clone(),
            shared_group: self.shared_group.clone(),
        })
    }
}

/// Split `mqtt://host:port` (or `tcp://`, or bare `host:port`).
pub fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .ok_or_else(|| SecCtlError::Config {
            details: format!("MQTT URL must be in format mqtt://host:port, got {url}"),
        })?;
    if host.is_empty() {
        return Err(SecCtlError::Config {
            details: format!("MQTT URL has no host: {url}"),
        });
    }

    let port: u16 = port_str.parse().map_err(|_| SecCtlError::Config {
        details: format!("Invalid MQTT port number: {port_str}"),
    })?;

    Ok((host.to_string(), port))
}
