//! # Teleop Configuration
//!
//! Timing, key mapping and transport settings for the keyboard controller.
//! Every key has a default, so an empty file (or no file at all) gives the
//! reference behaviour: a 50 ms tick with a 500 ms dead-man's-switch wait.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [control]
//! tick_period_ms = 50
//! key_timeout_ms = 500
//!
//! [mapper]
//! up_magnitude = 100
//! down_magnitude = -100
//! lateral_magnitude = 100
//! quit_keys = ["q"]
//!
//! [transport]
//! topic = "luci/remote_joystick"
//! publish_addr = "127.0.0.1:7400"
//! gate_addr = "127.0.0.1:7401"
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Largest magnitude either command axis may carry.
pub const MAX_MAGNITUDE: i32 = 100;

/// Ctrl-C as delivered by a terminal in raw mode.
pub const CTRL_C: u8 = 0x03;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the control loop, key mapping and transport.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Watchdog timing. The key wait and the tick period are independent timers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
    #[serde(default = "default_key_timeout_ms")]
    pub key_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            key_timeout_ms: default_key_timeout_ms(),
        }
    }
}

impl ControlConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn key_timeout(&self) -> Duration {
        Duration::from_millis(self.key_timeout_ms)
    }
}

/// Fixed constants handed to the command mapper and key reader.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MapperConfig {
    #[serde(default = "default_up_magnitude")]
    pub up_magnitude: i32,
    #[serde(default = "default_down_magnitude")]
    pub down_magnitude: i32,
    #[serde(default = "default_lateral_magnitude")]
    pub lateral_magnitude: i32,
    /// Printable quit keys. Ctrl-C always quits and need not be listed.
    #[serde(default = "default_quit_keys")]
    pub quit_keys: Vec<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            up_magnitude: default_up_magnitude(),
            down_magnitude: default_down_magnitude(),
            lateral_magnitude: default_lateral_magnitude(),
            quit_keys: default_quit_keys(),
        }
    }
}

impl MapperConfig {
    /// Byte sequences that request exit, Ctrl-C first.
    pub fn quit_sequences(&self) -> Vec<Vec<u8>> {
        let mut sequences = vec![vec![CTRL_C]];
        sequences.extend(self.quit_keys.iter().map(|k| k.as_bytes().to_vec()));
        sequences
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_MAGNITUDE).contains(&self.up_magnitude) {
            return Err(format!("up_magnitude must be in 1..={}", MAX_MAGNITUDE));
        }
        if !(-MAX_MAGNITUDE..=-1).contains(&self.down_magnitude) {
            return Err(format!("down_magnitude must be in -{}..=-1", MAX_MAGNITUDE));
        }
        if !(1..=MAX_MAGNITUDE).contains(&self.lateral_magnitude) {
            return Err(format!("lateral_magnitude must be in 1..={}", MAX_MAGNITUDE));
        }
        for key in &self.quit_keys {
            let bytes = key.as_bytes();
            if bytes.len() != 1 || !bytes[0].is_ascii_graphic() {
                return Err(format!("quit key '{}' must be a single printable ASCII character", key));
            }
        }
        Ok(())
    }
}

/// Outward endpoints: the command topic and the manual-input gate service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_publish_addr")]
    pub publish_addr: String,
    #[serde(default = "default_gate_addr")]
    pub gate_addr: String,
    #[serde(default = "default_enable_service")]
    pub enable_service: String,
    #[serde(default = "default_disable_service")]
    pub disable_service: String,
    #[serde(default = "default_service_wait_ms")]
    pub service_wait_ms: u64,
    /// 0 waits forever for the gate endpoint.
    #[serde(default)]
    pub service_max_attempts: u32,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            publish_addr: default_publish_addr(),
            gate_addr: default_gate_addr(),
            enable_service: default_enable_service(),
            disable_service: default_disable_service(),
            service_wait_ms: default_service_wait_ms(),
            service_max_attempts: 0,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl TransportConfig {
    pub fn publish_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("publish_addr", &self.publish_addr)
    }

    pub fn gate_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("gate_addr", &self.gate_addr)
    }

    pub fn service_wait(&self) -> Duration {
        Duration::from_millis(self.service_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{} '{}': {}", field, value, e)))
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control.tick_period_ms == 0 {
            return Err(ConfigError::Invalid("tick_period_ms must be > 0".to_string()));
        }
        if self.control.key_timeout_ms == 0 {
            return Err(ConfigError::Invalid("key_timeout_ms must be > 0".to_string()));
        }
        self.mapper.validate().map_err(ConfigError::Invalid)?;
        if self.transport.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic cannot be empty".to_string()));
        }
        if self.transport.enable_service.is_empty() || self.transport.disable_service.is_empty() {
            return Err(ConfigError::Invalid("gate service names cannot be empty".to_string()));
        }
        if self.transport.service_wait_ms == 0 {
            return Err(ConfigError::Invalid("service_wait_ms must be > 0".to_string()));
        }
        self.transport.publish_socket_addr()?;
        self.transport.gate_socket_addr()?;
        Ok(())
    }
}

// Default value functions
fn default_tick_period_ms() -> u64 { 50 }
fn default_key_timeout_ms() -> u64 { 500 }
fn default_up_magnitude() -> i32 { 100 }
fn default_down_magnitude() -> i32 { -100 }
fn default_lateral_magnitude() -> i32 { 100 }
fn default_quit_keys() -> Vec<String> { vec!["q".to_string()] }
fn default_topic() -> String { "luci/remote_joystick".to_string() }
fn default_publish_addr() -> String { "127.0.0.1:7400".to_string() }
fn default_gate_addr() -> String { "127.0.0.1:7401".to_string() }
fn default_enable_service() -> String { "/luci/set_auto_remote_input".to_string() }
fn default_disable_service() -> String { "/luci/remove_auto_remote_input".to_string() }
fn default_service_wait_ms() -> u64 { 1000 }
fn default_shutdown_grace_ms() -> u64 { 1000 }

/// Load configuration from a TOML file at the given path and validate it.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
