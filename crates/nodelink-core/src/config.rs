//! Node configuration.
//!
//! The runner deserialises a [`Config`] (from TOML on the host) before the
//! core starts. Every field has a default, so a file only has to name the
//! network and the broker address.

use alloc::string::String;
use serde::{Deserialize, Serialize};

/// Default rate of both managers' ticks.
pub const DEFAULT_TICK_INTERVAL_MS: u32 = 100;
/// How long one association attempt may take before it is abandoned.
pub const DEFAULT_WIFI_CONNECT_TIMEOUT_MS: u32 = 5_000;
/// How long the broker may take to answer a connect request.
pub const DEFAULT_BROKER_CONNECT_TIMEOUT_MS: u32 = 10_000;
pub const DEFAULT_PUBLISH_PERIOD_MS: u32 = 5_000;
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_S: u16 = 60;

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub internet: InternetConfig,
    pub broker: BrokerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct InternetConfig {
    pub ssid: String,
    pub password: String,
    pub connect_timeout_ms: u32,
    pub tick_interval_ms: u32,
}

impl Default for InternetConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            connect_timeout_ms: DEFAULT_WIFI_CONNECT_TIMEOUT_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Dotted-quad IPv4 address of the broker.
    pub address: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_s: u16,
    pub publish_period_ms: u32,
    pub publish_qos: u8,
    pub subscribe_qos: u8,
    pub retain: bool,
    pub will_topic: String,
    pub will_message: String,
    /// Defaults to `<client_id>/temperature`.
    pub publish_topic: Option<String>,
    /// Defaults to `<client_id>/led`.
    pub control_topic: Option<String>,
    pub tick_interval_ms: u32,
    /// `0` waits for the broker indefinitely.
    pub connect_timeout_ms: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_BROKER_PORT,
            client_id: String::from("nodelink"),
            keep_alive_s: DEFAULT_KEEP_ALIVE_S,
            publish_period_ms: DEFAULT_PUBLISH_PERIOD_MS,
            publish_qos: 1,
            subscribe_qos: 1,
            retain: false,
            will_topic: String::from("boot"),
            will_message: String::from("booted"),
            publish_topic: None,
            control_topic: None,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_BROKER_CONNECT_TIMEOUT_MS,
        }
    }
}
