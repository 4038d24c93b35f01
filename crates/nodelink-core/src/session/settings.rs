use alloc::format;
use alloc::string::{String, ToString};
use core::net::{Ipv4Addr, SocketAddrV4};

use crate::config::BrokerConfig;
use crate::error::ConfigError;
use crate::messaging::{ClientInfo, LastWill, QoS};

use super::inbound::TOPIC_CAPACITY;

/// Longest client identifier every MQTT 3.1.1 broker must accept.
pub const CLIENT_ID_MAX: usize = 23;

/// Validated broker settings used by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub broker: SocketAddrV4,
    pub client_id: String,
    pub keep_alive_s: u16,
    pub will_topic: String,
    pub will_message: String,
    pub publish_topic: String,
    pub control_topic: String,
    pub publish_qos: QoS,
    pub subscribe_qos: QoS,
    pub retain: bool,
    pub publish_period_ms: u32,
    pub tick_interval_ms: u32,
    /// `0` disables the broker connect timeout.
    pub connect_timeout_ms: u32,
}

impl SessionSettings {
    /// Validate a [`BrokerConfig`].
    ///
    /// Any error here is a configuration defect and should stop the node.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, ConfigError> {
        let address: Ipv4Addr = config
            .address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBrokerAddress(config.address.clone()))?;
        if config.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let client_id = config.client_id.trim();
        if client_id.is_empty() || client_id.len() > CLIENT_ID_MAX {
            return Err(ConfigError::InvalidClientId {
                len: client_id.len(),
                max: CLIENT_ID_MAX,
            });
        }

        if config.publish_period_ms == 0 {
            return Err(ConfigError::ZeroInterval("publish_period_ms"));
        }
        if config.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("tick_interval_ms"));
        }

        let publish_topic = config
            .publish_topic
            .clone()
            .unwrap_or_else(|| format!("{client_id}/temperature"));
        let control_topic = config
            .control_topic
            .clone()
            .unwrap_or_else(|| format!("{client_id}/led"));
        for topic in [&publish_topic, &control_topic, &config.will_topic] {
            if topic.is_empty() || topic.len() > TOPIC_CAPACITY {
                return Err(ConfigError::InvalidTopic(topic.clone()));
            }
        }

        Ok(Self {
            broker: SocketAddrV4::new(address, config.port),
            client_id: client_id.to_string(),
            keep_alive_s: config.keep_alive_s,
            will_topic: config.will_topic.clone(),
            will_message: config.will_message.clone(),
            publish_topic,
            control_topic,
            publish_qos: QoS::try_from(config.publish_qos)?,
            subscribe_qos: QoS::try_from(config.subscribe_qos)?,
            retain: config.retain,
            publish_period_ms: config.publish_period_ms,
            tick_interval_ms: config.tick_interval_ms,
            connect_timeout_ms: config.connect_timeout_ms,
        })
    }

    /// Connect parameters, with the will sent at the publish QoS and retain flag.
    pub fn client_info(&self) -> ClientInfo<'_> {
        ClientInfo {
            client_id: &self.client_id,
            keep_alive_s: self.keep_alive_s,
            will: Some(LastWill {
                topic: &self.will_topic,
                message: &self.will_message,
                qos: self.publish_qos,
                retain: self.retain,
            }),
        }
    }
}
