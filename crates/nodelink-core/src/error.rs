//! Start-up error types.
//!
//! Both enums describe configuration defects. They are only produced while
//! the node is being assembled; once the scheduler runs, faults are handled
//! by state transitions instead of errors.

use alloc::string::String;
use thiserror_no_std::Error;

use crate::radio::RadioError;

/// Connectivity manager could not be initialised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("network identifier is empty")]
    EmptyIdentifier,
    #[error("network secret is empty")]
    EmptySecret,
    #[error("{field} is {len} bytes, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("radio initialisation failed: {0}")]
    Radio(RadioError),
}

/// Broker configuration rejected while building session settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("broker address `{0}` is not a valid IPv4 address")]
    InvalidBrokerAddress(String),
    #[error("broker port must be non-zero")]
    InvalidPort,
    #[error("unsupported quality-of-service level {0}")]
    InvalidQos(u8),
    #[error("client identifier must be 1..={max} bytes, got {len}")]
    InvalidClientId { len: usize, max: usize },
    #[error("topic `{0}` is empty or too long")]
    InvalidTopic(String),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}
