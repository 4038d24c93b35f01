//! Wireless radio boundary.
//!
//! The driver itself (association, WPA handshake, DHCP) lives behind
//! [`RadioLink`]. The connectivity manager only issues requests and polls
//! [`LinkStatus`]; nothing here blocks.

use core::net::Ipv4Addr;
use thiserror_no_std::Error;

/// Association progress as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Not associated and no attempt in flight.
    Down,
    /// Association or address assignment in progress.
    Connecting,
    /// Associated with an address assigned.
    Up,
    /// Access point rejected the credentials.
    AuthFailed,
    /// Attempt failed for any other reason.
    LinkFailed,
}

impl LinkStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Connecting => "connecting",
            Self::Up => "up",
            Self::AuthFailed => "auth_failed",
            Self::LinkFailed => "link_failed",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    #[error("driver initialisation failed (code {0})")]
    Init(i32),
    #[error("connect request rejected (code {0})")]
    Connect(i32),
}

/// Operations the connectivity manager needs from the radio driver.
pub trait RadioLink {
    /// Bring the radio up. Called once, before station mode is first enabled.
    fn init(&mut self) -> Result<(), RadioError>;

    fn enable_station_mode(&mut self);

    fn disable_station_mode(&mut self);

    /// Start associating with `ssid`. Progress is observed through
    /// [`RadioLink::link_status`].
    fn connect_async(&mut self, ssid: &str, password: &str) -> Result<(), RadioError>;

    fn link_status(&mut self) -> LinkStatus;

    /// Address assigned to the station interface, if any.
    fn assigned_address(&self) -> Option<Ipv4Addr>;
}
