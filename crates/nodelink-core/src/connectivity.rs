//! Wireless association state machine.
//!
//! The manager keeps the station interface associated with one network.
//! Each effective tick looks at the driver's [`LinkStatus`] once and takes
//! at most one step:
//!
//! ```text
//! Disconnected ──connect request──▶ Connecting ──link up──▶ Connected
//!      ▲                                │                       │
//!      └────── auth/link failure ───────┤                       │
//!      └────── budget exhausted ────────┘                       │
//!      └────────────────────── link lost ───────────────────────┘
//! ```
//!
//! Every way back to `Disconnected` disables station mode exactly once, so
//! the next tick starts a clean attempt.

use core::net::Ipv4Addr;
use heapless::String;
use log::{debug, info, warn};

use crate::config::InternetConfig;
use crate::error::InitError;
use crate::radio::{LinkStatus, RadioLink};
use crate::tick::{TickBudget, count_down};

/// Longest network identifier accepted (IEEE 802.11 SSID limit).
pub const SSID_MAX: usize = 32;
/// Longest passphrase accepted (WPA2 PSK limit).
pub const PASSWORD_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectivityState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Validated network credentials. Holds the secret, so no `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: String<SSID_MAX>,
    password: String<PASSWORD_MAX>,
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, InitError> {
        if ssid.is_empty() {
            return Err(InitError::EmptyIdentifier);
        }
        if password.is_empty() {
            return Err(InitError::EmptySecret);
        }

        let mut credentials = Self {
            ssid: String::new(),
            password: String::new(),
        };
        credentials
            .ssid
            .push_str(ssid)
            .map_err(|_| InitError::TooLong {
                field: "ssid",
                len: ssid.len(),
                max: SSID_MAX,
            })?;
        credentials
            .password
            .push_str(password)
            .map_err(|_| InitError::TooLong {
                field: "password",
                len: password.len(),
                max: PASSWORD_MAX,
            })?;
        Ok(credentials)
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }
}

/// Internal phase. The connect budget only exists while connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting { remaining_ms: u32 },
    Connected,
}

pub struct ConnectivityManager<R> {
    radio: R,
    credentials: Credentials,
    budget: TickBudget,
    connect_timeout_ms: u32,
    phase: Phase,
    last_status: LinkStatus,
    address: Option<Ipv4Addr>,
    attempts: u32,
}

impl<R: RadioLink> ConnectivityManager<R> {
    /// Validate the credentials, bring the radio up and enable station mode.
    pub fn initialize(mut radio: R, config: &InternetConfig) -> Result<Self, InitError> {
        let credentials = Credentials::new(&config.ssid, &config.password)?;
        // A zero step would never drain the connect budget.
        if config.tick_interval_ms == 0 {
            return Err(InitError::ZeroInterval("tick_interval_ms"));
        }

        radio.init().map_err(InitError::Radio)?;
        radio.enable_station_mode();
        info!("Radio ready, joining network {}", credentials.ssid());

        Ok(Self {
            radio,
            credentials,
            budget: TickBudget::new(config.tick_interval_ms),
            connect_timeout_ms: config.connect_timeout_ms,
            phase: Phase::Disconnected,
            last_status: LinkStatus::Down,
            address: None,
            attempts: 0,
        })
    }

    /// Take at most one step, no more than once per tick interval.
    pub fn tick(&mut self, now_ms: u32) {
        if !self.budget.is_due(now_ms) {
            return;
        }

        match self.phase {
            Phase::Disconnected => self.poll_disconnected(),
            Phase::Connecting { remaining_ms } => self.poll_connecting(remaining_ms),
            Phase::Connected => self.poll_connected(),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        match self.phase {
            Phase::Disconnected => ConnectivityState::Disconnected,
            Phase::Connecting { .. } => ConnectivityState::Connecting,
            Phase::Connected => ConnectivityState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Address assigned by the network while connected.
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn last_link_status(&self) -> LinkStatus {
        self.last_status
    }

    /// Association attempts started since initialisation.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    fn poll_disconnected(&mut self) {
        self.radio.enable_station_mode();
        // A link that came up without a request of ours (e.g. the driver
        // reassociated on its own) is adopted rather than left idle.
        if self.observe() == LinkStatus::Up {
            warn!(
                "Link to {} already up while disconnected, adopting it",
                self.credentials.ssid()
            );
            self.on_link_up();
            return;
        }

        match self
            .radio
            .connect_async(&self.credentials.ssid, &self.credentials.password)
        {
            Ok(()) => {
                self.attempts = self.attempts.saturating_add(1);
                info!(
                    "Joining {} (attempt {}, {} ms budget)",
                    self.credentials.ssid(),
                    self.attempts,
                    self.connect_timeout_ms
                );
                self.phase = Phase::Connecting {
                    remaining_ms: self.connect_timeout_ms,
                };
            }
            Err(e) => {
                warn!("Connect request for {} failed: {}", self.credentials.ssid(), e);
                self.radio.disable_station_mode();
            }
        }
    }

    fn poll_connecting(&mut self, remaining_ms: u32) {
        match self.observe() {
            LinkStatus::Up => self.on_link_up(),
            status @ (LinkStatus::AuthFailed | LinkStatus::LinkFailed) => {
                warn!(
                    "Joining {} failed: {}",
                    self.credentials.ssid(),
                    status.as_str()
                );
                self.go_down();
            }
            LinkStatus::Down | LinkStatus::Connecting => {
                let remaining_ms = count_down(remaining_ms, self.budget.interval_ms());
                if remaining_ms == 0 {
                    warn!(
                        "Joining {} timed out after {} ms",
                        self.credentials.ssid(),
                        self.connect_timeout_ms
                    );
                    self.go_down();
                } else {
                    self.phase = Phase::Connecting { remaining_ms };
                }
            }
        }
    }

    fn poll_connected(&mut self) {
        let status = self.observe();
        if status != LinkStatus::Up {
            warn!(
                "Lost link to {} ({})",
                self.credentials.ssid(),
                status.as_str()
            );
            self.go_down();
        }
    }

    fn observe(&mut self) -> LinkStatus {
        let status = self.radio.link_status();
        if status != self.last_status {
            debug!(
                "Link status {} -> {}",
                self.last_status.as_str(),
                status.as_str()
            );
        }
        self.last_status = status;
        status
    }

    fn on_link_up(&mut self) {
        self.address = self.radio.assigned_address();
        match self.address {
            Some(address) => info!("Joined {}, address {}", self.credentials.ssid(), address),
            None => info!("Joined {}", self.credentials.ssid()),
        }
        self.phase = Phase::Connected;
    }

    fn go_down(&mut self) {
        self.radio.disable_station_mode();
        self.address = None;
        self.phase = Phase::Disconnected;
    }
}
