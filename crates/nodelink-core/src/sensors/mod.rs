mod onboard;

use core::fmt::Write;
use heapless::String;

pub use onboard::{AdcChannel, OnboardTemperature, raw_to_celsius};

/// Capacity of a serialised reading. Fits `f32::MIN` at two decimals.
pub const PAYLOAD_CAPACITY: usize = 64;

/// A single temperature sample in degrees Celsius.
///
/// Readings are produced on demand and carry no timestamp or identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub celsius: f32,
}

impl Reading {
    pub const fn new(celsius: f32) -> Self {
        Self { celsius }
    }

    /// Serialise as the published message body, e.g. `{ "t": 21.50 }`.
    ///
    /// NaN and infinities are not valid JSON numbers and are sent as `null`.
    pub fn to_payload(&self) -> String<PAYLOAD_CAPACITY> {
        let mut body = String::new();
        let written = if self.celsius.is_finite() {
            write!(body, "{{ \"t\": {:.2} }}", self.celsius)
        } else {
            write!(body, "{{ \"t\": null }}")
        };
        if written.is_err() {
            body.clear();
            let pushed = body.push_str("{ \"t\": null }");
            debug_assert!(pushed.is_ok());
        }
        body
    }
}

/// Anything that can hand the session manager a fresh reading.
///
/// Reads are synchronous and cannot fail; a driver that can fail should
/// report its fallback value instead.
pub trait SensorSource {
    fn read(&mut self) -> Reading;
}
