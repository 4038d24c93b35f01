//! Status LED.
//!
//! Solid while the node is connected end to end, blinking otherwise.

use crate::tick::TickBudget;

/// Half period of the "not connected" blink.
pub const BLINK_INTERVAL_MS: u32 = 250;

/// Output the indicator drives, usually a GPIO pin.
pub trait IndicatorSink {
    fn set(&mut self, on: bool);
}

pub struct Indicator<O> {
    sink: O,
    blink: TickBudget,
    lit: bool,
    /// Value last written to the sink, `None` before the first write.
    written: Option<bool>,
}

impl<O: IndicatorSink> Indicator<O> {
    pub fn new(sink: O) -> Self {
        Self {
            sink,
            blink: TickBudget::new(BLINK_INTERVAL_MS),
            lit: false,
            written: None,
        }
    }

    pub fn update(&mut self, now_ms: u32, connected: bool) {
        if connected {
            self.lit = true;
        } else if self.blink.is_due(now_ms) {
            self.lit = !self.lit;
        }

        if self.written != Some(self.lit) {
            self.sink.set(self.lit);
            self.written = Some(self.lit);
        }
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub fn sink(&self) -> &O {
        &self.sink
    }
}
