//! Hardware-independent core of the nodelink sensor node
//!
//! This crate holds the node's connection management: the wireless
//! association state machine, the broker session state machine, the
//! scheduler that drives both from a single polling loop, and the
//! boundary traits the radio, messaging client, ADC and LED plug into.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! microcontroller targets and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod config;
pub mod connectivity;
pub mod error;
pub mod indicator;
pub mod messaging;
pub mod radio;
pub mod scheduler;
pub mod sensors;
pub mod session;
pub mod tick;

#[cfg(test)]
mod mock;
