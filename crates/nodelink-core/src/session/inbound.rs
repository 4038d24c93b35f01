//! Reassembly of inbound publishes.
//!
//! The messaging client reports an inbound publish as a header (topic and
//! total length) followed by one or more data chunks. Chunks are appended
//! into fixed buffers until the announced length has arrived or the client
//! flags the last chunk. Anything that would not fit is dropped whole.

use heapless::{String, Vec};
use log::{debug, warn};

/// Largest inbound payload kept.
pub const INBOUND_CAPACITY: usize = 256;
/// Longest inbound topic kept.
pub const TOPIC_CAPACITY: usize = 100;

/// A fully reassembled inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub topic: String<TOPIC_CAPACITY>,
    pub payload: Vec<u8, INBOUND_CAPACITY>,
}

impl ControlMessage {
    /// Payload as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}

#[derive(Debug, Default)]
pub struct InboundAccumulator {
    topic: String<TOPIC_CAPACITY>,
    data: Vec<u8, INBOUND_CAPACITY>,
    expected_len: u32,
    received_len: u32,
    in_progress: bool,
    discarding: bool,
    dropped: u32,
}

impl InboundAccumulator {
    pub const fn new() -> Self {
        Self {
            topic: String::new(),
            data: Vec::new(),
            expected_len: 0,
            received_len: 0,
            in_progress: false,
            discarding: false,
            dropped: 0,
        }
    }

    /// Start a new message. An unfinished previous message is discarded.
    pub fn begin(&mut self, topic: &str, total_len: u32) {
        if self.in_progress {
            warn!(
                "Inbound message on {} abandoned after {} of {} bytes",
                self.topic, self.received_len, self.expected_len
            );
            self.dropped = self.dropped.saturating_add(1);
        }
        self.reset();
        self.in_progress = true;
        self.expected_len = total_len;

        if self.topic.push_str(topic).is_err() {
            warn!(
                "Inbound topic is {} bytes, limit {}; dropping message",
                topic.len(),
                TOPIC_CAPACITY
            );
            self.topic.clear();
            self.discarding = true;
        } else if total_len as usize > INBOUND_CAPACITY {
            warn!(
                "Inbound message on {} is {} bytes, limit {}; dropping it",
                topic, total_len, INBOUND_CAPACITY
            );
            self.discarding = true;
        }
    }

    /// Append one chunk. Returns the message once it is complete.
    pub fn append(&mut self, chunk: &[u8], last: bool) -> Option<ControlMessage> {
        if !self.in_progress {
            debug!("Inbound data without a publish header, {} bytes ignored", chunk.len());
            return None;
        }

        self.received_len = self.received_len.saturating_add(chunk.len() as u32);

        if !self.discarding {
            if self.data.len() + chunk.len() > INBOUND_CAPACITY {
                warn!(
                    "Inbound message on {} overflows {} bytes; dropping it",
                    self.topic, INBOUND_CAPACITY
                );
                self.discarding = true;
            } else {
                let appended = self.data.extend_from_slice(chunk);
                debug_assert!(appended.is_ok(), "capacity checked above");
            }
        }

        if !last && self.received_len < self.expected_len {
            return None;
        }

        let message = if self.discarding {
            self.dropped = self.dropped.saturating_add(1);
            None
        } else {
            Some(ControlMessage {
                topic: self.topic.clone(),
                payload: self.data.clone(),
            })
        };
        self.reset();
        message
    }

    /// Forget any partial message.
    pub fn reset(&mut self) {
        self.topic.clear();
        self.data.clear();
        self.expected_len = 0;
        self.received_len = 0;
        self.in_progress = false;
        self.discarding = false;
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Messages dropped for size or left unfinished.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
