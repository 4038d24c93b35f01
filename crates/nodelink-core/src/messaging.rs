//! Messaging client boundary and its completion events.
//!
//! A messaging client reports results through callbacks. Here each callback
//! becomes a [`MessagingEvent`] that an [`EventPump`] drops into the
//! [`Inbox`] during `poll()`. The scheduler drains the inbox on the same
//! thread that runs the ticks, so session state is never touched
//! concurrently.

use alloc::string::String;
use alloc::vec::Vec;
use core::net::SocketAddrV4;
use heapless::Deque;
use log::warn;
use thiserror_no_std::Error;

use crate::error::ConfigError;

/// Events the inbox can hold between two scheduler iterations.
pub const INBOX_CAPACITY: usize = 16;

/// Delivery guarantee requested from the messaging client.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// QoS 0: fire and forget.
    AtMostOnce = 0,
    /// QoS 1: acknowledged, duplicates possible.
    AtLeastOnce = 1,
    /// QoS 2: assured single delivery.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ConfigError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ConfigError::InvalidQos(other)),
        }
    }
}

/// Opaque identifier of one broker session created by the messaging client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u32);

/// Message the broker publishes on our behalf if the session dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub message: &'a str,
    pub qos: QoS,
    pub retain: bool,
}

/// Connect-time parameters for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo<'a> {
    pub client_id: &'a str,
    pub keep_alive_s: u16,
    pub will: Option<LastWill<'a>>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("out of session resources")]
    OutOfResources,
    #[error("session is not connected")]
    NotConnected,
    #[error("request rejected by the client (code {0})")]
    Rejected(i32),
    #[error("request timed out")]
    Timeout,
}

/// Outcome reported by the connection callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Accepted,
    /// Broker refused the connection with the given return code.
    Refused(u8),
    /// An established connection was closed.
    Disconnected,
    Timeout,
}

/// One completed asynchronous operation or inbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagingEvent {
    Connection {
        handle: SessionHandle,
        status: ConnectionStatus,
    },
    PublishComplete {
        handle: SessionHandle,
        result: Result<(), MessagingError>,
    },
    SubscribeAck {
        handle: SessionHandle,
        result: Result<(), MessagingError>,
    },
    UnsubscribeAck {
        handle: SessionHandle,
        result: Result<(), MessagingError>,
    },
    /// Header of an inbound publish; the payload follows as data chunks.
    IncomingPublish {
        handle: SessionHandle,
        topic: String,
        total_len: u32,
    },
    IncomingData {
        handle: SessionHandle,
        data: Vec<u8>,
        last: bool,
    },
}

impl MessagingEvent {
    /// Completions and connection changes. Losing one leaves the session
    /// waiting for an answer that never comes.
    pub fn is_control(&self) -> bool {
        !matches!(
            self,
            Self::IncomingPublish { .. } | Self::IncomingData { .. }
        )
    }

    pub fn handle(&self) -> SessionHandle {
        match self {
            Self::Connection { handle, .. }
            | Self::PublishComplete { handle, .. }
            | Self::SubscribeAck { handle, .. }
            | Self::UnsubscribeAck { handle, .. }
            | Self::IncomingPublish { handle, .. }
            | Self::IncomingData { handle, .. } => *handle,
        }
    }
}

/// Operations the session manager needs from the messaging client.
///
/// Every `*_async` call only queues the request; its result arrives later
/// as a [`MessagingEvent`] for the same handle.
pub trait MessagingLink {
    fn create_session(&mut self) -> Result<SessionHandle, MessagingError>;

    /// Free a session. The handle must not be used afterwards.
    fn release_session(&mut self, handle: SessionHandle);

    fn connect_async(
        &mut self,
        handle: SessionHandle,
        broker: SocketAddrV4,
        client: &ClientInfo<'_>,
    ) -> Result<(), MessagingError>;

    /// Route inbound publishes for `handle` into the event stream.
    fn register_inbound(&mut self, handle: SessionHandle);

    fn publish_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MessagingError>;

    fn subscribe_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
        qos: QoS,
    ) -> Result<(), MessagingError>;

    fn unsubscribe_async(&mut self, handle: SessionHandle, topic: &str)
    -> Result<(), MessagingError>;

    fn disconnect(&mut self, handle: SessionHandle);
}

/// Source of pending completions, polled once per scheduler iteration.
pub trait EventPump {
    /// Move pending completions into `inbox`, oldest first. Stops once the
    /// inbox is full; the rest stay queued for the next call.
    fn poll(&mut self, inbox: &mut Inbox);
}

/// Bounded FIFO of completion events.
///
/// A full inbox drops the new event and counts it instead of growing.
/// Dropping a control event is remembered until
/// [`Inbox::take_control_lost`] is called.
#[derive(Debug, Default)]
pub struct Inbox {
    events: Deque<MessagingEvent, INBOX_CAPACITY>,
    dropped: u32,
    control_lost: bool,
}

impl Inbox {
    pub const fn new() -> Self {
        Self {
            events: Deque::new(),
            dropped: 0,
            control_lost: false,
        }
    }

    /// Queue an event. Returns `false` if it was dropped.
    pub fn push(&mut self, event: MessagingEvent) -> bool {
        match self.events.push_back(event) {
            Ok(()) => true,
            Err(event) => {
                self.dropped = self.dropped.saturating_add(1);
                if event.is_control() {
                    self.control_lost = true;
                    warn!(
                        "Inbox full ({} events), lost completion for {:?}",
                        INBOX_CAPACITY,
                        event.handle()
                    );
                } else {
                    warn!(
                        "Inbox full ({} events), dropping inbound data for {:?}",
                        INBOX_CAPACITY,
                        event.handle()
                    );
                }
                false
            }
        }
    }

    pub fn is_full(&self) -> bool {
        self.events.is_full()
    }

    /// Whether a control event was dropped since the last call.
    pub fn take_control_lost(&mut self) -> bool {
        core::mem::take(&mut self.control_lost)
    }

    pub fn pop(&mut self) -> Option<MessagingEvent> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events lost to overflow since start-up.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
