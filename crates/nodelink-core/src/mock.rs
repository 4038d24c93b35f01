//! In-memory boundaries for unit tests.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::net::{Ipv4Addr, SocketAddrV4};

use crate::config::BrokerConfig;
use crate::indicator::IndicatorSink;
use crate::messaging::{
    ClientInfo, ConnectionStatus, EventPump, Inbox, MessagingError, MessagingEvent,
    MessagingLink, QoS, SessionHandle,
};
use crate::radio::{LinkStatus, RadioError, RadioLink};
use crate::sensors::{Reading, SensorSource};
use crate::session::SessionSettings;

pub const ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 2);

// -----------------------------------------------------------------------------
// Radio
// -----------------------------------------------------------------------------

pub struct MockRadio {
    pub status: LinkStatus,
    /// Status the link reports after a connect request.
    pub status_after_connect: LinkStatus,
    pub init_result: Result<(), RadioError>,
    pub connect_result: Result<(), RadioError>,
    pub init_calls: u32,
    pub enable_calls: u32,
    pub disable_calls: u32,
    pub connect_calls: u32,
}

impl MockRadio {
    pub fn new() -> Self {
        Self {
            status: LinkStatus::Down,
            status_after_connect: LinkStatus::Connecting,
            init_result: Ok(()),
            connect_result: Ok(()),
            init_calls: 0,
            enable_calls: 0,
            disable_calls: 0,
            connect_calls: 0,
        }
    }
}

impl RadioLink for MockRadio {
    fn init(&mut self) -> Result<(), RadioError> {
        self.init_calls += 1;
        self.init_result
    }

    fn enable_station_mode(&mut self) {
        self.enable_calls += 1;
    }

    fn disable_station_mode(&mut self) {
        self.disable_calls += 1;
        self.status = LinkStatus::Down;
    }

    fn connect_async(&mut self, _ssid: &str, _password: &str) -> Result<(), RadioError> {
        self.connect_calls += 1;
        self.connect_result?;
        self.status = self.status_after_connect;
        Ok(())
    }

    fn link_status(&mut self) -> LinkStatus {
        self.status
    }

    fn assigned_address(&self) -> Option<Ipv4Addr> {
        (self.status == LinkStatus::Up).then_some(ADDRESS)
    }
}

// -----------------------------------------------------------------------------
// Broker
// -----------------------------------------------------------------------------

/// How the mock broker answers requests. `None` means no answer at all.
pub struct BrokerBehaviour {
    pub connect: Option<ConnectionStatus>,
    pub subscribe: Option<Result<(), MessagingError>>,
    pub unsubscribe: Option<Result<(), MessagingError>>,
    pub publish: Option<Result<(), MessagingError>>,
    pub reject_create: bool,
    pub reject_publish: bool,
}

impl Default for BrokerBehaviour {
    fn default() -> Self {
        Self {
            connect: Some(ConnectionStatus::Accepted),
            subscribe: Some(Ok(())),
            unsubscribe: Some(Ok(())),
            publish: Some(Ok(())),
            reject_create: false,
            reject_publish: false,
        }
    }
}

#[derive(Default)]
pub struct BrokerLog {
    pub behaviour: BrokerBehaviour,
    pub pending: VecDeque<MessagingEvent>,
    pub next_handle: u32,
    pub live: Vec<SessionHandle>,
    pub created: u32,
    pub released: Vec<SessionHandle>,
    pub connects: Vec<(SessionHandle, SocketAddrV4, String)>,
    pub inbound_registered: Vec<SessionHandle>,
    pub publishes: Vec<(String, String)>,
    pub subscribes: Vec<String>,
    pub unsubscribes: Vec<String>,
    pub disconnects: Vec<SessionHandle>,
    /// Pump pushes everything, ignoring a full inbox.
    pub flood_inbox: bool,
}

impl BrokerLog {
    /// Queue an inbound control message split into `chunks`.
    pub fn deliver(&mut self, handle: SessionHandle, topic: &str, chunks: &[&[u8]]) {
        let total_len = chunks.iter().map(|c| c.len() as u32).sum();
        self.pending.push_back(MessagingEvent::IncomingPublish {
            handle,
            topic: topic.to_string(),
            total_len,
        });
        for (i, chunk) in chunks.iter().enumerate() {
            self.pending.push_back(MessagingEvent::IncomingData {
                handle,
                data: chunk.to_vec(),
                last: i + 1 == chunks.len(),
            });
        }
    }
}

pub type SharedBroker = Rc<RefCell<BrokerLog>>;

pub struct MockBroker {
    pub log: SharedBroker,
}

impl MockBroker {
    pub fn with_pump() -> (Self, MockPump) {
        let log = SharedBroker::default();
        (Self { log: log.clone() }, MockPump { log })
    }
}

impl MessagingLink for MockBroker {
    fn create_session(&mut self) -> Result<SessionHandle, MessagingError> {
        let mut log = self.log.borrow_mut();
        if log.behaviour.reject_create {
            return Err(MessagingError::OutOfResources);
        }
        log.next_handle += 1;
        let handle = SessionHandle(log.next_handle);
        log.live.push(handle);
        log.created += 1;
        Ok(handle)
    }

    fn release_session(&mut self, handle: SessionHandle) {
        let mut log = self.log.borrow_mut();
        log.live.retain(|h| *h != handle);
        log.released.push(handle);
    }

    fn connect_async(
        &mut self,
        handle: SessionHandle,
        broker: SocketAddrV4,
        client: &ClientInfo<'_>,
    ) -> Result<(), MessagingError> {
        let mut log = self.log.borrow_mut();
        log.connects
            .push((handle, broker, client.client_id.to_string()));
        if let Some(status) = log.behaviour.connect {
            log.pending
                .push_back(MessagingEvent::Connection { handle, status });
        }
        Ok(())
    }

    fn register_inbound(&mut self, handle: SessionHandle) {
        self.log.borrow_mut().inbound_registered.push(handle);
    }

    fn publish_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
        payload: &[u8],
        _qos: QoS,
        _retain: bool,
    ) -> Result<(), MessagingError> {
        let mut log = self.log.borrow_mut();
        if log.behaviour.reject_publish {
            return Err(MessagingError::NotConnected);
        }
        log.publishes.push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        if let Some(result) = log.behaviour.publish.clone() {
            log.pending
                .push_back(MessagingEvent::PublishComplete { handle, result });
        }
        Ok(())
    }

    fn subscribe_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
        _qos: QoS,
    ) -> Result<(), MessagingError> {
        let mut log = self.log.borrow_mut();
        log.subscribes.push(topic.to_string());
        if let Some(result) = log.behaviour.subscribe.clone() {
            log.pending
                .push_back(MessagingEvent::SubscribeAck { handle, result });
        }
        Ok(())
    }

    fn unsubscribe_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
    ) -> Result<(), MessagingError> {
        let mut log = self.log.borrow_mut();
        log.unsubscribes.push(topic.to_string());
        if let Some(result) = log.behaviour.unsubscribe.clone() {
            log.pending
                .push_back(MessagingEvent::UnsubscribeAck { handle, result });
        }
        Ok(())
    }

    fn disconnect(&mut self, handle: SessionHandle) {
        self.log.borrow_mut().disconnects.push(handle);
    }
}

pub struct MockPump {
    pub log: SharedBroker,
}

impl EventPump for MockPump {
    fn poll(&mut self, inbox: &mut Inbox) {
        let mut log = self.log.borrow_mut();
        while log.flood_inbox || !inbox.is_full() {
            let Some(event) = log.pending.pop_front() else {
                break;
            };
            inbox.push(event);
        }
    }
}

// -----------------------------------------------------------------------------
// Sensor and indicator
// -----------------------------------------------------------------------------

pub struct MockSensor {
    pub celsius: f32,
    pub reads: u32,
}

impl MockSensor {
    pub fn new(celsius: f32) -> Self {
        Self { celsius, reads: 0 }
    }
}

impl SensorSource for MockSensor {
    fn read(&mut self) -> Reading {
        self.reads += 1;
        Reading::new(self.celsius)
    }
}

#[derive(Default)]
pub struct MockLed {
    pub on: bool,
    pub writes: Vec<bool>,
}

impl IndicatorSink for MockLed {
    fn set(&mut self, on: bool) {
        self.on = on;
        self.writes.push(on);
    }
}

/// Broker settings with a fast clock: 100 ms ticks, 1 s publish period,
/// 1 s connect timeout.
pub fn settings() -> SessionSettings {
    let config = BrokerConfig {
        address: String::from("10.0.0.5"),
        client_id: String::from("pico"),
        publish_period_ms: 1_000,
        connect_timeout_ms: 1_000,
        ..BrokerConfig::default()
    };
    match SessionSettings::from_config(&config) {
        Ok(settings) => settings,
        Err(e) => panic!("test settings rejected: {e}"),
    }
}
