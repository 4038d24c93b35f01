//! Simulated hardware and network.
//!
//! Every boundary the core needs is backed by one shared [`World`]: the
//! radio joins after a short delay, the broker answers requests with small
//! latencies through the event pump, and the ADC reads a slowly drifting
//! die temperature. The scenario decides which of these misbehave.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use clap::ValueEnum;
use log::{debug, info, warn};

use nodelink_core::indicator::IndicatorSink;
use nodelink_core::messaging::{
    ClientInfo, ConnectionStatus, EventPump, Inbox, MessagingError, MessagingEvent,
    MessagingLink, QoS, SessionHandle,
};
use nodelink_core::radio::{LinkStatus, RadioError, RadioLink};
use nodelink_core::sensors::AdcChannel;
use nodelink_core::tick::elapsed_ms;

// ---------------------------------------------------------------------------
// Timing of the simulated network
// ---------------------------------------------------------------------------

const JOIN_DELAY_MS: u32 = 1_200;
const AUTH_REJECT_DELAY_MS: u32 = 800;
/// How long the link stays up before the `link-drop` scenario cuts it.
const LINK_DROP_AFTER_MS: u32 = 12_000;
const CONNACK_DELAY_MS: u32 = 150;
const ACK_DELAY_MS: u32 = 40;
/// Delay between a subscription and the control message sent to it.
const CONTROL_DELAY_MS: u32 = 2_000;
const CONTROL_CHUNK: usize = 4;

const STATION_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 23);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Network and broker behave.
    Healthy,
    /// The access point rejects the credentials.
    BadAuth,
    /// The link fails once after being up for a while.
    LinkDrop,
    /// The broker never answers connect requests.
    BrokerDown,
}

struct Scheduled {
    queued_at: u32,
    delay_ms: u32,
    event: MessagingEvent,
}

pub struct World {
    scenario: Scenario,
    now_ms: u32,

    station_enabled: bool,
    link: LinkStatus,
    link_changed_at: u32,
    link_dropped: bool,

    next_handle: u32,
    live_sessions: Vec<SessionHandle>,
    scheduled: VecDeque<Scheduled>,
    published: u32,
}

pub type SharedWorld = Rc<RefCell<World>>;

impl World {
    pub fn shared(scenario: Scenario, now_ms: u32) -> SharedWorld {
        Rc::new(RefCell::new(Self {
            scenario,
            now_ms,
            station_enabled: false,
            link: LinkStatus::Down,
            link_changed_at: now_ms,
            link_dropped: false,
            next_handle: 0,
            live_sessions: Vec::new(),
            scheduled: VecDeque::new(),
            published: 0,
        }))
    }

    pub fn set_now(&mut self, now_ms: u32) {
        self.now_ms = now_ms;
    }

    pub fn published(&self) -> u32 {
        self.published
    }

    pub fn live_sessions(&self) -> usize {
        self.live_sessions.len()
    }

    fn set_link(&mut self, link: LinkStatus) {
        if self.link != link {
            debug!("[radio] link {} -> {}", self.link.as_str(), link.as_str());
            self.link = link;
            self.link_changed_at = self.now_ms;
        }
    }

    /// Advance the association according to the scenario.
    fn update_link(&mut self) {
        let since = elapsed_ms(self.link_changed_at, self.now_ms);
        match (self.link, self.scenario) {
            (LinkStatus::Connecting, Scenario::BadAuth) if since >= AUTH_REJECT_DELAY_MS => {
                self.set_link(LinkStatus::AuthFailed);
            }
            (LinkStatus::Connecting, scenario)
                if scenario != Scenario::BadAuth && since >= JOIN_DELAY_MS =>
            {
                self.set_link(LinkStatus::Up);
            }
            (LinkStatus::Up, Scenario::LinkDrop)
                if !self.link_dropped && since >= LINK_DROP_AFTER_MS =>
            {
                warn!("[radio] access point went away");
                self.link_dropped = true;
                self.set_link(LinkStatus::LinkFailed);
            }
            _ => {}
        }
    }

    fn schedule(&mut self, delay_ms: u32, event: MessagingEvent) {
        self.scheduled.push_back(Scheduled {
            queued_at: self.now_ms,
            delay_ms,
            event,
        });
    }

    fn schedule_control_message(&mut self, handle: SessionHandle, topic: &str, body: &[u8]) {
        self.schedule(
            CONTROL_DELAY_MS,
            MessagingEvent::IncomingPublish {
                handle,
                topic: topic.to_owned(),
                total_len: body.len() as u32,
            },
        );
        let chunks = body.chunks(CONTROL_CHUNK).count();
        for (i, chunk) in body.chunks(CONTROL_CHUNK).enumerate() {
            self.schedule(
                CONTROL_DELAY_MS,
                MessagingEvent::IncomingData {
                    handle,
                    data: chunk.to_vec(),
                    last: i + 1 == chunks,
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

pub struct SimRadio {
    world: SharedWorld,
}

impl SimRadio {
    pub fn new(world: SharedWorld) -> Self {
        Self { world }
    }
}

impl RadioLink for SimRadio {
    fn init(&mut self) -> Result<(), RadioError> {
        info!("[radio] initialised");
        Ok(())
    }

    fn enable_station_mode(&mut self) {
        self.world.borrow_mut().station_enabled = true;
    }

    fn disable_station_mode(&mut self) {
        let mut world = self.world.borrow_mut();
        world.station_enabled = false;
        world.set_link(LinkStatus::Down);
    }

    fn connect_async(&mut self, ssid: &str, _password: &str) -> Result<(), RadioError> {
        let mut world = self.world.borrow_mut();
        if !world.station_enabled {
            return Err(RadioError::Connect(-1));
        }
        debug!("[radio] associating with {ssid}");
        world.set_link(LinkStatus::Connecting);
        Ok(())
    }

    fn link_status(&mut self) -> LinkStatus {
        let mut world = self.world.borrow_mut();
        world.update_link();
        world.link
    }

    fn assigned_address(&self) -> Option<Ipv4Addr> {
        (self.world.borrow().link == LinkStatus::Up).then_some(STATION_ADDRESS)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

pub struct SimBroker {
    world: SharedWorld,
}

impl SimBroker {
    pub fn new(world: SharedWorld) -> Self {
        Self { world }
    }
}

impl MessagingLink for SimBroker {
    fn create_session(&mut self) -> Result<SessionHandle, MessagingError> {
        let mut world = self.world.borrow_mut();
        world.next_handle += 1;
        let handle = SessionHandle(world.next_handle);
        world.live_sessions.push(handle);
        Ok(handle)
    }

    fn release_session(&mut self, handle: SessionHandle) {
        self.world
            .borrow_mut()
            .live_sessions
            .retain(|live| *live != handle);
    }

    fn connect_async(
        &mut self,
        handle: SessionHandle,
        broker: SocketAddrV4,
        client: &ClientInfo<'_>,
    ) -> Result<(), MessagingError> {
        let mut world = self.world.borrow_mut();
        if world.link != LinkStatus::Up {
            return Err(MessagingError::NotConnected);
        }
        info!("[broker] {} connecting to {}", client.client_id, broker);
        if world.scenario != Scenario::BrokerDown {
            world.schedule(
                CONNACK_DELAY_MS,
                MessagingEvent::Connection {
                    handle,
                    status: ConnectionStatus::Accepted,
                },
            );
        }
        Ok(())
    }

    fn register_inbound(&mut self, handle: SessionHandle) {
        debug!("[broker] inbound routing for {:?}", handle);
    }

    fn publish_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MessagingError> {
        let mut world = self.world.borrow_mut();
        if world.link != LinkStatus::Up {
            return Err(MessagingError::NotConnected);
        }
        info!(
            "[broker] {} <- {} (qos {}, retain {})",
            topic,
            String::from_utf8_lossy(payload),
            qos as u8,
            retain
        );
        world.published += 1;
        world.schedule(
            ACK_DELAY_MS,
            MessagingEvent::PublishComplete {
                handle,
                result: Ok(()),
            },
        );
        Ok(())
    }

    fn subscribe_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
        _qos: QoS,
    ) -> Result<(), MessagingError> {
        let mut world = self.world.borrow_mut();
        info!("[broker] subscription to {}", topic);
        world.schedule(
            ACK_DELAY_MS,
            MessagingEvent::SubscribeAck {
                handle,
                result: Ok(()),
            },
        );
        world.schedule_control_message(handle, topic, b"blink-250");
        Ok(())
    }

    fn unsubscribe_async(
        &mut self,
        handle: SessionHandle,
        topic: &str,
    ) -> Result<(), MessagingError> {
        let mut world = self.world.borrow_mut();
        info!("[broker] unsubscribe from {}", topic);
        world.schedule(
            ACK_DELAY_MS,
            MessagingEvent::UnsubscribeAck {
                handle,
                result: Ok(()),
            },
        );
        Ok(())
    }

    fn disconnect(&mut self, handle: SessionHandle) {
        info!("[broker] {:?} disconnected", handle);
    }
}

// ---------------------------------------------------------------------------
// Event pump
// ---------------------------------------------------------------------------

pub struct SimPump {
    world: SharedWorld,
}

impl SimPump {
    pub fn new(world: SharedWorld) -> Self {
        Self { world }
    }
}

impl EventPump for SimPump {
    fn poll(&mut self, inbox: &mut Inbox) {
        let mut world = self.world.borrow_mut();
        let now = world.now_ms;
        let mut waiting = VecDeque::with_capacity(world.scheduled.len());
        while let Some(entry) = world.scheduled.pop_front() {
            if !inbox.is_full() && elapsed_ms(entry.queued_at, now) >= entry.delay_ms {
                inbox.push(entry.event);
            } else {
                waiting.push_back(entry);
            }
        }
        world.scheduled = waiting;
    }
}

// ---------------------------------------------------------------------------
// ADC and LED
// ---------------------------------------------------------------------------

/// Die temperature diode drifting a couple of degrees around 27 °C.
pub struct SimAdc {
    world: SharedWorld,
}

impl SimAdc {
    pub fn new(world: SharedWorld) -> Self {
        Self { world }
    }
}

impl AdcChannel for SimAdc {
    fn read_raw(&mut self) -> u16 {
        let t = self.world.borrow().now_ms as f64 / 1000.0;
        (876.0 + 6.0 * (t / 20.0).sin()).round() as u16
    }
}

pub struct SimLed;

impl IndicatorSink for SimLed {
    fn set(&mut self, on: bool) {
        debug!("[led] {}", if on { "on" } else { "off" });
    }
}
