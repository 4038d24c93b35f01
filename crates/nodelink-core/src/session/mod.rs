//! Broker session state machine.
//!
//! The session manager owns the messaging link and walks one broker session
//! through `Disconnected → Connecting → Connected`, subscribing to the
//! control topic once the broker accepts and publishing a reading every
//! publish period. It only runs while the connectivity manager reports a
//! link; losing the link tears the session down on the next tick.
//!
//! Completions of the link's asynchronous calls reach the manager through
//! [`SessionManager::handle_event`], which the scheduler calls for every
//! event the pump delivered before it ticks the manager.

mod inbound;
mod settings;

pub use inbound::{ControlMessage, INBOUND_CAPACITY, InboundAccumulator, TOPIC_CAPACITY};
pub use settings::{CLIENT_ID_MAX, SessionSettings};

use log::{debug, error, info, warn};

use crate::messaging::{ConnectionStatus, MessagingEvent, MessagingLink, SessionHandle};
use crate::sensors::SensorSource;
use crate::tick::{TickBudget, count_down};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Running totals since start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sessions_started: u32,
    pub publishes: u32,
    pub publish_failures: u32,
    pub control_messages: u32,
}

pub struct SessionManager<M, S> {
    link: M,
    sensor: S,
    settings: SessionSettings,
    state: SessionState,
    handle: Option<SessionHandle>,
    budget: TickBudget,
    /// Set by the connection callback once the broker accepted.
    connect_done: bool,
    /// Set by any failure event; the next tick drops the session.
    session_lost: bool,
    connect_remaining_ms: u32,
    publish_countdown_ms: u32,
    /// Acknowledged subscriptions. Signed so an underflow is detectable.
    subscriptions: i32,
    shutdown_requested: bool,
    inbound: InboundAccumulator,
    control_message: Option<ControlMessage>,
    stats: SessionStats,
}

impl<M, S> SessionManager<M, S>
where
    M: MessagingLink,
    S: SensorSource,
{
    pub fn new(link: M, sensor: S, settings: SessionSettings) -> Self {
        Self {
            budget: TickBudget::new(settings.tick_interval_ms),
            publish_countdown_ms: settings.publish_period_ms,
            link,
            sensor,
            settings,
            state: SessionState::Disconnected,
            handle: None,
            connect_done: false,
            session_lost: false,
            connect_remaining_ms: 0,
            subscriptions: 0,
            shutdown_requested: false,
            inbound: InboundAccumulator::new(),
            control_message: None,
            stats: SessionStats::default(),
        }
    }

    /// Advance the state machine.
    ///
    /// `connectivity_connected == false` resets the session at once,
    /// whatever state it is in. Otherwise this runs at most once per tick
    /// interval.
    pub fn tick(&mut self, now_ms: u32, connectivity_connected: bool) {
        if !connectivity_connected {
            if self.state != SessionState::Disconnected || self.handle.is_some() {
                info!("Network down, resetting {} session", self.state.as_str());
                self.drop_session();
            }
            return;
        }

        if !self.budget.is_due(now_ms) {
            return;
        }

        match self.state {
            SessionState::Disconnected => {
                if !self.shutdown_requested {
                    self.start_session();
                }
            }
            SessionState::Connecting => self.poll_connecting(),
            SessionState::Connected => self.poll_connected(),
        }
    }

    /// Apply one completion delivered by the event pump.
    pub fn handle_event(&mut self, event: MessagingEvent) {
        let Some(live) = self.handle else {
            debug!("No live session, ignoring event for {:?}", event.handle());
            return;
        };
        if event.handle() != live {
            debug!("Ignoring stale event for {:?}", event.handle());
            return;
        }

        match event {
            MessagingEvent::Connection { status, .. } => self.on_connection(live, status),
            MessagingEvent::PublishComplete { result, .. } => match result {
                Ok(()) => debug!("Publish to {} completed", self.settings.publish_topic),
                Err(e) => {
                    warn!("Publish to {} failed: {}", self.settings.publish_topic, e);
                    self.stats.publish_failures += 1;
                    self.session_lost = true;
                }
            },
            MessagingEvent::SubscribeAck { result, .. } => match result {
                Ok(()) => {
                    self.subscriptions += 1;
                    info!(
                        "Subscribed to {} ({} active)",
                        self.settings.control_topic, self.subscriptions
                    );
                }
                Err(e) => {
                    warn!("Subscribe to {} failed: {}", self.settings.control_topic, e);
                    self.session_lost = true;
                }
            },
            MessagingEvent::UnsubscribeAck { result, .. } => match result {
                Ok(()) => self.on_unsubscribed(),
                Err(e) => {
                    warn!("Unsubscribe from {} failed: {}", self.settings.control_topic, e);
                    self.session_lost = true;
                    if self.shutdown_requested {
                        self.finish_shutdown();
                    }
                }
            },
            MessagingEvent::IncomingPublish {
                topic, total_len, ..
            } => {
                debug!("Incoming publish on {}, {} bytes", topic, total_len);
                self.inbound.begin(&topic, total_len);
            }
            MessagingEvent::IncomingData { data, last, .. } => {
                if let Some(message) = self.inbound.append(&data, last) {
                    info!(
                        "Control message on {}: {}",
                        message.topic,
                        message.text().unwrap_or("<binary>")
                    );
                    self.stats.control_messages += 1;
                    self.control_message = Some(message);
                }
            }
        }
    }

    /// Stop publishing, unsubscribe, and disconnect once no subscription
    /// is outstanding. The manager does not reconnect afterwards.
    pub fn request_shutdown(&mut self) {
        if self.shutdown_requested {
            return;
        }
        self.shutdown_requested = true;
        info!("Session shutdown requested");

        let Some(handle) = self.handle else {
            return;
        };

        if self.state == SessionState::Connected && self.subscriptions > 0 {
            match self
                .link
                .unsubscribe_async(handle, &self.settings.control_topic)
            {
                Ok(()) => info!("Unsubscribing from {}", self.settings.control_topic),
                Err(e) => {
                    warn!("Unsubscribe from {} rejected: {}", self.settings.control_topic, e);
                    self.finish_shutdown();
                }
            }
        } else {
            self.finish_shutdown();
        }
    }

    /// A completion was dropped before it reached [`Self::handle_event`].
    ///
    /// Its outcome is unknown, so the live session is given up: reset on the
    /// next tick, or disconnected at once while shutting down.
    pub fn on_events_lost(&mut self) {
        if self.handle.is_none() {
            return;
        }
        if self.shutdown_requested {
            warn!("Completion lost during shutdown, disconnecting");
            self.finish_shutdown();
        } else {
            warn!("Completion lost, resetting {} session", self.state.as_str());
            self.session_lost = true;
        }
    }

    /// Shutdown was requested and the session has been torn down.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown_requested && self.handle.is_none()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscriptions(&self) -> i32 {
        self.subscriptions
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Most recent complete control message, if not yet taken.
    pub fn take_control_message(&mut self) -> Option<ControlMessage> {
        self.control_message.take()
    }

    pub fn link(&self) -> &M {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut M {
        &mut self.link
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    fn start_session(&mut self) {
        if let Some(stale) = self.handle.take() {
            self.link.release_session(stale);
        }
        self.clear_session_flags();

        let handle = match self.link.create_session() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not create broker session: {}", e);
                return;
            }
        };
        assert!(
            self.handle.is_none(),
            "session created while another is live"
        );
        self.handle = Some(handle);
        self.stats.sessions_started += 1;

        info!(
            "Connecting to broker at {} as {}",
            self.settings.broker, self.settings.client_id
        );
        let client = self.settings.client_info();
        if let Err(e) = self.link.connect_async(handle, self.settings.broker, &client) {
            warn!("Broker connect request rejected: {}", e);
            self.drop_session();
            return;
        }
        self.link.register_inbound(handle);

        self.connect_remaining_ms = self.settings.connect_timeout_ms;
        self.state = SessionState::Connecting;
    }

    fn poll_connecting(&mut self) {
        if self.session_lost {
            self.drop_session();
            return;
        }

        if self.connect_done {
            info!("Broker session established");
            self.publish_countdown_ms = self.settings.publish_period_ms;
            self.state = SessionState::Connected;
            return;
        }

        if self.settings.connect_timeout_ms == 0 {
            return;
        }
        self.connect_remaining_ms =
            count_down(self.connect_remaining_ms, self.budget.interval_ms());
        if self.connect_remaining_ms == 0 {
            warn!(
                "Broker did not answer within {} ms",
                self.settings.connect_timeout_ms
            );
            self.drop_session();
        }
    }

    fn poll_connected(&mut self) {
        if self.session_lost {
            self.drop_session();
            return;
        }
        if self.shutdown_requested {
            return;
        }

        self.publish_countdown_ms =
            count_down(self.publish_countdown_ms, self.budget.interval_ms());
        if self.publish_countdown_ms == 0 {
            self.publish_countdown_ms = self.settings.publish_period_ms;
            self.publish_reading();
        }
    }

    fn publish_reading(&mut self) {
        let Some(handle) = self.handle else {
            return;
        };

        let payload = self.sensor.read().to_payload();
        info!("Publishing {} to {}", payload, self.settings.publish_topic);
        let result = self.link.publish_async(
            handle,
            &self.settings.publish_topic,
            payload.as_bytes(),
            self.settings.publish_qos,
            self.settings.retain,
        );
        match result {
            Ok(()) => self.stats.publishes += 1,
            Err(e) => {
                warn!("Publish to {} rejected: {}", self.settings.publish_topic, e);
                self.stats.publish_failures += 1;
                self.session_lost = true;
            }
        }
    }

    fn on_connection(&mut self, handle: SessionHandle, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Accepted => {
                info!("Broker accepted connection");
                self.connect_done = true;
                if let Err(e) = self.link.subscribe_async(
                    handle,
                    &self.settings.control_topic,
                    self.settings.subscribe_qos,
                ) {
                    warn!("Subscribe to {} rejected: {}", self.settings.control_topic, e);
                    self.session_lost = true;
                }
            }
            ConnectionStatus::Refused(code) => {
                warn!("Broker refused connection (code {})", code);
                self.session_lost = true;
            }
            ConnectionStatus::Disconnected => {
                warn!("Broker closed the connection");
                self.session_lost = true;
            }
            ConnectionStatus::Timeout => {
                warn!("Broker connection timed out");
                self.session_lost = true;
            }
        }
    }

    fn on_unsubscribed(&mut self) {
        self.subscriptions -= 1;
        assert!(
            self.subscriptions >= 0,
            "unsubscribe acknowledged without a matching subscription"
        );
        info!(
            "Unsubscribed from {} ({} active)",
            self.settings.control_topic, self.subscriptions
        );

        if self.subscriptions == 0 && self.shutdown_requested {
            self.finish_shutdown();
        }
    }

    fn finish_shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!("Disconnecting from broker");
            self.link.disconnect(handle);
            self.link.release_session(handle);
        }
        self.clear_session_flags();
        self.state = SessionState::Disconnected;
    }

    /// Release the live session, if any, and return to `Disconnected`.
    fn drop_session(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Releasing session {:?}", handle);
            self.link.release_session(handle);
        }
        self.clear_session_flags();
        self.state = SessionState::Disconnected;
    }

    fn clear_session_flags(&mut self) {
        self.connect_done = false;
        self.session_lost = false;
        self.connect_remaining_ms = 0;
        self.publish_countdown_ms = self.settings.publish_period_ms;
        self.subscriptions = 0;
        self.inbound.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{EventPump, Inbox, MessagingError};
    use crate::mock::{BrokerLog, MockBroker, MockPump, MockSensor, settings};
    use alloc::string::String;
    use core::cell::{Ref, RefMut};
    use core::net::{Ipv4Addr, SocketAddrV4};

    struct Harness {
        session: SessionManager<MockBroker, MockSensor>,
        pump: MockPump,
        inbox: Inbox,
        now: u32,
    }

    impl Harness {
        fn new() -> Self {
            let (broker, pump) = MockBroker::with_pump();
            Self {
                session: SessionManager::new(broker, MockSensor::new(21.5), settings()),
                pump,
                inbox: Inbox::new(),
                now: 0,
            }
        }

        fn log(&self) -> Ref<'_, BrokerLog> {
            self.pump.log.borrow()
        }

        fn drain(&mut self) {
            self.pump.poll(&mut self.inbox);
            while let Some(event) = self.inbox.pop() {
                self.session.handle_event(event);
            }
        }

        /// Deliver pending events, then tick one interval later.
        fn step(&mut self, connected: bool) {
            self.drain();
            self.now = self.now.wrapping_add(100);
            self.session.tick(self.now, connected);
        }

        fn log_mut(&self) -> RefMut<'_, BrokerLog> {
            self.pump.log.borrow_mut()
        }

        fn steps(&mut self, n: usize) {
            for _ in 0..n {
                self.step(true);
            }
        }

        /// Connected with one acknowledged subscription.
        fn connected() -> Self {
            let mut h = Self::new();
            h.steps(3);
            assert_eq!(h.session.state(), SessionState::Connected);
            assert_eq!(h.session.subscriptions(), 1);
            h
        }
    }

    #[test]
    fn test_no_connect_while_network_down() {
        let mut h = Harness::new();
        for _ in 0..20 {
            h.step(false);
        }

        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.log().created, 0);
        assert!(h.log().connects.is_empty());
    }

    #[test]
    fn test_connects_and_subscribes() {
        let mut h = Harness::new();
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Connecting);
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Connected);
        h.step(true);

        let log = h.log();
        assert_eq!(log.connects.len(), 1);
        let (handle, broker, client_id) = &log.connects[0];
        assert_eq!(*broker, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 1883));
        assert_eq!(client_id, "pico");
        assert_eq!(log.inbound_registered, [*handle]);
        assert_eq!(log.subscribes, ["pico/led"]);
        assert_eq!(h.session.subscriptions(), 1);
        assert_eq!(h.session.stats().sessions_started, 1);
    }

    #[test]
    fn test_publishes_once_per_period() {
        let mut h = Harness::new();
        h.steps(11);
        assert!(h.log().publishes.is_empty());

        h.step(true);
        assert_eq!(h.log().publishes.len(), 1);
        assert_eq!(
            h.log().publishes[0],
            (
                String::from("pico/temperature"),
                String::from("{ \"t\": 21.50 }")
            )
        );

        h.steps(9);
        assert_eq!(h.log().publishes.len(), 1);
        h.step(true);
        assert_eq!(h.log().publishes.len(), 2);
        assert_eq!(h.session.sensor_mut().reads, 2);
        assert_eq!(h.session.stats().publishes, 2);
    }

    #[test]
    fn test_calls_between_ticks_do_nothing() {
        let mut h = Harness::connected();
        let now = h.now;
        for offset in 1..100 {
            h.session.tick(now + offset, true);
        }
        h.steps(8);
        assert!(h.log().publishes.is_empty());
    }

    #[test]
    fn test_refused_connection_resets_and_retries() {
        let mut h = Harness::new();
        h.log_mut().behaviour.connect = Some(ConnectionStatus::Refused(5));

        h.step(true);
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.log().released.len(), 1);
        assert!(h.log().live.is_empty());

        h.step(true);
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.log().created, 2);
    }

    #[test]
    fn test_silent_broker_times_out() {
        let mut h = Harness::new();
        h.log_mut().behaviour.connect = None;

        h.steps(10);
        assert_eq!(h.session.state(), SessionState::Connecting);
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.log().released.len(), 1);
    }

    #[test]
    fn test_network_loss_releases_session_at_once() {
        let mut h = Harness::connected();
        let handle = h.session.handle();

        // Same timestamp: the reset is not rate limited.
        h.session.tick(h.now, false);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.session.handle(), None);
        assert_eq!(h.session.subscriptions(), 0);
        assert_eq!(h.log().released.first().copied(), handle);
        assert!(h.log().live.is_empty());
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut h = Harness::connected();
        let stale = SessionHandle(99);

        h.session.handle_event(MessagingEvent::SubscribeAck {
            handle: stale,
            result: Ok(()),
        });
        h.session.handle_event(MessagingEvent::UnsubscribeAck {
            handle: stale,
            result: Ok(()),
        });
        h.session.handle_event(MessagingEvent::Connection {
            handle: stale,
            status: ConnectionStatus::Disconnected,
        });

        assert_eq!(h.session.subscriptions(), 1);
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Connected);
    }

    #[test]
    fn test_shutdown_unsubscribes_then_disconnects_once() {
        let mut h = Harness::connected();
        let handle = h.session.handle().unwrap();

        h.session.request_shutdown();
        assert_eq!(h.log().unsubscribes, ["pico/led"]);
        assert!(h.log().disconnects.is_empty());
        assert!(!h.session.is_shut_down());

        h.drain();
        assert_eq!(h.session.subscriptions(), 0);
        assert_eq!(h.log().disconnects, [handle]);
        assert!(h.session.is_shut_down());

        h.session.request_shutdown();
        h.steps(30);
        assert_eq!(h.log().disconnects.len(), 1);
        assert_eq!(h.log().created, 1);
        assert!(h.log().publishes.is_empty());
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_shutdown_without_subscription_disconnects_at_once() {
        let mut h = Harness::new();
        h.log_mut().behaviour.subscribe = None;
        h.steps(2);
        assert_eq!(h.session.state(), SessionState::Connected);

        h.session.request_shutdown();
        assert!(h.log().unsubscribes.is_empty());
        assert_eq!(h.log().disconnects.len(), 1);
        assert!(h.session.is_shut_down());
    }

    #[test]
    #[should_panic(expected = "without a matching subscription")]
    fn test_unmatched_unsubscribe_aborts() {
        let mut h = Harness::new();
        h.log_mut().behaviour.subscribe = None;
        h.steps(2);

        let handle = h.session.handle().unwrap();
        h.session.handle_event(MessagingEvent::UnsubscribeAck {
            handle,
            result: Ok(()),
        });
    }

    #[test]
    fn test_subscribe_failure_drops_session() {
        let mut h = Harness::new();
        h.log_mut().behaviour.subscribe = Some(Err(MessagingError::Rejected(128)));

        h.steps(3);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.session.subscriptions(), 0);
        assert_eq!(h.log().released.len(), 1);
    }

    #[test]
    fn test_publish_rejection_drops_session() {
        let mut h = Harness::new();
        h.log_mut().behaviour.reject_publish = true;

        h.steps(12);
        assert_eq!(h.session.stats().publish_failures, 1);
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.log().created, 2);
    }

    #[test]
    fn test_create_failure_stays_disconnected() {
        let mut h = Harness::new();
        h.log_mut().behaviour.reject_create = true;

        h.steps(5);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(h.log().connects.is_empty());
    }

    #[test]
    fn test_lost_completion_resets_session() {
        let mut h = Harness::new();
        h.log_mut().behaviour.subscribe = None;
        h.steps(2);
        assert_eq!(h.session.state(), SessionState::Connected);

        // The subscribe ack never arrives.
        h.session.on_events_lost();
        h.step(true);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.log().released.len(), 1);

        h.step(true);
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.log().created, 2);
    }

    #[test]
    fn test_lost_unsubscribe_ack_still_shuts_down() {
        let mut h = Harness::connected();
        h.log_mut().behaviour.unsubscribe = None;

        h.session.request_shutdown();
        assert!(!h.session.is_shut_down());

        h.session.on_events_lost();
        assert!(h.session.is_shut_down());
        assert_eq!(h.log().disconnects.len(), 1);

        h.session.on_events_lost();
        assert_eq!(h.log().disconnects.len(), 1);
    }

    #[test]
    fn test_control_message_is_reassembled() {
        let mut h = Harness::connected();
        let handle = h.session.handle().unwrap();

        h.log_mut().deliver(handle, "pico/led", &[b"bl", b"ink"]);
        h.drain();

        let message = h.session.take_control_message().unwrap();
        assert_eq!(message.topic.as_str(), "pico/led");
        assert_eq!(message.text(), Some("blink"));
        assert_eq!(h.session.stats().control_messages, 1);
        assert!(h.session.take_control_message().is_none());
    }
}
