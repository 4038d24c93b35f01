//! Main loop body.
//!
//! The scheduler owns both managers, the event pump and the status LED, and
//! performs one cooperative iteration per [`Scheduler::run_once`] call.
//! Nothing inside blocks, so the caller decides how fast to spin.

use log::{info, warn};

use crate::connectivity::{ConnectivityManager, ConnectivityState};
use crate::indicator::{Indicator, IndicatorSink};
use crate::messaging::{EventPump, Inbox, MessagingLink};
use crate::radio::RadioLink;
use crate::sensors::SensorSource;
use crate::session::{SessionManager, SessionState};

/// Inbox refills per iteration while the pump still has events queued.
const MAX_PUMP_ROUNDS: usize = 4;

pub struct Scheduler<R, M, S, P, O> {
    connectivity: ConnectivityManager<R>,
    session: SessionManager<M, S>,
    pump: P,
    indicator: Indicator<O>,
    inbox: Inbox,
    iterations: u64,
}

impl<R, M, S, P, O> Scheduler<R, M, S, P, O>
where
    R: RadioLink,
    M: MessagingLink,
    S: SensorSource,
    P: EventPump,
    O: IndicatorSink,
{
    pub fn new(
        connectivity: ConnectivityManager<R>,
        session: SessionManager<M, S>,
        pump: P,
        indicator: Indicator<O>,
    ) -> Self {
        Self {
            connectivity,
            session,
            pump,
            indicator,
            inbox: Inbox::new(),
            iterations: 0,
        }
    }

    /// One loop iteration: deliver pending completions, then tick the
    /// connectivity manager, the session manager and the indicator.
    pub fn run_once(&mut self, now_ms: u32) {
        self.deliver_events();

        let before = (self.connectivity.state(), self.session.state());

        self.connectivity.tick(now_ms);
        self.session.tick(now_ms, self.connectivity.is_connected());

        let after = (self.connectivity.state(), self.session.state());
        if before != after {
            info!(
                "Node state: network {}, broker {}",
                after.0.as_str(),
                after.1.as_str()
            );
        }

        self.indicator.update(now_ms, self.is_online());
        self.iterations = self.iterations.wrapping_add(1);
    }

    /// Drain the pump into the session. A full inbox means the pump may hold
    /// more, so it is polled again, up to [`MAX_PUMP_ROUNDS`] times.
    fn deliver_events(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            self.pump.poll(&mut self.inbox);
            let refill = self.inbox.is_full();
            while let Some(event) = self.inbox.pop() {
                self.session.handle_event(event);
            }
            if !refill {
                break;
            }
        }

        if self.inbox.take_control_lost() {
            warn!("Inbox overflowed with completions pending");
            self.session.on_events_lost();
        }
    }

    /// Network joined and broker session established.
    pub fn is_online(&self) -> bool {
        self.connectivity.state() == ConnectivityState::Connected
            && self.session.state() == SessionState::Connected
    }

    pub fn request_shutdown(&mut self) {
        self.session.request_shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.session.is_shut_down()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Events dropped because the inbox was full.
    pub fn dropped_events(&self) -> u32 {
        self.inbox.dropped()
    }

    pub fn connectivity(&self) -> &ConnectivityManager<R> {
        &self.connectivity
    }

    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<R> {
        &mut self.connectivity
    }

    pub fn session(&self) -> &SessionManager<M, S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<M, S> {
        &mut self.session
    }

    pub fn indicator(&self) -> &Indicator<O> {
        &self.indicator
    }
}
