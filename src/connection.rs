//! WiFi and MQTT lifecycle.
//!
//! `ConnectionManager` owns the single [`ConnectionState`] of the device. It
//! never waits: each call to [`ConnectionManager::advance`] polls the
//! transport, takes every transition that is already decided, and returns.
//! Retries are gated by per-layer [`Backoff`] deadlines.

use embassy_time::{Duration, Instant};

use crate::backoff::Backoff;
use crate::config::Config;
use crate::transport::{ConnectStatus, LastWill, Transport};

/// Upper bound on transitions taken in one `advance` call.
const MAX_STEPS_PER_ADVANCE: usize = 6;

/// Connectivity of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    WifiConnecting,
    WifiConnected,
    BrokerConnecting,
    BrokerConnected,
    /// A transport error was seen while connected; the next advance decides
    /// which layer to rebuild.
    Degraded,
}

impl ConnectionState {
    /// Whether `next` is a regular edge from `self`.
    ///
    /// `stop()` may move any state to `Disconnected` and is not listed here.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, WifiConnecting)
                | (WifiConnecting, WifiConnected)
                | (WifiConnecting, Disconnected)
                | (WifiConnected, BrokerConnecting)
                | (WifiConnected, Disconnected)
                | (BrokerConnecting, BrokerConnected)
                | (BrokerConnecting, WifiConnected)
                | (BrokerConnecting, Disconnected)
                | (BrokerConnected, Degraded)
                | (Degraded, BrokerConnecting)
                | (Degraded, WifiConnecting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::WifiConnecting => "wifi-connecting",
            ConnectionState::WifiConnected => "wifi-connected",
            ConnectionState::BrokerConnecting => "broker-connecting",
            ConnectionState::BrokerConnected => "broker-connected",
            ConnectionState::Degraded => "degraded",
        }
    }
}

/// Drives the connection lifecycle.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    running: bool,
    wifi_backoff: Backoff,
    broker_backoff: Backoff,
    attempt_deadline: Option<Instant>,
    connect_timeout: Duration,
    session: u32,
    debug: bool,
}

impl ConnectionManager {
    pub fn new(config: &Config) -> Self {
        let seed = config.jitter_seed();
        Self {
            state: ConnectionState::Disconnected,
            running: false,
            wifi_backoff: Backoff::new(config.wifi_backoff, seed),
            broker_backoff: Backoff::new(config.broker_backoff, seed.rotate_left(16)),
            attempt_deadline: None,
            connect_timeout: config.connect_timeout,
            session: 0,
            debug: config.debug,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of broker sessions established so far. Changes exactly when
    /// the state enters `BrokerConnected`.
    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn wifi_backoff(&self) -> &Backoff {
        &self.wifi_backoff
    }

    pub fn broker_backoff(&self) -> &Backoff {
        &self.broker_backoff
    }

    /// Allows the next `advance` to leave `Disconnected`.
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Moves to `Disconnected` from any state and tears both layers down.
    pub fn stop<T: Transport>(&mut self, transport: &mut T) {
        self.running = false;
        self.attempt_deadline = None;
        transport.mqtt_disconnect();
        transport.wifi_disconnect();
        if self.state != ConnectionState::Disconnected {
            self.log_transition(ConnectionState::Disconnected);
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Reports a publish or subscribe failure on an established session.
    ///
    /// Counts as a broker failure, so the reconnect waits for the backoff.
    pub fn mark_degraded<T: Transport>(&mut self, transport: &mut T, now: Instant) {
        if self.state == ConnectionState::BrokerConnected {
            self.session_lost(transport, now);
        }
    }

    /// The engine finished setting up the current session. Only now is the
    /// broker considered healthy again.
    pub fn confirm_session(&mut self) {
        if self.state == ConnectionState::BrokerConnected && self.broker_backoff.failures() > 0 {
            if self.debug {
                info!("broker session {} confirmed", self.session);
            }
            self.broker_backoff.reset();
        }
    }

    /// Polls the transport and takes every transition already decided.
    ///
    /// Returns `true` if the state changed.
    pub fn advance<T: Transport>(
        &mut self,
        transport: &mut T,
        config: &Config,
        will: &LastWill<'_>,
        now: Instant,
    ) -> bool {
        let mut changed = false;
        for _ in 0..MAX_STEPS_PER_ADVANCE {
            if !self.step(transport, config, will, now) {
                break;
            }
            changed = true;
        }
        changed
    }

    fn step<T: Transport>(
        &mut self,
        transport: &mut T,
        config: &Config,
        will: &LastWill<'_>,
        now: Instant,
    ) -> bool {
        match self.state {
            ConnectionState::Disconnected => {
                if !self.running || !self.wifi_backoff.ready(now) {
                    return false;
                }
                self.begin_attempt(ConnectionState::WifiConnecting, now);
                true
            }
            ConnectionState::WifiConnecting => {
                match transport.wifi_connect(config.ssid(), config.password()) {
                    ConnectStatus::Connected => {
                        self.wifi_backoff.reset();
                        self.attempt_deadline = None;
                        self.enter(ConnectionState::WifiConnected);
                    }
                    ConnectStatus::Failed => self.wifi_failed(now),
                    ConnectStatus::Pending if self.timed_out(now) => {
                        transport.wifi_disconnect();
                        self.wifi_failed(now);
                    }
                    ConnectStatus::Pending => return false,
                }
                true
            }
            ConnectionState::WifiConnected => {
                if !transport.wifi_is_connected() {
                    self.enter(ConnectionState::Disconnected);
                    return true;
                }
                if !self.broker_backoff.ready(now) {
                    return false;
                }
                self.begin_attempt(ConnectionState::BrokerConnecting, now);
                true
            }
            ConnectionState::BrokerConnecting => {
                if !transport.wifi_is_connected() {
                    transport.mqtt_disconnect();
                    self.broker_failed(ConnectionState::Disconnected, now);
                    return true;
                }
                match transport.mqtt_connect(config.broker(), config.client_id(), will) {
                    ConnectStatus::Connected => {
                        self.attempt_deadline = None;
                        self.session = self.session.wrapping_add(1);
                        self.enter(ConnectionState::BrokerConnected);
                    }
                    ConnectStatus::Failed => {
                        self.broker_failed(ConnectionState::WifiConnected, now)
                    }
                    ConnectStatus::Pending if self.timed_out(now) => {
                        transport.mqtt_disconnect();
                        self.broker_failed(ConnectionState::WifiConnected, now);
                    }
                    ConnectStatus::Pending => return false,
                }
                true
            }
            ConnectionState::BrokerConnected => {
                if transport.wifi_is_connected() && transport.mqtt_is_connected() {
                    return false;
                }
                self.session_lost(transport, now);
                true
            }
            ConnectionState::Degraded => {
                if !transport.wifi_is_connected() {
                    self.begin_attempt(ConnectionState::WifiConnecting, now);
                    return true;
                }
                if !self.broker_backoff.ready(now) {
                    return false;
                }
                self.begin_attempt(ConnectionState::BrokerConnecting, now);
                true
            }
        }
    }

    fn begin_attempt(&mut self, next: ConnectionState, now: Instant) {
        self.attempt_deadline = Some(now.checked_add(self.connect_timeout).unwrap_or(now));
        self.enter(next);
    }

    fn timed_out(&self, now: Instant) -> bool {
        self.attempt_deadline.is_some_and(|deadline| now >= deadline)
    }

    fn wifi_failed(&mut self, now: Instant) {
        self.attempt_deadline = None;
        let delay = self.wifi_backoff.record_failure(now);
        if self.debug {
            warn!(
                "wifi attempt {} failed, retry in {} ms",
                self.wifi_backoff.failures(),
                delay.as_millis()
            );
        }
        self.enter(ConnectionState::Disconnected);
    }

    fn broker_failed(&mut self, next: ConnectionState, now: Instant) {
        self.attempt_deadline = None;
        let delay = self.broker_backoff.record_failure(now);
        if self.debug {
            warn!(
                "broker attempt {} failed, retry in {} ms",
                self.broker_backoff.failures(),
                delay.as_millis()
            );
        }
        self.enter(next);
    }

    fn session_lost<T: Transport>(&mut self, transport: &mut T, now: Instant) {
        transport.mqtt_disconnect();
        let delay = self.broker_backoff.record_failure(now);
        if self.debug {
            warn!(
                "broker session {} lost, reconnect in {} ms",
                self.session,
                delay.as_millis()
            );
        }
        self.enter(ConnectionState::Degraded);
    }

    fn enter(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal connection transition"
        );
        self.log_transition(next);
        self.state = next;
    }

    fn log_transition(&self, next: ConnectionState) {
        if self.debug {
            info!("connection: {} -> {}", self.state.as_str(), next.as_str());
        }
    }
}
