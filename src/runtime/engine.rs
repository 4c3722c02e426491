//! The sync loop.
//!
//! [`SyncEngine::tick`] is one non-blocking pass: drain inbound commands,
//! reconcile the register set, publish changed values, advance the connection
//! and refresh the status indicator. Everything the loop mutates is owned by
//! the engine, so a host that ticks from several threads wraps it in a
//! [`SharedEngine`] and holds the lock for the whole tick.

use core::cell::RefCell;
use core::fmt::Write as _;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, Timer};
use heapless::{String, Vec};

use super::bridge::RegisterBridge;
use super::publisher::{PublishRequest, Publisher};
use super::registry::{NameSet, RegisterRecord, RegisterTable};
use super::remote::{NoRemotes, RemoteDue, RemoteHandler, RemoteRecord, RemoteTable};
use super::traits::RegisterHandler;
use crate::codec::{
    Channel, DeviceTopics, InboundTopic, Topic, WIRE_FORMAT, decode_value, encode_bool,
    encode_metadata, encode_text, encode_value,
};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{HandlerError, SyncError};
use crate::fmt::Debug2Format;
use crate::indicator::StatusIndicator;
use crate::transport::{InboundMessage, LastWill, QoS, Transport};
use crate::value::{RegisterName, RegisterValue, ValueKind, register_name};

/// Register capacity used when none is given.
pub const DEFAULT_MAX_REGISTERS: usize = 16;

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickReport {
    /// Messages accepted by the transport, including retained clears.
    pub published: usize,
    /// Inbound `set` commands the handler accepted.
    pub sets_applied: usize,
    /// Inbound `set` commands dropped as malformed or rejected.
    pub sets_rejected: usize,
    /// Values of followed remote registers that changed or went stale.
    pub remote_updates: usize,
    /// Connection state after the tick.
    pub state: ConnectionState,
}

impl TickReport {
    fn new(state: ConnectionState) -> Self {
        Self {
            published: 0,
            sets_applied: 0,
            sets_rejected: 0,
            remote_updates: 0,
            state,
        }
    }
}

type Outcome<T> = Result<(), SyncError<<T as Transport>::Error>>;

/// Keeps a register handler and an MQTT broker in sync.
///
/// ```ignore
/// let config = Config::builder("boiler")
///     .with_wifi("home", "secret")
///     .with_broker("10.0.0.2:1883")
///     .build()?;
/// let mut engine: SyncEngine<_, _, _> =
///     SyncEngine::new(config, transport, registers, PinIndicator::new(led));
/// engine.start();
/// loop {
///     engine.tick(Instant::now());
///     Timer::after(engine.config().poll_interval()).await;
/// }
/// ```
pub struct SyncEngine<
    T,
    H,
    I,
    R = NoRemotes,
    const MAX_REGISTERS: usize = DEFAULT_MAX_REGISTERS,
> {
    config: Config,
    transport: T,
    bridge: RegisterBridge<H>,
    indicator: I,
    remote_handler: R,
    conn: ConnectionManager,
    table: RegisterTable<MAX_REGISTERS>,
    remotes: RemoteTable,
    presence: Topic,
}

impl<T, H, I, const MAX_REGISTERS: usize> SyncEngine<T, H, I, NoRemotes, MAX_REGISTERS>
where
    T: Transport,
    H: RegisterHandler,
    I: StatusIndicator,
{
    pub fn new(config: Config, transport: T, handler: H, indicator: I) -> Self {
        Self::with_remotes(config, transport, handler, indicator, NoRemotes)
    }
}

impl<T, H, I, R, const MAX_REGISTERS: usize> SyncEngine<T, H, I, R, MAX_REGISTERS>
where
    T: Transport,
    H: RegisterHandler,
    I: StatusIndicator,
    R: RemoteHandler,
{
    /// Like [`SyncEngine::new`], also following the registers of other
    /// devices that `remotes` lists.
    pub fn with_remotes(config: Config, transport: T, handler: H, indicator: I, remotes: R) -> Self {
        // Always fits: prefix and device id lengths are bounded by the config.
        let presence = DeviceTopics::new(config.prefix(), config.device_id())
            .presence()
            .unwrap_or_default();
        Self {
            conn: ConnectionManager::new(&config),
            bridge: RegisterBridge::new(handler, config.debug()),
            table: RegisterTable::new(),
            remotes: RemoteTable::new(config.jitter_seed().rotate_left(8)),
            remote_handler: remotes,
            config,
            transport,
            indicator,
            presence,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    pub fn handler(&self) -> &H {
        self.bridge.handler()
    }

    /// Local changes made here are published on the next tick.
    pub fn handler_mut(&mut self) -> &mut H {
        self.bridge.handler_mut()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn record(&self, name: &str) -> Option<&RegisterRecord> {
        self.table.get(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &RegisterRecord> {
        self.table.iter()
    }

    pub fn remote_handler(&self) -> &R {
        &self.remote_handler
    }

    pub fn remote_handler_mut(&mut self) -> &mut R {
        &mut self.remote_handler
    }

    /// A followed register of another device.
    pub fn remote(&self, device: &str, name: &str) -> Option<&RemoteRecord> {
        self.remotes.find(device, name)
    }

    /// Lets the connection leave `Disconnected` on the next tick.
    pub fn start(&mut self) {
        if self.config.debug() {
            info!("sync engine starting as {}", self.config.device_id());
        }
        self.conn.start();
    }

    /// Unsubscribes, marks the device offline (best effort) and closes both
    /// layers.
    pub fn stop(&mut self, now: Instant) {
        if self.is_connected() {
            let topics = self.topics();
            let filters = [
                topics.filter(Channel::Set),
                topics.filter(Channel::Get),
                topics.advertise(),
            ];
            let prefix = self.config.prefix();
            let mut publisher =
                Publisher::new(&mut self.transport, &mut self.conn, self.config.debug, now);
            for filter in filters.iter().flatten() {
                publisher.unsubscribe(filter);
            }
            for remote in self.remotes.iter() {
                if let Ok(topic) = remote.topics(prefix).register(&remote.name, Channel::Value) {
                    publisher.unsubscribe(&topic);
                }
            }
            let offline = encode_bool(false);
            let _ = publisher.publish(&PublishRequest::retained(&self.presence, &offline));
        }
        self.conn.stop(&mut self.transport);
        self.indicator.show(self.conn.state(), now);
        if self.config.debug() {
            info!("sync engine stopped");
        }
    }

    /// Runs one pass of the sync loop at `now`.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::new(self.conn.state());

        if self.is_connected() {
            self.drain_inbound(now, &mut report);
        }
        if self.is_connected() {
            self.sync_registers(now, &mut report);
        }
        if self.is_connected() {
            self.follow_remotes(now, &mut report);
        }

        let offline = encode_bool(false);
        let will = LastWill {
            topic: &self.presence,
            payload: &offline,
            retain: true,
            qos: QoS::AtLeastOnce,
        };
        let session = self.conn.session();
        self.conn
            .advance(&mut self.transport, &self.config, &will, now);
        if self.conn.session() != session {
            self.on_session_established(now, &mut report);
        }

        report.state = self.conn.state();
        self.indicator.show(report.state, now);
        report
    }

    /// Ticks every poll interval until `stop` is signalled, then stops.
    pub async fn run<M: RawMutex>(&mut self, stop: &Signal<M, ()>) {
        self.start();
        loop {
            self.tick(Instant::now());
            let sleep = Timer::after(self.config.poll_interval());
            if let Either::Second(()) = select(sleep, stop.wait()).await {
                break;
            }
        }
        self.stop(Instant::now());
    }

    fn is_connected(&self) -> bool {
        self.conn.state() == ConnectionState::BrokerConnected
    }

    fn topics(&self) -> DeviceTopics<'_> {
        DeviceTopics::new(self.config.prefix(), self.config.device_id())
    }

    fn publish(&mut self, req: &PublishRequest<'_>, now: Instant) -> Outcome<T> {
        Publisher::new(&mut self.transport, &mut self.conn, self.config.debug, now).publish(req)
    }

    fn on_session_established(&mut self, now: Instant, report: &mut TickReport) {
        if self.config.debug() {
            info!("broker session {} established", self.conn.session());
        }

        let topics = self.topics();
        let filters = [
            topics.filter(Channel::Set),
            topics.filter(Channel::Get),
            topics.advertise(),
        ];
        let mut publisher =
            Publisher::new(&mut self.transport, &mut self.conn, self.config.debug, now);
        for filter in filters {
            match filter {
                Ok(filter) => {
                    if publisher.subscribe(&filter).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if self.config.debug {
                        warn!("subscription filter: {:?}", e);
                    }
                }
            }
        }

        if !self.subscribe_remotes(now) {
            return;
        }

        for record in self.table.iter_mut() {
            record.invalidate();
        }
        self.sync_registers(now, report);
        if !self.is_connected() {
            return;
        }

        let format = self.topics().format();
        let (Ok(topic), Ok(payload)) = (format, encode_text(WIRE_FORMAT)) else {
            return;
        };
        if self.publish(&PublishRequest::retained(&topic, &payload), now).is_err() {
            return;
        }
        report.published += 1;

        let online = encode_bool(true);
        let presence = self.presence.clone();
        if self.publish(&PublishRequest::retained(&presence, &online), now).is_err() {
            return;
        }
        report.published += 1;

        self.follow_remotes(now, report);
        if self.is_connected() {
            self.conn.confirm_session();
        }
    }

    /// Reloads the followed registers and subscribes to their values.
    fn subscribe_remotes(&mut self, now: Instant) -> bool {
        self.remotes.reload(&self.remote_handler, now);
        if self.remotes.refused() > 0 && self.config.debug() {
            warn!("{} remote registers refused", self.remotes.refused());
        }

        let prefix = self.config.prefix();
        let mut publisher =
            Publisher::new(&mut self.transport, &mut self.conn, self.config.debug, now);
        for remote in self.remotes.iter() {
            match remote.topics(prefix).register(&remote.name, Channel::Value) {
                Ok(topic) => {
                    if publisher.subscribe(&topic).is_err() {
                        return false;
                    }
                }
                Err(e) => {
                    if self.config.debug {
                        warn!("remote {} topic: {:?}", remote.name.as_str(), e);
                    }
                }
            }
        }
        true
    }

    /// Asks silent owners for their values and drops values gone stale.
    fn follow_remotes(&mut self, now: Instant, report: &mut TickReport) {
        for index in 0..self.remotes.len() {
            if !self.is_connected() {
                return;
            }
            let Some(due) = self.remotes.poll(index, now) else {
                continue;
            };
            let Some(remote) = self.remotes.get(index) else {
                continue;
            };
            match due {
                RemoteDue::Ask => {
                    let topics = remote.topics(self.config.prefix());
                    let Ok(topic) = topics.register(&remote.name, Channel::Get) else {
                        continue;
                    };
                    if self.config.debug() {
                        debug!("asking {} for {}", remote.device.as_str(), remote.name.as_str());
                    }
                    if self.publish(&PublishRequest::request(&topic, &[]), now).is_ok() {
                        report.published += 1;
                    }
                }
                RemoteDue::Lost => {
                    if self.config.debug() {
                        info!(
                            "remote {}/{} went silent",
                            remote.device.as_str(),
                            remote.name.as_str()
                        );
                    }
                    let (device, name) = (remote.device.clone(), remote.name.clone());
                    self.remote_handler.update(&device, &name, None);
                    report.remote_updates += 1;
                }
            }
        }
    }

    /// Takes a value published by the owner of a followed register.
    fn accept_remote(&mut self, index: usize, payload: &[u8], now: Instant, report: &mut TickReport) {
        let Some(remote) = self.remotes.get(index) else {
            return;
        };
        // A cleared retained topic means the owner retired the register.
        let value = if payload.is_empty() {
            None
        } else {
            match decode_value(payload, remote.kind) {
                Ok(value) => Some(value),
                Err(e) => {
                    if self.config.debug() {
                        warn!(
                            "remote {}/{}: {:?}",
                            remote.device.as_str(),
                            remote.name.as_str(),
                            e
                        );
                    }
                    return;
                }
            }
        };
        let (device, name) = (remote.device.clone(), remote.name.clone());
        if self.remotes.received(index, value.clone(), now) {
            self.remote_handler.update(&device, &name, value);
            report.remote_updates += 1;
        }
    }

    fn drain_inbound(&mut self, now: Instant, report: &mut TickReport) {
        for _ in 0..self.config.set_batch_limit() {
            if !self.is_connected() {
                break;
            }
            let Some(msg) = self.transport.mqtt_poll_incoming() else {
                break;
            };
            self.handle_message(&msg, now, report);
        }
    }

    fn handle_message(&mut self, msg: &InboundMessage, now: Instant, report: &mut TickReport) {
        // Retained values of followed registers are their current state.
        if let Some(index) = self.remotes.match_value_topic(self.config.prefix(), &msg.topic) {
            self.accept_remote(index, &msg.payload, now, report);
            return;
        }
        if msg.retained {
            if self.config.debug() {
                debug!("ignoring retained message on {}", msg.topic.as_str());
            }
            return;
        }
        let target = self.topics().parse(&msg.topic);
        match target {
            Some(InboundTopic::Advertise) => self.advertise(now, report),
            Some(InboundTopic::Register {
                name,
                channel: Channel::Set,
            }) => self.apply_set(name, &msg.payload, now, report),
            Some(InboundTopic::Register {
                name,
                channel: Channel::Get,
            }) => self.answer_get(name, now, report),
            _ => {
                if self.config.debug() {
                    debug!("dropping message on {}", msg.topic.as_str());
                }
            }
        }
    }

    fn apply_set(&mut self, name: &str, payload: &[u8], now: Instant, report: &mut TickReport) {
        match self.write_register(name, payload) {
            Ok(()) => {
                report.sets_applied += 1;
                // Echo what the handler actually stored.
                self.republish_value(name, now, report);
            }
            Err(e) => {
                report.sets_rejected += 1;
                self.log_failure(name, "set", &e);
                if self.config.debug() {
                    self.publish_error_marker(name, &e, now);
                }
            }
        }
    }

    fn write_register(&mut self, name: &str, payload: &[u8]) -> Outcome<T> {
        let known = match self.table.get(name) {
            Some(record) if !record.retiring => record.last_known.as_ref().map(RegisterValue::kind),
            _ => return Err(HandlerError::UnknownRegister.into()),
        };
        let kind: ValueKind = match known {
            Some(kind) => kind,
            None => self.bridge.value(name)?.kind(),
        };
        let value = decode_value(payload, kind)?;
        self.bridge.set_value(name, value)?;
        Ok(())
    }

    fn answer_get(&mut self, name: &str, now: Instant, report: &mut TickReport) {
        if self.table.get(name).is_some_and(|r| !r.retiring) {
            self.republish_value(name, now, report);
        } else if self.config.debug() {
            debug!("get for unknown register {}", name);
        }
    }

    fn advertise(&mut self, now: Instant, report: &mut TickReport) {
        let mut names: Vec<RegisterName, MAX_REGISTERS> = Vec::new();
        for record in self.table.iter().filter(|r| !r.retiring) {
            let _ = names.push(record.name.clone());
        }
        for name in &names {
            if let Err(e) = self.publish_metadata(name, now, report) {
                self.log_failure(name, "metadata", &e);
                if !self.is_connected() {
                    return;
                }
            }
        }
    }

    /// Reconciles the register set with the handler and publishes whatever
    /// the broker has not seen yet.
    fn sync_registers(&mut self, now: Instant, report: &mut TickReport) {
        let known = NameSet::<MAX_REGISTERS>::reserving(self.table.iter().map(|r| &r.name));
        let names = self.bridge.names(known);

        let mut vanished: Vec<RegisterName, MAX_REGISTERS> = Vec::new();
        for record in self.table.iter_mut() {
            if !names.contains(&record.name) {
                record.retiring = true;
                let _ = vanished.push(record.name.clone());
            } else if record.retiring {
                record.revive();
                if self.config.debug {
                    info!("register {} is back", record.name.as_str());
                }
            }
        }
        for name in &vanished {
            match self.clear_retained(name, now, report) {
                Ok(()) => {
                    self.table.remove(name);
                    if self.config.debug() {
                        info!("register {} removed", name.as_str());
                    }
                }
                Err(e) => {
                    self.log_failure(name, "clear", &e);
                    if !self.is_connected() {
                        return;
                    }
                }
            }
        }

        for name in names.iter() {
            if self.table.contains(name) {
                continue;
            }
            let Ok(owned) = register_name(name) else {
                continue;
            };
            if !self.table.insert(owned) && self.config.debug() {
                warn!("register table full, ignoring {}", name);
            }
        }

        for name in names.iter() {
            if !self.is_connected() {
                return;
            }
            self.sync_register(name, now, report);
        }
    }

    fn sync_register(&mut self, name: &str, now: Instant, report: &mut TickReport) {
        let Some(record) = self.table.get(name) else {
            return;
        };
        if !record.meta_published
            && let Err(e) = self.publish_metadata(name, now, report)
        {
            self.log_failure(name, "metadata", &e);
            if !self.is_connected() {
                return;
            }
        }

        let Ok(value) = self.bridge.value(name) else {
            return;
        };
        let Some(record) = self.table.get_mut(name) else {
            return;
        };
        record.last_known = Some(value.clone());
        if !record.is_stale(&value) {
            return;
        }
        if let Err(e) = self.publish_value(name, value, now, report) {
            self.log_failure(name, "value", &e);
        }
    }

    /// Publishes the current value even if the broker already has it.
    fn republish_value(&mut self, name: &str, now: Instant, report: &mut TickReport) {
        let result = match self.bridge.value(name) {
            Ok(value) => self.publish_value(name, value, now, report),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            self.log_failure(name, "value", &e);
        }
    }

    fn publish_value(
        &mut self,
        name: &str,
        value: RegisterValue,
        now: Instant,
        report: &mut TickReport,
    ) -> Outcome<T> {
        let payload = encode_value(&value)?;
        let topic = self.topics().register(name, Channel::Value)?;
        self.publish(&PublishRequest::retained(&topic, &payload), now)?;
        report.published += 1;
        if let Some(record) = self.table.get_mut(name) {
            record.mark_published(value, now);
        }
        Ok(())
    }

    fn publish_metadata(&mut self, name: &str, now: Instant, report: &mut TickReport) -> Outcome<T> {
        let metadata = self.bridge.metadata(name)?;
        let payload = encode_metadata(&metadata)?;
        let topic = self.topics().register(name, Channel::Meta)?;
        self.publish(&PublishRequest::retained(&topic, &payload), now)?;
        report.published += 1;
        if let Some(record) = self.table.get_mut(name) {
            record.meta_published = true;
        }
        Ok(())
    }

    /// Empties the retained `meta` and `value` topics of a retired register.
    fn clear_retained(&mut self, name: &str, now: Instant, report: &mut TickReport) -> Outcome<T> {
        for channel in [Channel::Meta, Channel::Value] {
            let topic = self.topics().register(name, channel)?;
            self.publish(&PublishRequest::retained(&topic, &[]), now)?;
            report.published += 1;
        }
        Ok(())
    }

    fn publish_error_marker(&mut self, name: &str, err: &SyncError<T::Error>, now: Instant) {
        let mut text: String<64> = String::new();
        let written = match err {
            SyncError::Protocol(e) => write!(text, "{}", e),
            SyncError::Handler(HandlerError::UnknownRegister) => return,
            SyncError::Handler(e) => write!(text, "{}", e),
            SyncError::Transport(_) | SyncError::NotConnected => return,
        };
        if written.is_err() {
            return;
        }
        let Ok(topic) = self.topics().register(name, Channel::Error) else {
            return;
        };
        let Ok(payload) = encode_text(&text) else {
            return;
        };
        let _ = self.publish(&PublishRequest::transient(&topic, &payload), now);
    }

    fn log_failure(&self, name: &str, what: &str, err: &SyncError<T::Error>) {
        if !self.config.debug() {
            return;
        }
        match err {
            // Already reported by the bridge.
            SyncError::Handler(_) => {}
            _ => warn!("register {}: {} failed: {:?}", name, what, Debug2Format(err)),
        }
    }
}

/// A [`SyncEngine`] behind one mutex, for hosts that tick from more than one
/// thread. Each call holds the lock for the whole operation.
pub struct SharedEngine<
    M: RawMutex,
    T,
    H,
    I,
    R = NoRemotes,
    const MAX_REGISTERS: usize = DEFAULT_MAX_REGISTERS,
> {
    inner: Mutex<M, RefCell<SyncEngine<T, H, I, R, MAX_REGISTERS>>>,
}

impl<M, T, H, I, R, const MAX_REGISTERS: usize> SharedEngine<M, T, H, I, R, MAX_REGISTERS>
where
    M: RawMutex,
    T: Transport,
    H: RegisterHandler,
    I: StatusIndicator,
    R: RemoteHandler,
{
    pub fn new(engine: SyncEngine<T, H, I, R, MAX_REGISTERS>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(engine)),
        }
    }

    pub fn tick(&self, now: Instant) -> TickReport {
        self.with(|engine| engine.tick(now))
    }

    pub fn start(&self) {
        self.with(|engine| engine.start())
    }

    pub fn stop(&self, now: Instant) {
        self.with(|engine| engine.stop(now))
    }

    /// Runs `f` with exclusive access to the engine. Must not be re-entered
    /// from inside `f`.
    pub fn with<U>(&self, f: impl FnOnce(&mut SyncEngine<T, H, I, R, MAX_REGISTERS>) -> U) -> U {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }

    pub fn into_inner(self) -> SyncEngine<T, H, I, R, MAX_REGISTERS> {
        self.inner.into_inner().into_inner()
    }
}
