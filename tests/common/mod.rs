//! In-memory transport and handler shared by the scenario tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use embassy_time::{Duration, Instant};
use myrtio_regsync::backoff::BackoffPolicy;
use myrtio_regsync::{
    Config, ConnectStatus, HandlerError, InboundMessage, LastWill, Metadata, NameCollector,
    NoIndicator, QoS, RegisterHandler, RegisterValue, RemoteCollector, RemoteHandler, SyncEngine,
    Transport, ValueKind,
};

pub const DEVICE: &str = "dev";

pub type Engine = SyncEngine<MockTransport, MockHandler, NoIndicator>;

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub qos: QoS,
}

#[derive(Debug)]
pub struct MockError;

/// Scripted WiFi/MQTT outcomes; an empty script connects immediately.
#[derive(Default)]
pub struct MockTransport {
    pub wifi_script: VecDeque<ConnectStatus>,
    pub mqtt_script: VecDeque<ConnectStatus>,
    pub wifi_up: bool,
    pub mqtt_up: bool,
    pub wifi_attempts: usize,
    pub mqtt_attempts: usize,
    pub published: Vec<Published>,
    pub subscriptions: Vec<String>,
    pub unsubscriptions: Vec<String>,
    pub inbound: VecDeque<InboundMessage>,
    /// Number of upcoming publishes to fail.
    pub fail_publishes: usize,
    /// Refuse every subscription while set.
    pub fail_subscribes: bool,
    pub last_will: Option<(String, String, bool)>,
}

impl MockTransport {
    pub fn drop_wifi(&mut self) {
        self.wifi_up = false;
        self.mqtt_up = false;
    }

    pub fn push(&mut self, topic: &str, payload: &str) {
        self.inbound
            .push_back(InboundMessage::new(topic, payload.as_bytes(), false).unwrap());
    }

    pub fn push_retained(&mut self, topic: &str, payload: &str) {
        self.inbound
            .push_back(InboundMessage::new(topic, payload.as_bytes(), true).unwrap());
    }

    /// Returns and forgets everything published so far.
    pub fn take_published(&mut self) -> Vec<Published> {
        std::mem::take(&mut self.published)
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    fn wifi_connect(&mut self, _ssid: &str, _password: &str) -> ConnectStatus {
        self.wifi_attempts += 1;
        let status = self
            .wifi_script
            .pop_front()
            .unwrap_or(ConnectStatus::Connected);
        self.wifi_up = status == ConnectStatus::Connected;
        status
    }

    fn wifi_disconnect(&mut self) {
        self.drop_wifi();
    }

    fn wifi_is_connected(&self) -> bool {
        self.wifi_up
    }

    fn mqtt_connect(&mut self, _broker: &str, _client_id: &str, will: &LastWill<'_>) -> ConnectStatus {
        self.mqtt_attempts += 1;
        self.last_will = Some((
            will.topic.to_string(),
            String::from_utf8(will.payload.to_vec()).unwrap(),
            will.retain,
        ));
        if !self.wifi_up {
            return ConnectStatus::Failed;
        }
        let status = self
            .mqtt_script
            .pop_front()
            .unwrap_or(ConnectStatus::Connected);
        self.mqtt_up = status == ConnectStatus::Connected;
        status
    }

    fn mqtt_disconnect(&mut self) {
        self.mqtt_up = false;
    }

    fn mqtt_is_connected(&self) -> bool {
        self.mqtt_up
    }

    fn mqtt_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> Result<(), MockError> {
        if !self.mqtt_up {
            return Err(MockError);
        }
        if self.fail_publishes > 0 {
            self.fail_publishes -= 1;
            return Err(MockError);
        }
        self.published.push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8(payload.to_vec()).unwrap(),
            retain,
            qos,
        });
        Ok(())
    }

    fn mqtt_subscribe(&mut self, filter: &str, _qos: QoS) -> Result<(), MockError> {
        if self.fail_subscribes {
            return Err(MockError);
        }
        self.subscriptions.push(filter.to_string());
        Ok(())
    }

    fn mqtt_unsubscribe(&mut self, filter: &str) -> Result<(), MockError> {
        self.unsubscriptions.push(filter.to_string());
        Ok(())
    }

    fn mqtt_poll_incoming(&mut self) -> Option<InboundMessage> {
        self.inbound.pop_front()
    }
}

/// Registers in a map, counting remote writes.
#[derive(Default)]
pub struct MockHandler {
    pub values: BTreeMap<String, RegisterValue>,
    /// Names whose `value()` fails.
    pub failing: BTreeSet<String>,
    pub set_calls: usize,
}

impl MockHandler {
    pub fn with(registers: &[(&str, RegisterValue)]) -> Self {
        Self {
            values: registers
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn set_local(&mut self, name: &str, value: RegisterValue) {
        self.values.insert(name.to_string(), value);
    }
}

impl RegisterHandler for MockHandler {
    fn names(&self, collector: &mut dyn NameCollector) {
        for name in self.values.keys() {
            collector.add(name);
        }
    }

    fn metadata(&self, name: &str) -> Result<Metadata, HandlerError> {
        if !self.values.contains_key(name) {
            return Err(HandlerError::UnknownRegister);
        }
        Ok(Metadata::new().with_text("title", name))
    }

    fn value(&self, name: &str) -> Result<RegisterValue, HandlerError> {
        if self.failing.contains(name) {
            return Err(HandlerError::Rejected);
        }
        self.values
            .get(name)
            .cloned()
            .ok_or(HandlerError::UnknownRegister)
    }

    fn set_value(&mut self, name: &str, value: RegisterValue) -> Result<(), HandlerError> {
        self.set_calls += 1;
        let current = self.values.get_mut(name).ok_or(HandlerError::UnknownRegister)?;
        if current.kind() != value.kind() {
            return Err(HandlerError::TypeMismatch);
        }
        *current = value;
        Ok(())
    }
}

/// Follows a fixed list of remote registers and records every update.
#[derive(Default)]
pub struct MockRemotes {
    pub follows: Vec<(String, String, ValueKind)>,
    pub updates: Vec<(String, String, Option<RegisterValue>)>,
}

impl MockRemotes {
    pub fn following(remotes: &[(&str, &str, ValueKind)]) -> Self {
        Self {
            follows: remotes
                .iter()
                .map(|(device, name, kind)| (device.to_string(), name.to_string(), *kind))
                .collect(),
            updates: Vec::new(),
        }
    }
}

impl RemoteHandler for MockRemotes {
    fn remotes(&self, collector: &mut dyn RemoteCollector) {
        for (device, name, kind) in &self.follows {
            collector.add(device, name, *kind);
        }
    }

    fn update(&mut self, device: &str, name: &str, value: Option<RegisterValue>) {
        self.updates
            .push((device.to_string(), name.to_string(), value));
    }
}

pub fn policy() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_secs(1), 2, Duration::from_secs(30)).with_jitter(0)
}

pub fn config() -> Config {
    Config::builder(DEVICE)
        .with_wifi("ssid", "password")
        .with_broker("broker:1883")
        .with_debug(true)
        .with_wifi_backoff(policy())
        .with_broker_backoff(policy())
        .build()
        .unwrap()
}

pub fn engine(handler: MockHandler) -> Engine {
    SyncEngine::new(config(), MockTransport::default(), handler, NoIndicator)
}

pub fn at(secs: u64) -> Instant {
    Instant::from_secs(secs)
}

pub fn topic(register: &str, channel: &str) -> String {
    format!("register/{DEVICE}/{register}/{channel}")
}

/// Publishes to `topic` among `published`, in order.
pub fn payloads_to<'a>(published: &'a [Published], topic: &str) -> Vec<&'a str> {
    published
        .iter()
        .filter(|p| p.topic == topic)
        .map(|p| p.payload.as_str())
        .collect()
}
