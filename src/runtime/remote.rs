//! Registers owned by other devices.
//!
//! A device can follow registers published by its peers. The engine
//! subscribes to their `value` topics, asks the owner with a `get` when a
//! session starts and again after a quiet period, and reports the value as
//! gone when a `get` stays unanswered.

use embassy_time::{Duration, Instant};
use heapless::{String, Vec};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::codec::{Channel, DeviceTopics};
use crate::config::MAX_DEVICE_ID_LEN;
use crate::value::{RegisterName, RegisterValue, ValueKind, is_valid_level, register_name};

/// Remote registers a device can follow.
pub const MAX_REMOTES: usize = 8;

/// Shortest quiet period after a value before the owner is asked again.
pub const POLL_MIN: Duration = Duration::from_secs(8);
/// Longest quiet period after a value before the owner is asked again.
pub const POLL_MAX: Duration = Duration::from_secs(12);
/// How long a `get` may stay unanswered before the value is dropped.
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(10);

pub type DeviceId = String<MAX_DEVICE_ID_LEN>;

/// Receives the remote registers a [`RemoteHandler`] wants to follow.
pub trait RemoteCollector {
    /// Returns `false` if the register was refused.
    fn add(&mut self, device: &str, name: &str, kind: ValueKind) -> bool;
}

/// Consumer of registers published by other devices.
///
/// ```ignore
/// struct Outdoor {
///     temperature: Option<f64>,
/// }
///
/// impl RemoteHandler for Outdoor {
///     fn remotes(&self, collector: &mut dyn RemoteCollector) {
///         collector.add("weather", "temperature", ValueKind::Float);
///     }
///
///     fn update(&mut self, _device: &str, _name: &str, value: Option<RegisterValue>) {
///         self.temperature = value.and_then(|v| v.as_f64());
///     }
/// }
/// ```
pub trait RemoteHandler {
    /// Lists the followed registers. Read at the start of every session.
    fn remotes(&self, collector: &mut dyn RemoteCollector);

    /// A new value arrived, or `None` once the owner stopped answering or
    /// retired the register.
    fn update(&mut self, device: &str, name: &str, value: Option<RegisterValue>);
}

impl<R: RemoteHandler + ?Sized> RemoteHandler for &mut R {
    fn remotes(&self, collector: &mut dyn RemoteCollector) {
        (**self).remotes(collector)
    }

    fn update(&mut self, device: &str, name: &str, value: Option<RegisterValue>) {
        (**self).update(device, name, value)
    }
}

/// For devices that follow nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemotes;

impl RemoteHandler for NoRemotes {
    fn remotes(&self, _collector: &mut dyn RemoteCollector) {}

    fn update(&mut self, _device: &str, _name: &str, _value: Option<RegisterValue>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Quiet; ask the owner at `poll_at`.
    Waiting { poll_at: Instant },
    /// A `get` is out; give up at `expire_at`.
    Asking { expire_at: Instant },
}

/// What following a remote register requires right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDue {
    /// Publish a `get` to the owner.
    Ask,
    /// The value went stale and was dropped.
    Lost,
}

/// One followed register.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    pub device: DeviceId,
    pub name: RegisterName,
    pub kind: ValueKind,
    pub value: Option<RegisterValue>,
    phase: Phase,
}

impl RemoteRecord {
    pub fn topics<'a>(&'a self, prefix: &'a str) -> DeviceTopics<'a> {
        DeviceTopics::new(prefix, &self.device)
    }

    fn is(&self, device: &str, name: &str) -> bool {
        self.device.as_str() == device && self.name.as_str() == name
    }
}

/// The followed registers and their polling deadlines.
#[derive(Debug)]
pub struct RemoteTable {
    records: Vec<RemoteRecord, MAX_REMOTES>,
    rng: SmallRng,
    refused: usize,
}

impl RemoteTable {
    pub fn new(seed: u32) -> Self {
        Self {
            records: Vec::new(),
            rng: SmallRng::seed_from_u64(u64::from(seed)),
            refused: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RemoteRecord> {
        self.records.get(index)
    }

    pub fn find(&self, device: &str, name: &str) -> Option<&RemoteRecord> {
        self.records.iter().find(|r| r.is(device, name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteRecord> {
        self.records.iter()
    }

    /// Registers refused by the last [`RemoteTable::reload`].
    pub fn refused(&self) -> usize {
        self.refused
    }

    /// Re-reads the followed set from `handler`. Values of registers that
    /// stay followed are kept. Every register is due for a `get` at `now`.
    pub fn reload<R: RemoteHandler + ?Sized>(&mut self, handler: &R, now: Instant) {
        let mut fresh = RemoteSet {
            records: Vec::new(),
            refused: 0,
            now,
        };
        handler.remotes(&mut fresh);
        for record in fresh.records.iter_mut() {
            if let Some(old) = self.find(&record.device, &record.name)
                && old.kind == record.kind
            {
                record.value = old.value.clone();
            }
        }
        self.records = fresh.records;
        self.refused = fresh.refused;
    }

    /// Index of the register whose `value` topic is `topic`.
    pub fn match_value_topic(&self, prefix: &str, topic: &str) -> Option<usize> {
        let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
        let (device, rest) = rest.split_once('/')?;
        let (name, channel) = rest.split_once('/')?;
        if Channel::parse(channel) != Some(Channel::Value) {
            return None;
        }
        self.records.iter().position(|r| r.is(device, name))
    }

    /// Stores a value from the owner and schedules the next `get`.
    ///
    /// Returns `true` if the value changed.
    pub fn received(&mut self, index: usize, value: Option<RegisterValue>, now: Instant) -> bool {
        let poll_at = self.next_poll(now);
        let Some(record) = self.records.get_mut(index) else {
            return false;
        };
        record.phase = Phase::Waiting { poll_at };
        let changed = match (&record.value, &value) {
            (Some(old), Some(new)) => !old.same_as(new),
            (None, None) => false,
            _ => true,
        };
        record.value = value;
        changed
    }

    /// Advances the deadlines of one register.
    pub fn poll(&mut self, index: usize, now: Instant) -> Option<RemoteDue> {
        let next_poll = self.next_poll(now);
        let record = self.records.get_mut(index)?;
        match record.phase {
            Phase::Waiting { poll_at } if now >= poll_at => {
                record.phase = Phase::Asking {
                    expire_at: now.checked_add(ANSWER_TIMEOUT).unwrap_or(now),
                };
                Some(RemoteDue::Ask)
            }
            Phase::Asking { expire_at } if now >= expire_at => {
                record.phase = Phase::Waiting { poll_at: next_poll };
                record.value.take().map(|_| RemoteDue::Lost)
            }
            _ => None,
        }
    }

    fn next_poll(&mut self, now: Instant) -> Instant {
        let spread = POLL_MAX.as_ticks() - POLL_MIN.as_ticks();
        let delay = POLL_MIN + Duration::from_ticks(self.rng.gen_range(0..=spread));
        now.checked_add(delay).unwrap_or(now)
    }
}

struct RemoteSet {
    records: Vec<RemoteRecord, MAX_REMOTES>,
    refused: usize,
    now: Instant,
}

impl RemoteCollector for RemoteSet {
    fn add(&mut self, device: &str, name: &str, kind: ValueKind) -> bool {
        if self.records.iter().any(|r| r.is(device, name)) {
            return true;
        }
        let record = match (DeviceId::try_from(device), register_name(name)) {
            (Ok(device), Ok(name)) if is_valid_level(&device) => RemoteRecord {
                device,
                name,
                kind,
                value: None,
                phase: Phase::Waiting { poll_at: self.now },
            },
            _ => {
                self.refused += 1;
                return false;
            }
        };
        let accepted = self.records.push(record).is_ok();
        if !accepted {
            self.refused += 1;
        }
        accepted
    }
}
