//! Topic layout: `<prefix>/<deviceId>/<registerName>/<channel>` plus a few
//! device-level topics (`$online`, `$format`, `$advertise`).

use core::fmt::Write;

use heapless::String;

use crate::error::ProtocolError;
use crate::value::is_valid_level;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// An owned topic string.
pub type Topic = String<MAX_TOPIC_LEN>;

/// Presence marker level, `true` while the device is online.
pub const PRESENCE_LEVEL: &str = "$online";
/// Wire format identifier level.
pub const FORMAT_LEVEL: &str = "$format";
/// Inbound request to re-advertise every register's metadata.
pub const ADVERTISE_LEVEL: &str = "$advertise";

/// The last level of a register topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Register metadata, published retained.
    Meta,
    /// Register value, published retained.
    Value,
    /// Remote write command, subscribed.
    Set,
    /// Remote request to republish the value, subscribed.
    Get,
    /// Diagnostic marker for rejected writes, published when debugging.
    Error,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Channel::Meta => "meta",
            Channel::Value => "value",
            Channel::Set => "set",
            Channel::Get => "get",
            Channel::Error => "error",
        }
    }

    pub fn parse(level: &str) -> Option<Self> {
        match level {
            "meta" => Some(Channel::Meta),
            "value" => Some(Channel::Value),
            "set" => Some(Channel::Set),
            "get" => Some(Channel::Get),
            "error" => Some(Channel::Error),
            _ => None,
        }
    }

    /// Whether the device subscribes to this channel.
    pub const fn is_inbound(self) -> bool {
        matches!(self, Channel::Set | Channel::Get)
    }
}

/// A decoded inbound topic addressed to this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'t> {
    /// A command for one register.
    Register { name: &'t str, channel: Channel },
    /// A request to re-advertise all metadata.
    Advertise,
}

/// The topic namespace of one device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceTopics<'a> {
    prefix: &'a str,
    device_id: &'a str,
}

impl<'a> DeviceTopics<'a> {
    pub fn new(prefix: &'a str, device_id: &'a str) -> Self {
        Self { prefix, device_id }
    }

    /// `<prefix>/<deviceId>/<name>/<channel>`
    pub fn register(&self, name: &str, channel: Channel) -> Result<Topic, ProtocolError> {
        if !is_valid_level(name) {
            return Err(ProtocolError::InvalidTopicLevel);
        }
        let mut topic = Topic::new();
        write!(
            topic,
            "{}/{}/{}/{}",
            self.prefix,
            self.device_id,
            name,
            channel.as_str()
        )
        .map_err(|_| ProtocolError::TopicTooLong)?;
        Ok(topic)
    }

    /// `<prefix>/<deviceId>/<level>` for device-level topics.
    pub fn device(&self, level: &str) -> Result<Topic, ProtocolError> {
        let mut topic = Topic::new();
        write!(topic, "{}/{}/{}", self.prefix, self.device_id, level)
            .map_err(|_| ProtocolError::TopicTooLong)?;
        Ok(topic)
    }

    pub fn presence(&self) -> Result<Topic, ProtocolError> {
        self.device(PRESENCE_LEVEL)
    }

    pub fn format(&self) -> Result<Topic, ProtocolError> {
        self.device(FORMAT_LEVEL)
    }

    pub fn advertise(&self) -> Result<Topic, ProtocolError> {
        self.device(ADVERTISE_LEVEL)
    }

    /// Subscription filter matching `channel` on every register:
    /// `<prefix>/<deviceId>/+/<channel>`.
    pub fn filter(&self, channel: Channel) -> Result<Topic, ProtocolError> {
        let mut topic = Topic::new();
        write!(
            topic,
            "{}/{}/+/{}",
            self.prefix,
            self.device_id,
            channel.as_str()
        )
        .map_err(|_| ProtocolError::TopicTooLong)?;
        Ok(topic)
    }

    /// Decodes an inbound topic. Returns `None` for topics outside this
    /// device's namespace or channels the device does not consume.
    pub fn parse<'t>(&self, topic: &'t str) -> Option<InboundTopic<'t>> {
        let rest = topic.strip_prefix(self.prefix)?.strip_prefix('/')?;
        let rest = rest.strip_prefix(self.device_id)?.strip_prefix('/')?;

        if rest == ADVERTISE_LEVEL {
            return Some(InboundTopic::Advertise);
        }

        let (name, channel) = rest.split_once('/')?;
        if !is_valid_level(name) {
            return None;
        }
        let channel = Channel::parse(channel)?;
        if !channel.is_inbound() {
            return None;
        }
        Some(InboundTopic::Register { name, channel })
    }
}
