//! # Transport Abstraction
//!
//! This module defines the `Transport` trait, the only way the engine reaches
//! the WiFi radio and the MQTT session. Implementations wrap whatever network
//! stack the board uses; the engine never blocks on them.
//!
//! Every operation must return within a bounded time. Connection attempts are
//! polled: calling `wifi_connect` or `mqtt_connect` again while an attempt is
//! in flight reports on that attempt instead of starting a new one.

use heapless::{String, Vec};

use crate::codec::{MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Outcome of polling a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectStatus {
    /// The attempt is still in progress.
    Pending,
    /// The link or session is established.
    Connected,
    /// The attempt failed definitively.
    Failed,
}

/// Message the broker publishes on our behalf if the session drops.
#[derive(Debug, Clone, Copy)]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub retain: bool,
    pub qos: QoS,
}

/// An inbound publish with inline storage for topic and payload.
///
/// Owned so the transport can queue it until the engine drains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    /// Set when the broker delivered a retained message.
    pub retained: bool,
}

impl InboundMessage {
    /// Copies topic and payload into a new message.
    ///
    /// Returns `None` if either does not fit the inline buffers.
    pub fn new(topic: &str, payload: &[u8], retained: bool) -> Option<Self> {
        let topic = String::try_from(topic).ok()?;
        let payload = Vec::from_slice(payload).ok()?;
        Some(Self {
            topic,
            payload,
            retained,
        })
    }
}

/// Non-blocking access to the WiFi link and the MQTT session.
pub trait Transport {
    /// The error type returned by publish and subscribe operations.
    type Error: core::fmt::Debug;

    /// Starts or polls a WiFi association.
    fn wifi_connect(&mut self, ssid: &str, password: &str) -> ConnectStatus;

    /// Drops the WiFi link or aborts an attempt in flight.
    fn wifi_disconnect(&mut self);

    fn wifi_is_connected(&self) -> bool;

    /// Starts or polls an MQTT session. `Connected` means CONNACK was received.
    fn mqtt_connect(&mut self, broker: &str, client_id: &str, will: &LastWill<'_>)
    -> ConnectStatus;

    /// Closes the MQTT session or aborts an attempt in flight.
    fn mqtt_disconnect(&mut self);

    fn mqtt_is_connected(&self) -> bool;

    /// Publishes one message. `Ok` means the transport accepted it for delivery
    /// at the requested QoS.
    fn mqtt_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> Result<(), Self::Error>;

    fn mqtt_subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Self::Error>;

    fn mqtt_unsubscribe(&mut self, filter: &str) -> Result<(), Self::Error>;

    /// Takes the oldest pending inbound message, if any.
    ///
    /// Messages must come out in arrival order; whatever the engine does not
    /// drain in one tick stays queued for the next.
    fn mqtt_poll_incoming(&mut self) -> Option<InboundMessage>;
}

/// Allows passing `&mut T` wherever a `Transport` is expected.
impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn wifi_connect(&mut self, ssid: &str, password: &str) -> ConnectStatus {
        (**self).wifi_connect(ssid, password)
    }

    fn wifi_disconnect(&mut self) {
        (**self).wifi_disconnect()
    }

    fn wifi_is_connected(&self) -> bool {
        (**self).wifi_is_connected()
    }

    fn mqtt_connect(
        &mut self,
        broker: &str,
        client_id: &str,
        will: &LastWill<'_>,
    ) -> ConnectStatus {
        (**self).mqtt_connect(broker, client_id, will)
    }

    fn mqtt_disconnect(&mut self) {
        (**self).mqtt_disconnect()
    }

    fn mqtt_is_connected(&self) -> bool {
        (**self).mqtt_is_connected()
    }

    fn mqtt_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> Result<(), Self::Error> {
        (**self).mqtt_publish(topic, payload, retain, qos)
    }

    fn mqtt_subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Self::Error> {
        (**self).mqtt_subscribe(filter, qos)
    }

    fn mqtt_unsubscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
        (**self).mqtt_unsubscribe(filter)
    }

    fn mqtt_poll_incoming(&mut self) -> Option<InboundMessage> {
        (**self).mqtt_poll_incoming()
    }
}
