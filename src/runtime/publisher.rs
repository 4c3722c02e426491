//! Gated access to the broker session.
//!
//! Every publish and subscribe the engine performs goes through here. I/O is
//! refused with [`SyncError::NotConnected`] outside `BrokerConnected`, and a
//! transport failure degrades the connection so the state machine rebuilds it.

use embassy_time::Instant;

use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::SyncError;
use crate::fmt::Debug2Format;
use crate::transport::{QoS, Transport};

/// A request to publish one message.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub retain: bool,
    pub qos: QoS,
}

impl<'a> PublishRequest<'a> {
    /// A retained QoS 1 publish, used for every device-owned topic.
    pub const fn retained(topic: &'a str, payload: &'a [u8]) -> Self {
        Self {
            topic,
            payload,
            retain: true,
            qos: QoS::AtLeastOnce,
        }
    }

    /// A non-retained QoS 1 publish, used for requests to other devices.
    pub const fn request(topic: &'a str, payload: &'a [u8]) -> Self {
        Self {
            topic,
            payload,
            retain: false,
            qos: QoS::AtLeastOnce,
        }
    }

    pub const fn transient(topic: &'a str, payload: &'a [u8]) -> Self {
        Self {
            topic,
            payload,
            retain: false,
            qos: QoS::AtMostOnce,
        }
    }
}

/// Borrows the transport and connection state for the duration of a tick.
pub(crate) struct Publisher<'e, T> {
    transport: &'e mut T,
    conn: &'e mut ConnectionManager,
    debug: bool,
    now: Instant,
}

impl<'e, T: Transport> Publisher<'e, T> {
    pub(crate) fn new(
        transport: &'e mut T,
        conn: &'e mut ConnectionManager,
        debug: bool,
        now: Instant,
    ) -> Self {
        Self {
            transport,
            conn,
            debug,
            now,
        }
    }

    pub(crate) fn publish(&mut self, req: &PublishRequest<'_>) -> Result<(), SyncError<T::Error>> {
        self.ensure_connected()?;
        match self
            .transport
            .mqtt_publish(req.topic, req.payload, req.retain, req.qos)
        {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.debug {
                    warn!("publish to {} failed: {:?}", req.topic, Debug2Format(&e));
                }
                self.conn.mark_degraded(self.transport, self.now);
                Err(SyncError::Transport(e))
            }
        }
    }

    pub(crate) fn subscribe(&mut self, filter: &str) -> Result<(), SyncError<T::Error>> {
        self.ensure_connected()?;
        match self.transport.mqtt_subscribe(filter, QoS::AtLeastOnce) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.debug {
                    warn!("subscribe to {} failed: {:?}", filter, Debug2Format(&e));
                }
                self.conn.mark_degraded(self.transport, self.now);
                Err(SyncError::Transport(e))
            }
        }
    }

    /// Best effort; the session is about to be closed anyway.
    pub(crate) fn unsubscribe(&mut self, filter: &str) {
        if self.ensure_connected().is_err() {
            return;
        }
        if let Err(e) = self.transport.mqtt_unsubscribe(filter)
            && self.debug
        {
            warn!("unsubscribe from {} failed: {:?}", filter, Debug2Format(&e));
        }
    }

    fn ensure_connected(&self) -> Result<(), SyncError<T::Error>> {
        if self.conn.state() == ConnectionState::BrokerConnected {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }
}
