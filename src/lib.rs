//! # MQTT Register Synchronization for Embedded Systems
//!
//! `myrtio-regsync` keeps a set of named, typed registers owned by device
//! firmware in sync with an MQTT broker. Each register is exposed as retained
//! `meta` and `value` topics; remote clients write it through a `set` topic and
//! the device echoes the value it actually applied.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** All buffers are fixed-size `heapless`
//!   collections, sized by const generics and the limits in [`value`] and
//!   [`codec`].
//! - **Non-blocking:** [`SyncEngine::tick`] never waits. Connection attempts
//!   are polled through the [`Transport`] trait and retried on per-layer
//!   exponential backoff deadlines.
//! - **Idempotent recovery:** every (re)connection republishes metadata and
//!   value of every register exactly once; otherwise only changes are sent.
//! - **Failure isolation:** a register whose handler fails is skipped, the
//!   others keep syncing.
//! - **Remote registers:** a device may follow registers of its peers through
//!   a [`RemoteHandler`]; silent owners are polled with `get` and their
//!   values dropped when they stop answering.
//!
//! ## Topic Layout
//!
//! ```text
//! <prefix>/<device>/<register>/meta    retained, QoS 1, JSON object
//! <prefix>/<device>/<register>/value   retained, QoS 1, JSON scalar
//! <prefix>/<device>/<register>/set     subscribed, QoS 1
//! <prefix>/<device>/<register>/get     subscribed, republishes the value
//! <prefix>/<device>/<register>/error   debug only, last rejected set
//! <prefix>/<device>/$online            retained presence, last will `false`
//! <prefix>/<device>/$format            retained, "json/1"
//! <prefix>/<device>/$advertise         subscribed, republishes all metadata
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use myrtio_regsync::{Config, MemoryRegister, NoIndicator, RegisterList, SyncEngine};
//!
//! let mut registers = RegisterList::<4>::new();
//! registers.push(MemoryRegister::read_write("setpoint", 21.5)?.with_range(5.0, 30.0))?;
//!
//! let config = Config::builder("boiler")
//!     .with_wifi(SSID, PASSWORD)
//!     .with_broker("10.0.0.2:1883")
//!     .build()?;
//!
//! let mut engine: SyncEngine<_, _, _> = SyncEngine::new(config, transport, registers, NoIndicator);
//! engine.run(&STOP).await;
//! ```

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod backoff;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod indicator;
pub mod registers;
pub mod runtime;
pub mod transport;
pub mod value;

// Re-export key types for easier access at the crate root.
pub use config::{Config, ConfigBuilder};
pub use connection::ConnectionState;
pub use error::{ConfigError, HandlerError, ProtocolError, SyncError};
pub use indicator::{NoIndicator, PinIndicator, SignalPattern, StatusIndicator};
pub use registers::{MemoryRegister, RegisterList};
pub use runtime::{
    NameCollector, NoRemotes, RegisterHandler, RemoteCollector, RemoteHandler, SharedEngine,
    SyncEngine, TickReport,
};
pub use transport::{ConnectStatus, InboundMessage, LastWill, QoS, Transport};
pub use value::{Metadata, MetaValue, RegisterValue, ValueKind};
