//! Sync Runtime Module
//!
//! Ties a [`RegisterHandler`] to the broker session.
//!
//! # Overview
//!
//! - `traits`: the capability set a register source implements.
//! - `bridge`: failure-isolating calls into the handler.
//! - `registry`: what the engine remembers about each register.
//! - `publisher`: the connection-gated path to the transport.
//! - `remote`: registers of other devices this device follows.
//! - `engine`: the tick loop itself, plus [`SharedEngine`] for hosts that
//!   tick from more than one thread.
//!
//! # Object-Safe Design
//!
//! `RegisterHandler` is dyn-compatible, so firmware can keep its handler in a
//! `StaticCell` and hand the engine a `&mut dyn RegisterHandler`.

pub(crate) mod bridge;
pub(crate) mod engine;
pub(crate) mod publisher;
pub(crate) mod registry;
pub(crate) mod remote;
pub(crate) mod traits;

pub use engine::{DEFAULT_MAX_REGISTERS, SharedEngine, SyncEngine, TickReport};
pub use publisher::PublishRequest;
pub use registry::{NameSet, RegisterRecord, RegisterTable};
pub use remote::{
    ANSWER_TIMEOUT, MAX_REMOTES, NoRemotes, POLL_MAX, POLL_MIN, RemoteCollector, RemoteDue,
    RemoteHandler, RemoteRecord, RemoteTable,
};
pub use traits::{NameCollector, RegisterHandler};
