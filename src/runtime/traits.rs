//! Register handler trait and utilities.
//!
//! This module defines the capability set every register source implements:
//! enumerate names, describe a register, read it and write it. The engine only
//! ever talks to a handler through this trait, so adapters can be written per
//! backing store.
//!
//! # Object Safety
//!
//! `RegisterHandler` is dyn-compatible, so a `&mut dyn RegisterHandler` can be
//! handed to the engine from a `StaticCell` without generic task functions.
//!
//! # Blocking
//!
//! All calls are synchronous and run inside a tick. A handler that blocks
//! stalls the whole engine; implementations must return promptly.

use crate::error::HandlerError;
use crate::value::{Metadata, RegisterValue};

/// Object-safe trait for collecting register names during enumeration.
///
/// The engine provides this to handlers in `names()`. Handlers call `add()`
/// once per register they currently expose.
pub trait NameCollector {
    /// Add a register name.
    ///
    /// The name is copied internally, so it only needs to live for the
    /// duration of this call.
    ///
    /// Returns `false` if the name was refused (invalid or collector full).
    fn add(&mut self, name: &str) -> bool;
}

/// Object-safe trait for register sources.
///
/// # Example
///
/// ```ignore
/// struct Thermometer {
///     celsius: f32,
/// }
///
/// impl RegisterHandler for Thermometer {
///     fn names(&self, collector: &mut dyn NameCollector) {
///         collector.add("temperature");
///     }
///
///     fn metadata(&self, _name: &str) -> Result<Metadata, HandlerError> {
///         Ok(Metadata::new().with_text("unit", "C"))
///     }
///
///     fn value(&self, _name: &str) -> Result<RegisterValue, HandlerError> {
///         Ok(RegisterValue::from(self.celsius))
///     }
///
///     fn set_value(&mut self, _name: &str, _value: RegisterValue) -> Result<(), HandlerError> {
///         Err(HandlerError::ReadOnly)
///     }
/// }
/// ```
pub trait RegisterHandler {
    /// Report the names of all registers currently exposed.
    ///
    /// Called on every tick; a name that stops being reported is treated as
    /// deleted.
    fn names(&self, collector: &mut dyn NameCollector);

    /// Describe a register. Fails with [`HandlerError::UnknownRegister`] if
    /// the name is not known.
    fn metadata(&self, name: &str) -> Result<Metadata, HandlerError>;

    /// Read the current value of a register.
    fn value(&self, name: &str) -> Result<RegisterValue, HandlerError>;

    /// Apply a remote write.
    fn set_value(&mut self, name: &str, value: RegisterValue) -> Result<(), HandlerError>;
}

/// Blanket implementation for mutable references to handlers.
///
/// This allows using `&mut dyn RegisterHandler` wherever a `RegisterHandler`
/// is expected.
impl<H: RegisterHandler + ?Sized> RegisterHandler for &mut H {
    fn names(&self, collector: &mut dyn NameCollector) {
        (**self).names(collector)
    }

    fn metadata(&self, name: &str) -> Result<Metadata, HandlerError> {
        (**self).metadata(name)
    }

    fn value(&self, name: &str) -> Result<RegisterValue, HandlerError> {
        (**self).value(name)
    }

    fn set_value(&mut self, name: &str, value: RegisterValue) -> Result<(), HandlerError> {
        (**self).set_value(name, value)
    }
}
