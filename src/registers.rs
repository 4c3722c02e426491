//! In-memory registers and a list handler over them.
//!
//! Covers the common case of an application that owns a handful of values:
//! keep them in a [`RegisterList`], call [`RegisterList::update`] when they
//! change locally, and let the engine pick the change up on the next tick.

use heapless::Vec;

use crate::error::HandlerError;
use crate::runtime::{NameCollector, RegisterHandler};
use crate::value::{Metadata, RegisterName, RegisterValue, ValueKind, register_name};

/// A named value held in RAM.
#[derive(Debug, Clone)]
pub struct MemoryRegister {
    name: RegisterName,
    metadata: Metadata,
    value: RegisterValue,
    writable: bool,
    range: Option<(f64, f64)>,
}

impl MemoryRegister {
    /// A register remote clients may write.
    pub fn read_write(name: &str, value: impl Into<RegisterValue>) -> Result<Self, HandlerError> {
        Self::new(name, value.into(), true)
    }

    /// A register only the application may change.
    pub fn read_only(name: &str, value: impl Into<RegisterValue>) -> Result<Self, HandlerError> {
        Self::new(name, value.into(), false)
    }

    fn new(name: &str, value: RegisterValue, writable: bool) -> Result<Self, HandlerError> {
        Ok(Self {
            name: register_name(name)?,
            metadata: Metadata::new(),
            value,
            writable,
            range: None,
        })
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Limits remote writes of a numeric register to `min..=max`.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn value(&self) -> &RegisterValue {
        &self.value
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Applies a remote write.
    pub fn write(&mut self, value: RegisterValue) -> Result<(), HandlerError> {
        if !self.writable {
            return Err(HandlerError::ReadOnly);
        }
        let value = self.coerce(value)?;
        if let (Some((min, max)), Some(n)) = (self.range, value.as_f64())
            && !(min..=max).contains(&n)
        {
            return Err(HandlerError::OutOfRange);
        }
        self.value = value;
        Ok(())
    }

    /// Replaces the value from application code. Ignores the read-only flag
    /// and the range, but not the value kind.
    pub fn update(&mut self, value: RegisterValue) -> Result<(), HandlerError> {
        self.value = self.coerce(value)?;
        Ok(())
    }

    fn coerce(&self, value: RegisterValue) -> Result<RegisterValue, HandlerError> {
        match (self.value.kind(), value) {
            (ValueKind::Float, RegisterValue::Int(i)) => Ok(RegisterValue::Float(i as f64)),
            (kind, value) if value.kind() == kind => Ok(value),
            _ => Err(HandlerError::TypeMismatch),
        }
    }
}

/// Fixed-capacity [`RegisterHandler`] over [`MemoryRegister`]s.
#[derive(Debug, Default)]
pub struct RegisterList<const N: usize> {
    registers: Vec<MemoryRegister, N>,
}

impl<const N: usize> RegisterList<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a register. A register with the same name is replaced.
    pub fn push(&mut self, register: MemoryRegister) -> Result<(), HandlerError> {
        if let Some(existing) = self.find_mut(register.name()) {
            *existing = register;
            return Ok(());
        }
        self.registers
            .push(register)
            .map_err(|_| HandlerError::CapacityExceeded)
    }

    pub fn remove(&mut self, name: &str) -> Option<MemoryRegister> {
        let index = self.registers.iter().position(|r| r.name() == name)?;
        Some(self.registers.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&MemoryRegister> {
        self.registers.iter().find(|r| r.name() == name)
    }

    /// Changes a value locally.
    pub fn update(&mut self, name: &str, value: impl Into<RegisterValue>) -> Result<(), HandlerError> {
        self.find_mut(name)
            .ok_or(HandlerError::UnknownRegister)?
            .update(value.into())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut MemoryRegister> {
        self.registers.iter_mut().find(|r| r.name() == name)
    }

    fn find(&self, name: &str) -> Result<&MemoryRegister, HandlerError> {
        self.get(name).ok_or(HandlerError::UnknownRegister)
    }
}

impl<const N: usize> RegisterHandler for RegisterList<N> {
    fn names(&self, collector: &mut dyn NameCollector) {
        for register in &self.registers {
            collector.add(register.name());
        }
    }

    fn metadata(&self, name: &str) -> Result<Metadata, HandlerError> {
        self.find(name).map(|r| r.metadata().clone())
    }

    fn value(&self, name: &str) -> Result<RegisterValue, HandlerError> {
        self.find(name).map(|r| r.value().clone())
    }

    fn set_value(&mut self, name: &str, value: RegisterValue) -> Result<(), HandlerError> {
        self.find_mut(name)
            .ok_or(HandlerError::UnknownRegister)?
            .write(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> RegisterList<4> {
        let mut list = RegisterList::new();
        list.push(
            MemoryRegister::read_write("setpoint", 21.5)
                .unwrap()
                .with_range(5.0, 30.0)
                .with_metadata(Metadata::new().with_text("unit", "C")),
        )
        .unwrap();
        list.push(MemoryRegister::read_only("uptime", 0i64).unwrap())
            .unwrap();
        list.push(MemoryRegister::read_write("enabled", false).unwrap())
            .unwrap();
        list
    }

    #[test]
    fn remote_writes_are_checked() {
        let mut list = list();
        assert_eq!(
            list.set_value("uptime", RegisterValue::Int(5)),
            Err(HandlerError::ReadOnly)
        );
        assert_eq!(
            list.set_value("enabled", RegisterValue::Int(1)),
            Err(HandlerError::TypeMismatch)
        );
        assert_eq!(
            list.set_value("setpoint", RegisterValue::Float(31.0)),
            Err(HandlerError::OutOfRange)
        );
        assert_eq!(
            list.set_value("missing", RegisterValue::Bool(true)),
            Err(HandlerError::UnknownRegister)
        );

        list.set_value("setpoint", RegisterValue::Int(22)).unwrap();
        assert_eq!(list.value("setpoint"), Ok(RegisterValue::Float(22.0)));
    }

    #[test]
    fn local_updates_bypass_read_only() {
        let mut list = list();
        list.update("uptime", 60i64).unwrap();
        assert_eq!(list.value("uptime"), Ok(RegisterValue::Int(60)));
        assert_eq!(list.update("uptime", true), Err(HandlerError::TypeMismatch));
    }

    #[test]
    fn names_follow_membership() {
        let mut list = list();
        assert!(list.remove("uptime").is_some());
        assert_eq!(list.len(), 2);
        list.push(MemoryRegister::read_write("mode", RegisterValue::text("eco").unwrap()).unwrap())
            .unwrap();
        list.push(MemoryRegister::read_write("extra", 1i64).unwrap())
            .unwrap();
        assert_eq!(
            list.push(MemoryRegister::read_write("overflow", 1i64).unwrap()),
            Err(HandlerError::CapacityExceeded)
        );
        assert_eq!(list.metadata("setpoint").unwrap().len(), 1);
        assert!(MemoryRegister::read_only("bad/name", 1i64).is_err());
    }
}
