//! Register values, names and metadata.
//!
//! All storage is inline (`heapless`), so a register fits into a fixed-size
//! table without an allocator.

use heapless::{String, Vec};

use crate::error::HandlerError;

/// Maximum length of a register name.
pub const MAX_NAME_LEN: usize = 32;
/// Maximum length of a text value or a metadata text entry.
pub const MAX_TEXT_LEN: usize = 64;
/// Maximum length of a metadata key.
pub const MAX_META_KEY_LEN: usize = 16;
/// Maximum number of metadata entries per register.
pub const MAX_META_ENTRIES: usize = 8;

/// A register name, unique within a device.
pub type RegisterName = String<MAX_NAME_LEN>;

/// Checks that `level` can be used as one MQTT topic level.
///
/// Empty levels, separators, wildcards and the `$` prefix (reserved for
/// device-level topics such as `$online`) are refused.
pub fn is_valid_level(level: &str) -> bool {
    !level.is_empty()
        && !level.starts_with('$')
        && !level.contains(['/', '+', '#', '\0'])
}

/// Copies `name` into a [`RegisterName`] after validating it as a topic level.
pub fn register_name(name: &str) -> Result<RegisterName, HandlerError> {
    if !is_valid_level(name) {
        return Err(HandlerError::InvalidName);
    }
    RegisterName::try_from(name).map_err(|_| HandlerError::InvalidName)
}

/// The kind of a [`RegisterValue`], used to type inbound writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
}

/// A typed register value.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String<MAX_TEXT_LEN>),
}

impl RegisterValue {
    /// Builds a text value, failing if it exceeds [`MAX_TEXT_LEN`].
    pub fn text(s: &str) -> Result<Self, HandlerError> {
        String::try_from(s)
            .map(RegisterValue::Text)
            .map_err(|_| HandlerError::CapacityExceeded)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            RegisterValue::Bool(_) => ValueKind::Bool,
            RegisterValue::Int(_) => ValueKind::Int,
            RegisterValue::Float(_) => ValueKind::Float,
            RegisterValue::Text(_) => ValueKind::Text,
        }
    }

    /// Change detection equality: like `==`, except that floats compare by
    /// bit pattern so a NaN register does not look changed on every poll.
    pub fn same_as(&self, other: &RegisterValue) -> bool {
        match (self, other) {
            (RegisterValue::Float(a), RegisterValue::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Numeric view used for range checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Int(v) => Some(*v as f64),
            RegisterValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for RegisterValue {
    fn from(v: bool) -> Self {
        RegisterValue::Bool(v)
    }
}

impl From<i64> for RegisterValue {
    fn from(v: i64) -> Self {
        RegisterValue::Int(v)
    }
}

impl From<i32> for RegisterValue {
    fn from(v: i32) -> Self {
        RegisterValue::Int(v as i64)
    }
}

impl From<f64> for RegisterValue {
    fn from(v: f64) -> Self {
        RegisterValue::Float(v)
    }
}

impl From<f32> for RegisterValue {
    fn from(v: f32) -> Self {
        RegisterValue::Float(v as f64)
    }
}

/// A metadata entry value: string or number.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Text(String<MAX_TEXT_LEN>),
    Int(i64),
    Float(f64),
}

/// Flat key/value description of a register (title, unit, device, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String<MAX_META_KEY_LEN>, MetaValue), MAX_META_ENTRIES>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry.
    pub fn insert(&mut self, key: &str, value: MetaValue) -> Result<(), HandlerError> {
        if let Some((_, slot)) = self.entries.iter_mut().find(|(k, _)| k.as_str() == key) {
            *slot = value;
            return Ok(());
        }
        let key = String::try_from(key).map_err(|_| HandlerError::CapacityExceeded)?;
        self.entries
            .push((key, value))
            .map_err(|_| HandlerError::CapacityExceeded)
    }

    /// Inserts a text entry.
    pub fn insert_text(&mut self, key: &str, value: &str) -> Result<(), HandlerError> {
        let value = String::try_from(value).map_err(|_| HandlerError::CapacityExceeded)?;
        self.insert(key, MetaValue::Text(value))
    }

    /// Builder-style text entry, silently dropped if it does not fit.
    pub fn with_text(mut self, key: &str, value: &str) -> Self {
        let _ = self.insert_text(key, value);
        self
    }

    /// Builder-style numeric entry, silently dropped if it does not fit.
    pub fn with_number(mut self, key: &str, value: f64) -> Self {
        let _ = self.insert(key, MetaValue::Float(value));
        self
    }

    /// Builder-style integer entry, silently dropped if it does not fit.
    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        let _ = self.insert(key, MetaValue::Int(value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.iter().find(|(k, _)| k.as_str() == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_reject_wildcards_and_separators() {
        assert!(is_valid_level("temperature"));
        assert!(!is_valid_level(""));
        assert!(!is_valid_level("a/b"));
        assert!(!is_valid_level("a+"));
        assert!(!is_valid_level("#"));
        assert!(!is_valid_level("$online"));
    }

    #[test]
    fn nan_is_same_as_itself() {
        let a = RegisterValue::Float(f64::NAN);
        assert!(a.same_as(&a.clone()));
        assert!(!RegisterValue::Int(1).same_as(&RegisterValue::Float(1.0)));
    }

    #[test]
    fn metadata_insert_replaces_existing_key() {
        let mut meta = Metadata::new().with_text("unit", "C");
        meta.insert_text("unit", "K").unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("unit"), Some(&MetaValue::Text(String::try_from("K").unwrap())));
    }

    #[test]
    fn metadata_is_bounded() {
        let mut meta = Metadata::new();
        for i in 0..MAX_META_ENTRIES {
            let mut key: String<MAX_META_KEY_LEN> = String::new();
            core::fmt::Write::write_fmt(&mut key, format_args!("k{}", i)).unwrap();
            meta.insert(&key, MetaValue::Int(i as i64)).unwrap();
        }
        assert_eq!(
            meta.insert("overflow", MetaValue::Int(0)),
            Err(HandlerError::CapacityExceeded)
        );
    }
}
