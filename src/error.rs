//! # Error Types
//!
//! The engine distinguishes four failure families. Transport and handler
//! failures are always recovered inside the sync loop, protocol failures drop
//! the offending message, and configuration failures are the only ones that
//! can prevent the engine from being built.

use core::fmt;

/// Error raised while moving data between the engine and the broker.
///
/// It is generic over the transport error type `E`, so the transport's own
/// error survives untouched inside [`SyncError::Transport`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncError<E> {
    /// The transport failed to connect, publish or subscribe.
    Transport(E),
    /// An inbound or outbound payload could not be encoded or decoded.
    Protocol(ProtocolError),
    /// The register handler rejected an operation.
    Handler(HandlerError),
    /// I/O was requested while the broker session is not established.
    NotConnected,
}

impl<E> From<ProtocolError> for SyncError<E> {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err)
    }
}

impl<E> From<HandlerError> for SyncError<E> {
    fn from(err: HandlerError) -> Self {
        SyncError::Handler(err)
    }
}

/// Malformed topics or payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// A topic does not fit into the fixed topic buffer.
    TopicTooLong,
    /// A payload does not fit into the fixed payload buffer.
    PayloadTooLarge,
    /// A topic level is empty or contains a reserved character.
    InvalidTopicLevel,
    /// The payload is not valid UTF-8.
    InvalidUtf8,
    /// The payload is empty where a value was expected.
    EmptyPayload,
    /// The payload is not a well-formed scalar.
    MalformedPayload,
    /// The payload is well formed but of the wrong kind for the register.
    TypeMismatch,
    /// A number does not fit the register's numeric type.
    NumberOutOfRange,
    /// The value cannot be represented on the wire (NaN or infinity).
    Unrepresentable,
}

/// Failures reported by the register handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandlerError {
    /// No register with the given name exists.
    UnknownRegister,
    /// The register does not accept remote writes.
    ReadOnly,
    /// The value kind differs from the register's kind.
    TypeMismatch,
    /// The value lies outside the register's accepted range.
    OutOfRange,
    /// The name is not usable as a topic level.
    InvalidName,
    /// A fixed-capacity container is full.
    CapacityExceeded,
    /// The handler refused the operation for its own reasons.
    Rejected,
}

/// Invalid configuration detected while building a [`crate::Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The device id is missing or not a single valid topic level.
    InvalidDeviceId,
    /// The topic prefix is empty, has empty levels or wildcards.
    InvalidPrefix,
    /// The WiFi SSID is empty.
    MissingSsid,
    /// The broker address is empty.
    MissingBroker,
    /// The client id is empty.
    InvalidClientId,
    /// A string does not fit its fixed-size buffer.
    TooLong(&'static str),
    /// The poll interval or connect timeout is zero.
    InvalidInterval,
    /// A backoff policy is inconsistent.
    InvalidBackoff,
    /// The inbound batch limit is zero.
    InvalidBatchLimit,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ProtocolError::TopicTooLong => "topic too long",
            ProtocolError::PayloadTooLarge => "payload too large",
            ProtocolError::InvalidTopicLevel => "invalid topic level",
            ProtocolError::InvalidUtf8 => "payload is not valid utf-8",
            ProtocolError::EmptyPayload => "empty payload",
            ProtocolError::MalformedPayload => "malformed payload",
            ProtocolError::TypeMismatch => "wrong value type",
            ProtocolError::NumberOutOfRange => "number out of range",
            ProtocolError::Unrepresentable => "value not representable",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            HandlerError::UnknownRegister => "unknown register",
            HandlerError::ReadOnly => "register is read-only",
            HandlerError::TypeMismatch => "wrong value type",
            HandlerError::OutOfRange => "value out of range",
            HandlerError::InvalidName => "invalid register name",
            HandlerError::CapacityExceeded => "capacity exceeded",
            HandlerError::Rejected => "rejected by handler",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidDeviceId => f.write_str("invalid device id"),
            ConfigError::InvalidPrefix => f.write_str("invalid topic prefix"),
            ConfigError::MissingSsid => f.write_str("missing wifi ssid"),
            ConfigError::MissingBroker => f.write_str("missing broker address"),
            ConfigError::InvalidClientId => f.write_str("invalid client id"),
            ConfigError::TooLong(field) => write!(f, "{} is too long", field),
            ConfigError::InvalidInterval => f.write_str("interval must be non-zero"),
            ConfigError::InvalidBackoff => f.write_str("invalid backoff policy"),
            ConfigError::InvalidBatchLimit => f.write_str("batch limit must be non-zero"),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for SyncError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Transport(e) => write!(f, "transport error: {:?}", e),
            SyncError::Protocol(e) => write!(f, "protocol error: {}", e),
            SyncError::Handler(e) => write!(f, "handler error: {}", e),
            SyncError::NotConnected => f.write_str("not connected"),
        }
    }
}
