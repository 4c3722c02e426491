//! Topic and payload codec.
//!
//! Pure functions only: nothing here touches the transport or the handler.

pub mod payload;
pub mod topic;

pub use payload::{
    MAX_PAYLOAD_LEN, Payload, WIRE_FORMAT, decode_value, encode_bool, encode_metadata,
    encode_text, encode_value,
};
pub use topic::{Channel, DeviceTopics, InboundTopic, MAX_TOPIC_LEN, Topic};
