//! JSON payload encoding (`json/1`).
//!
//! Values travel as bare JSON scalars: `true`/`false`, integers, floats that
//! always carry a `.` or an exponent, and quoted strings. Metadata is a flat
//! JSON object of strings and numbers. Inbound values are decoded against the
//! kind the register already has; a payload of another kind never reaches the
//! handler.

use core::fmt::{self, Write};

use heapless::{String, Vec};
use serde::Deserialize;

use crate::error::ProtocolError;
use crate::value::{MAX_TEXT_LEN, MetaValue, Metadata, RegisterValue, ValueKind};

/// Maximum size of an encoded payload.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Identifier of this wire format, published to `$format`.
pub const WIRE_FORMAT: &str = "json/1";

/// An owned payload buffer.
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// `fmt::Write` adapter over a payload buffer.
struct PayloadWriter<'a> {
    buf: &'a mut Payload,
}

impl Write for PayloadWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf
            .extend_from_slice(s.as_bytes())
            .map_err(|_| fmt::Error)
    }
}

fn write_json_string(w: &mut PayloadWriter<'_>, s: &str) -> fmt::Result {
    w.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => w.write_str("\\\"")?,
            '\\' => w.write_str("\\\\")?,
            '\n' => w.write_str("\\n")?,
            '\r' => w.write_str("\\r")?,
            '\t' => w.write_str("\\t")?,
            '\u{08}' => w.write_str("\\b")?,
            '\u{0c}' => w.write_str("\\f")?,
            c if (c as u32) < 0x20 => write!(w, "\\u{:04x}", c as u32)?,
            c => w.write_char(c)?,
        }
    }
    w.write_char('"')
}

fn write_float(w: &mut PayloadWriter<'_>, v: f64) -> Result<(), ProtocolError> {
    if !v.is_finite() {
        return Err(ProtocolError::Unrepresentable);
    }
    // `Debug` keeps a fractional part or switches to an exponent.
    write!(w, "{:?}", v).map_err(|_| ProtocolError::PayloadTooLarge)
}

/// Encodes a register value.
pub fn encode_value(value: &RegisterValue) -> Result<Payload, ProtocolError> {
    let mut buf = Payload::new();
    let mut w = PayloadWriter { buf: &mut buf };
    let written = match value {
        RegisterValue::Bool(b) => w.write_str(if *b { "true" } else { "false" }),
        RegisterValue::Int(i) => write!(w, "{}", i),
        RegisterValue::Float(f) => {
            write_float(&mut w, *f)?;
            Ok(())
        }
        RegisterValue::Text(s) => write_json_string(&mut w, s),
    };
    written.map_err(|_| ProtocolError::PayloadTooLarge)?;
    Ok(buf)
}

/// Encodes a boolean (presence marker).
pub fn encode_bool(value: bool) -> Payload {
    let mut buf = Payload::new();
    // Always fits.
    let _ = buf.extend_from_slice(if value { b"true" } else { b"false" });
    buf
}

/// Encodes a text as a JSON string (format marker, error marker).
pub fn encode_text(text: &str) -> Result<Payload, ProtocolError> {
    let mut buf = Payload::new();
    write_json_string(&mut PayloadWriter { buf: &mut buf }, text)
        .map_err(|_| ProtocolError::PayloadTooLarge)?;
    Ok(buf)
}

/// Encodes metadata as a flat JSON object.
pub fn encode_metadata(meta: &Metadata) -> Result<Payload, ProtocolError> {
    let mut buf = Payload::new();
    let mut w = PayloadWriter { buf: &mut buf };
    let too_large = |_| ProtocolError::PayloadTooLarge;

    w.write_char('{').map_err(too_large)?;
    for (i, (key, value)) in meta.iter().enumerate() {
        if i > 0 {
            w.write_char(',').map_err(too_large)?;
        }
        write_json_string(&mut w, key).map_err(too_large)?;
        w.write_char(':').map_err(too_large)?;
        match value {
            MetaValue::Text(s) => write_json_string(&mut w, s).map_err(too_large)?,
            MetaValue::Int(v) => write!(w, "{}", v).map_err(too_large)?,
            MetaValue::Float(v) => write_float(&mut w, *v)?,
        }
    }
    w.write_char('}').map_err(too_large)?;
    Ok(buf)
}

/// JSON token class of a payload, judged by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Null,
    Bool,
    Number,
    Text,
}

impl Token {
    fn of(text: &str) -> Result<Self, ProtocolError> {
        match text.as_bytes().first() {
            None => Err(ProtocolError::EmptyPayload),
            Some(b'n') => Ok(Token::Null),
            Some(b't' | b'f') => Ok(Token::Bool),
            Some(b'-' | b'0'..=b'9') => Ok(Token::Number),
            Some(b'"') => Ok(Token::Text),
            Some(_) => Err(ProtocolError::MalformedPayload),
        }
    }
}

fn is_json_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parses one complete JSON document; trailing characters are an error.
fn parse<'a, T: Deserialize<'a>>(text: &'a str) -> Result<T, serde_json_core::de::Error> {
    serde_json_core::from_str(text).map(|(value, _)| value)
}

/// Decodes an inbound value payload for a register of the given kind.
///
/// Integer literals are accepted for float registers; every other kind
/// mismatch is refused.
pub fn decode_value(payload: &[u8], kind: ValueKind) -> Result<RegisterValue, ProtocolError> {
    let text = core::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
    let text = text.trim_matches(is_json_whitespace);
    let malformed = |_| ProtocolError::MalformedPayload;

    match (kind, Token::of(text)?) {
        (ValueKind::Bool, Token::Bool) => parse(text).map(RegisterValue::Bool).map_err(malformed),
        (ValueKind::Int, Token::Number) if is_integer_literal(text) => parse(text)
            .map(RegisterValue::Int)
            .map_err(|_| ProtocolError::NumberOutOfRange),
        (ValueKind::Int, Token::Number) => match parse::<f64>(text) {
            Ok(_) => Err(ProtocolError::TypeMismatch),
            Err(_) => Err(ProtocolError::MalformedPayload),
        },
        (ValueKind::Float, Token::Number) => {
            let v: f64 = parse(text).map_err(malformed)?;
            if v.is_finite() {
                Ok(RegisterValue::Float(v))
            } else {
                Err(ProtocolError::NumberOutOfRange)
            }
        }
        (ValueKind::Text, Token::Text) => parse::<String<MAX_TEXT_LEN>>(text)
            .map(RegisterValue::Text)
            .map_err(malformed),
        (_, Token::Null) if text != "null" => Err(ProtocolError::MalformedPayload),
        _ => Err(ProtocolError::TypeMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(p: &Payload) -> &str {
        core::str::from_utf8(p).unwrap()
    }

    #[test]
    fn encodes_scalars() {
        assert_eq!(text(&encode_value(&RegisterValue::Bool(true)).unwrap()), "true");
        assert_eq!(text(&encode_value(&RegisterValue::Int(-42)).unwrap()), "-42");
        assert_eq!(text(&encode_value(&RegisterValue::Float(5.0)).unwrap()), "5.0");
        assert_eq!(text(&encode_value(&RegisterValue::Float(0.25)).unwrap()), "0.25");
        assert_eq!(
            text(&encode_value(&RegisterValue::text("a \"b\"\n").unwrap()).unwrap()),
            "\"a \\\"b\\\"\\n\""
        );
    }

    #[test]
    fn refuses_non_finite_floats() {
        assert_eq!(
            encode_value(&RegisterValue::Float(f64::NAN)),
            Err(ProtocolError::Unrepresentable)
        );
        assert_eq!(
            encode_value(&RegisterValue::Float(f64::INFINITY)),
            Err(ProtocolError::Unrepresentable)
        );
    }

    #[test]
    fn float_encoding_never_reads_back_as_integer() {
        let encoded = encode_value(&RegisterValue::Float(12.0)).unwrap();
        assert_eq!(
            decode_value(&encoded, ValueKind::Int),
            Err(ProtocolError::TypeMismatch)
        );
        assert_eq!(
            decode_value(&encoded, ValueKind::Float),
            Ok(RegisterValue::Float(12.0))
        );
    }

    #[test]
    fn encodes_metadata_as_flat_object() {
        let meta = Metadata::new()
            .with_text("title", "Boiler")
            .with_text("unit", "°C")
            .with_int("min", 0)
            .with_number("step", 0.5);
        assert_eq!(
            text(&encode_metadata(&meta).unwrap()),
            "{\"title\":\"Boiler\",\"unit\":\"°C\",\"min\":0,\"step\":0.5}"
        );
        assert_eq!(text(&encode_metadata(&Metadata::new()).unwrap()), "{}");
    }

    #[test]
    fn decodes_typed_values() {
        assert_eq!(decode_value(b"true", ValueKind::Bool), Ok(RegisterValue::Bool(true)));
        assert_eq!(decode_value(b" 9\n", ValueKind::Int), Ok(RegisterValue::Int(9)));
        assert_eq!(decode_value(b"9", ValueKind::Float), Ok(RegisterValue::Float(9.0)));
        assert_eq!(
            decode_value(b"-1.5e2", ValueKind::Float),
            Ok(RegisterValue::Float(-150.0))
        );
        assert_eq!(
            decode_value(b"\"on\"", ValueKind::Text),
            Ok(RegisterValue::text("on").unwrap())
        );
    }

    #[test]
    fn rejects_wrong_kinds() {
        assert_eq!(decode_value(b"1", ValueKind::Bool), Err(ProtocolError::TypeMismatch));
        assert_eq!(decode_value(b"\"true\"", ValueKind::Bool), Err(ProtocolError::TypeMismatch));
        assert_eq!(decode_value(b"1.5", ValueKind::Int), Err(ProtocolError::TypeMismatch));
        assert_eq!(decode_value(b"7", ValueKind::Text), Err(ProtocolError::TypeMismatch));
        assert_eq!(decode_value(b"null", ValueKind::Int), Err(ProtocolError::TypeMismatch));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(decode_value(b"", ValueKind::Int), Err(ProtocolError::EmptyPayload));
        assert_eq!(decode_value(b"  ", ValueKind::Int), Err(ProtocolError::EmptyPayload));
        assert_eq!(decode_value(b"yes", ValueKind::Bool), Err(ProtocolError::MalformedPayload));
        assert_eq!(decode_value(b"nul", ValueKind::Int), Err(ProtocolError::MalformedPayload));
        assert_eq!(decode_value(b"12abc", ValueKind::Int), Err(ProtocolError::MalformedPayload));
        assert_eq!(
            decode_value(b"\"open", ValueKind::Text),
            Err(ProtocolError::MalformedPayload)
        );
        assert_eq!(
            decode_value(b"\"a\" x", ValueKind::Text),
            Err(ProtocolError::MalformedPayload)
        );
        assert_eq!(decode_value(&[0xff, 0xfe], ValueKind::Text), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn rejects_numbers_out_of_range() {
        assert_eq!(
            decode_value(b"9223372036854775808", ValueKind::Int),
            Err(ProtocolError::NumberOutOfRange)
        );
        assert_eq!(
            decode_value(b"1e400", ValueKind::Float),
            Err(ProtocolError::NumberOutOfRange)
        );
    }
}
