//! Serialization codec.
//!
//! Converts a [`Payload`] tree to and from JSON text, losslessly. Two
//! envelope shapes carry the non-JSON-native containers through the text
//! medium:
//!
//! - byte buffers: `{"__strato_type":"bytes","data":"<base64>"}`
//! - map containers: `{"__strato_type":"map","entries":{...}}`
//!
//! Decode reverses exactly these two markers. An object carrying the marker
//! field with an unrecognised value is returned as a plain object rather
//! than rejected, so payloads written by a newer codec still read back as
//! opaque data.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

use super::payload::Payload;

/// Reserved field naming the envelope kind inside an encoded object.
pub const MARKER_FIELD: &str = "__strato_type";

const MARKER_BYTES: &str = "bytes";
const MARKER_MAP: &str = "map";
const BYTES_DATA_FIELD: &str = "data";
const MAP_ENTRIES_FIELD: &str = "entries";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed cache text: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bytes envelope carries invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("{0} envelope is structurally invalid")]
    Envelope(&'static str),
}

/// Encode a payload into JSON text.
pub fn encode(payload: &Payload) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&to_value(payload))?)
}

/// Decode JSON text back into a payload. Malformed text is a hard failure;
/// the store maps it to a cache miss.
pub fn decode(text: &str) -> Result<Payload, CodecError> {
    from_value(serde_json::from_str(text)?)
}

/// Lower a payload into a JSON value, wrapping bytes and map containers in
/// their envelopes.
pub(crate) fn to_value(payload: &Payload) -> Value {
    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(value) => Value::Bool(*value),
        Payload::Number(value) => Value::Number(value.clone()),
        Payload::Text(value) => Value::String(value.clone()),
        Payload::Bytes(data) => {
            let mut envelope = JsonMap::new();
            envelope.insert(MARKER_FIELD.to_string(), Value::String(MARKER_BYTES.into()));
            envelope.insert(
                BYTES_DATA_FIELD.to_string(),
                Value::String(BASE64.encode(data)),
            );
            Value::Object(envelope)
        }
        Payload::Array(items) => Value::Array(items.iter().map(to_value).collect()),
        Payload::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), to_value(value)))
                .collect(),
        ),
        Payload::Map(entries) => {
            let encoded: JsonMap<String, Value> = entries
                .iter()
                .map(|(key, value)| (key.clone(), to_value(value)))
                .collect();
            let mut envelope = JsonMap::new();
            envelope.insert(MARKER_FIELD.to_string(), Value::String(MARKER_MAP.into()));
            envelope.insert(MAP_ENTRIES_FIELD.to_string(), Value::Object(encoded));
            Value::Object(envelope)
        }
    }
}

/// Raise a JSON value back into a payload, unwrapping recognised envelopes.
pub(crate) fn from_value(value: Value) -> Result<Payload, CodecError> {
    match value {
        Value::Null => Ok(Payload::Null),
        Value::Bool(value) => Ok(Payload::Bool(value)),
        Value::Number(value) => Ok(Payload::Number(value)),
        Value::String(value) => Ok(Payload::Text(value)),
        Value::Array(items) => Ok(Payload::Array(
            items.into_iter().map(from_value).collect::<Result<_, _>>()?,
        )),
        Value::Object(mut fields) => {
            let marker = match fields.get(MARKER_FIELD) {
                Some(Value::String(marker)) => Some(marker.clone()),
                _ => None,
            };

            match marker.as_deref() {
                Some(MARKER_BYTES) => {
                    let Some(Value::String(data)) = fields.remove(BYTES_DATA_FIELD) else {
                        return Err(CodecError::Envelope(MARKER_BYTES));
                    };
                    Ok(Payload::Bytes(Bytes::from(BASE64.decode(data)?)))
                }
                Some(MARKER_MAP) => {
                    let Some(Value::Object(entries)) = fields.remove(MAP_ENTRIES_FIELD) else {
                        return Err(CodecError::Envelope(MARKER_MAP));
                    };
                    let mut decoded = BTreeMap::new();
                    for (key, value) in entries {
                        decoded.insert(key, from_value(value)?);
                    }
                    Ok(Payload::Map(decoded))
                }
                // Unknown or absent marker: plain object, kept opaque.
                _ => {
                    let mut decoded = BTreeMap::new();
                    for (key, value) in fields {
                        decoded.insert(key, from_value(value)?);
                    }
                    Ok(Payload::Object(decoded))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: Payload) {
        let text = encode(&payload).expect("encode");
        let decoded = decode(&text).expect("decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn scalars_round_trip() {
        roundtrip(Payload::Null);
        roundtrip(Payload::Bool(true));
        roundtrip(Payload::integer(-42));
        roundtrip(Payload::text("héllo"));
    }

    #[test]
    fn bytes_round_trip() {
        roundtrip(Payload::bytes(vec![0x00, 0xFF, 0x7F, 0x80]));
        roundtrip(Payload::bytes(&b""[..]));
    }

    #[test]
    fn nested_structures_round_trip() {
        let mut inner = BTreeMap::new();
        inner.insert("body".to_string(), Payload::bytes(&b"hello"[..]));
        inner.insert("__strato_type".to_string(), Payload::text("collides"));

        let mut object = BTreeMap::new();
        object.insert("headers".to_string(), Payload::Map(inner));
        object.insert(
            "status".to_string(),
            Payload::Array(vec![Payload::integer(200), Payload::Null]),
        );

        roundtrip(Payload::Object(object));
    }

    #[test]
    fn map_with_byte_values_round_trips() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Payload::bytes(vec![1, 2, 3]));
        map.insert("b".to_string(), Payload::Object(BTreeMap::new()));
        roundtrip(Payload::Map(map));
    }

    #[test]
    fn bytes_envelope_shape_on_the_wire() {
        let text = encode(&Payload::bytes(&b"hi"[..])).expect("encode");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value[MARKER_FIELD], "bytes");
        assert_eq!(value["data"], "aGk=");
    }

    #[test]
    fn unknown_marker_decodes_as_opaque_object() {
        let text = r#"{"__strato_type":"stream","chunk":1}"#;
        let decoded = decode(text).expect("decode");
        match decoded {
            Payload::Object(fields) => {
                assert_eq!(fields.get(MARKER_FIELD), Some(&Payload::text("stream")));
                assert_eq!(fields.get("chunk"), Some(&Payload::integer(1)));
            }
            other => panic!("expected opaque object, got {other:?}"),
        }
    }

    #[test]
    fn broken_bytes_envelope_is_an_error() {
        assert!(decode(r#"{"__strato_type":"bytes"}"#).is_err());
        assert!(decode(r#"{"__strato_type":"bytes","data":"%%%"}"#).is_err());
    }

    #[test]
    fn malformed_text_is_an_error() {
        assert!(decode("{not json").is_err());
    }
}
