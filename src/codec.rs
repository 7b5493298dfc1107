//! Encode/decode event payloads and snapshot state (spec.md §4.A).
//!
//! Two interchangeable wire formats are supported, selected per-event by
//! [`Encoding`] and persisted in the `payload_encoding` column:
//!
//! - [`Encoding::Binary`] — a deterministic, field-tagged envelope built on `bincode`.
//!   Preferred for production traffic.
//! - [`Encoding::Json`] — human-readable, used for debugging and for events that must
//!   stay inspectable in the database.
//!
//! Both formats decode through [`RawFields`] first: a `serde_json::Map` holding every
//! field present on the wire, known or not. Typed decoding ([`decode_typed`]) then
//! deserializes out of that map, so a field unknown to the local schema is never lost —
//! it simply isn't picked up by the typed struct, but remains on the [`RawFields`]
//! carrier for callers that need it (see [`crate::registry`]).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Which wire format a payload was written with. Persisted verbatim as
/// `payload_encoding` (`"binary"` | `"json"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Binary,
    Json,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Json => "json",
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(Encoding::Binary),
            "json" => Ok(Encoding::Json),
            other => Err(CodecError::Malformed {
                event_type: String::new(),
                reason: format!("unknown payload_encoding {other:?}"),
            }),
        }
    }
}

/// Every field decoded off the wire for one event, known or not, keyed by field name.
///
/// This is the "fallback carrier" the spec requires: a value is always obtainable,
/// even for an `event_type` with no registered deserializer, or for a field a
/// registered deserializer's struct doesn't declare.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields(pub Map<String, Value>);

impl RawFields {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
}

/// Encode a value to bytes in the given [`Encoding`].
///
/// Deterministic for equal inputs under [`Encoding::Binary`] (field map is sorted by
/// key before serializing); not guaranteed under [`Encoding::Json`] (key order follows
/// `serde_json`'s map implementation).
pub fn encode<T: Serialize>(value: &T, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    let as_value = serde_json::to_value(value)?;
    let fields = match as_value {
        Value::Object(map) => map,
        other => {
            // Non-struct payloads (tuple structs, enums serialized as scalars, ...)
            // still round-trip: wrap them under a single synthetic key.
            let mut map = Map::new();
            map.insert("__value".to_string(), other);
            map
        }
    };
    encode_raw(&RawFields(fields), encoding)
}

/// Encode an already-decoded [`RawFields`] carrier back to bytes, preserving every
/// field it holds (used when re-publishing an event without a concrete target type).
///
/// The binary envelope is a `BTreeMap<String, Vec<u8>>` — field name to that field's
/// own JSON-encoded bytes — serialized with `bincode`. Each value is wrapped as an
/// opaque byte string rather than handed to `bincode` as a `serde_json::Value`
/// directly: `Value`'s `Deserialize` impl always calls `deserialize_any`, which
/// `bincode` (a non-self-describing format) cannot satisfy. Wrapping each field's
/// value as pre-serialized JSON bytes keeps the outer envelope field-tagged and
/// length-prefixed while sidestepping that limitation.
pub fn encode_raw(raw: &RawFields, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Json => Ok(serde_json::to_vec(&raw.0)?),
        Encoding::Binary => {
            let mut envelope = std::collections::BTreeMap::new();
            for (key, value) in &raw.0 {
                envelope.insert(key.clone(), serde_json::to_vec(value)?);
            }
            bincode::serialize(&envelope).map_err(CodecError::Binary)
        }
    }
}

/// Decode bytes into the generic field carrier, regardless of whether a typed
/// deserializer exists for the event. Never fails on an unrecognized field.
pub fn decode_raw(bytes: &[u8], encoding: Encoding) -> Result<RawFields, CodecError> {
    match encoding {
        Encoding::Json => {
            let value: Value = serde_json::from_slice(bytes)?;
            match value {
                Value::Object(map) => Ok(RawFields(map)),
                other => {
                    let mut map = Map::new();
                    map.insert("__value".to_string(), other);
                    Ok(RawFields(map))
                }
            }
        }
        Encoding::Binary => {
            let envelope: std::collections::BTreeMap<String, Vec<u8>> =
                bincode::deserialize(bytes).map_err(CodecError::Binary)?;
            let mut map = Map::new();
            for (key, value_bytes) in envelope {
                map.insert(key, serde_json::from_slice(&value_bytes)?);
            }
            Ok(RawFields(map))
        }
    }
}

/// Decode bytes straight into a concrete type `T`, failing with
/// [`CodecError::Malformed`] on structural errors.
///
/// Fields present in the payload but absent from `T` are silently unused here; use
/// [`decode_raw`] alongside this when those fields must not be lost (e.g. in the
/// [`crate::registry`] fallback path).
pub fn decode_typed<T: DeserializeOwned>(
    event_type: &str,
    bytes: &[u8],
    encoding: Encoding,
) -> Result<T, CodecError> {
    let raw = decode_raw(bytes, encoding)?;
    let value = Value::Object(raw.0);
    serde_json::from_value(value).map_err(|err| CodecError::Malformed {
        event_type: event_type.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Known {
        name: String,
        count: u32,
    }

    #[test]
    fn binary_round_trip() {
        let value = Known { name: "a".into(), count: 3 };
        let bytes = encode(&value, Encoding::Binary).unwrap();
        let decoded: Known = decode_typed("known", &bytes, Encoding::Binary).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn json_round_trip() {
        let value = Known { name: "a".into(), count: 3 };
        let bytes = encode(&value, Encoding::Json).unwrap();
        let decoded: Known = decode_typed("known", &bytes, Encoding::Json).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn json_preserves_unknown_fields_in_raw_carrier() {
        let mut map = Map::new();
        map.insert("name".into(), Value::String("a".into()));
        map.insert("count".into(), Value::from(3));
        map.insert("future_field".into(), Value::String("X".into()));
        let bytes = serde_json::to_vec(&map).unwrap();

        let typed: Known = decode_typed("known", &bytes, Encoding::Json).unwrap();
        assert_eq!(typed, Known { name: "a".into(), count: 3 });

        let raw = decode_raw(&bytes, Encoding::Json).unwrap();
        assert_eq!(raw.get("future_field"), Some(&Value::String("X".into())));

        let re_encoded = encode_raw(&raw, Encoding::Json).unwrap();
        let re_decoded = decode_raw(&re_encoded, Encoding::Json).unwrap();
        assert_eq!(re_decoded.get("future_field"), Some(&Value::String("X".into())));
    }

    #[test]
    fn unknown_field_in_binary_survives_raw_round_trip() {
        let mut map = Map::new();
        map.insert("name".into(), Value::String("a".into()));
        map.insert("count".into(), Value::from(3));
        map.insert("future_field".into(), Value::from(true));
        let raw = RawFields(map);

        let bytes = encode_raw(&raw, Encoding::Binary).unwrap();
        let decoded = decode_raw(&bytes, Encoding::Binary).unwrap();
        assert_eq!(decoded.get("future_field"), Some(&Value::from(true)));
    }

    #[test]
    fn decode_typed_fails_on_malformed_binary() {
        let err = decode_typed::<Known>("known", b"not bincode", Encoding::Binary).unwrap_err();
        assert!(matches!(err, CodecError::Binary(_)));
    }
}
