//! Process-wide event-class registry (spec.md §4.C "Event-class registry (host bridge)",
//! §4.G, §9 "Global mutable registry").
//!
//! The registry maps an `event_type` string to a host-provided deserializer. It is
//! read-mostly: lookups happen on every replayed event, registrations happen once at
//! startup. A `parking_lot`-style read-biased lock isn't pulled in as a new dependency
//! (the corpus doesn't use one here); `std::sync::RwLock` already gives readers
//! concurrent access and is what the teacher's codebase reaches for elsewhere.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codec::{decode_raw, Encoding, RawFields};
use crate::error::CodecError;
use crate::event::Event;

/// Implemented by a per-event-type deserializer. Hosts don't implement this directly;
/// [`EventRegistry::register`] builds one from a plain `Fn(&RawFields) -> T`.
trait HostDeserializer: Send + Sync {
    fn deserialize(&self, raw: &RawFields) -> Result<Box<dyn Any + Send + Sync>, CodecError>;
}

struct FnDeserializer<T, F> {
    f: F,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> HostDeserializer for FnDeserializer<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(&RawFields) -> Result<T, CodecError> + Send + Sync,
{
    fn deserialize(&self, raw: &RawFields) -> Result<Box<dyn Any + Send + Sync>, CodecError> {
        (self.f)(raw).map(|v| Box::new(v) as Box<dyn Any + Send + Sync>)
    }
}

/// Result of decoding an event through the registry. Always carries the full
/// [`RawFields`] alongside any typed value, so a handler that only knows a subset of an
/// event's fields never causes the rest to be dropped (spec.md §9, scenario 6).
pub enum HostEvent {
    /// `event_type` had a registered deserializer, which succeeded.
    Known {
        event_type: String,
        value: Box<dyn Any + Send + Sync>,
        raw: RawFields,
    },
    /// No deserializer is registered for `event_type`. The raw decoded fields remain
    /// available to the caller; nothing is dropped.
    Unknown { event_type: String, raw: RawFields },
}

impl HostEvent {
    /// Downcast the typed value, if this is a [`HostEvent::Known`] of the expected type.
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        match self {
            HostEvent::Known { value, .. } => value.downcast_ref::<T>(),
            HostEvent::Unknown { .. } => None,
        }
    }

    pub fn raw(&self) -> &RawFields {
        match self {
            HostEvent::Known { raw, .. } | HostEvent::Unknown { raw, .. } => raw,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            HostEvent::Known { event_type, .. } | HostEvent::Unknown { event_type, .. } => event_type,
        }
    }
}

/// A process-wide `event_type -> deserializer` mapping.
///
/// Registration is additive; re-registering an `event_type` overwrites the previous
/// deserializer. Safe to clone (cheap `Arc` clone) and share across tasks.
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn HostDeserializer>>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deserializer for `event_type`. Overwrites any previous registration
    /// for the same string.
    pub fn register<T, F>(&self, event_type: impl Into<String>, deserializer: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&RawFields) -> Result<T, CodecError> + Send + Sync + 'static,
    {
        let boxed: Arc<dyn HostDeserializer> = Arc::new(FnDeserializer {
            f: deserializer,
            _marker: std::marker::PhantomData,
        });
        self.inner
            .write()
            .expect("event registry lock poisoned")
            .insert(event_type.into(), boxed);
    }

    /// Remove the deserializer registered for `event_type`, if any.
    pub fn unregister(&self, event_type: &str) {
        self.inner.write().expect("event registry lock poisoned").remove(event_type);
    }

    /// The set of currently registered event-type strings.
    pub fn registered_event_classes(&self) -> Vec<String> {
        self.inner.read().expect("event registry lock poisoned").keys().cloned().collect()
    }

    /// Decode a committed [`Event`]'s payload through the registry.
    ///
    /// If `event.event_type` is registered, returns [`HostEvent::Known`] on success.
    /// If decoding fails structurally, that's a [`CodecError`] the caller must handle —
    /// see spec.md §7: during replay, callers should treat this the same as
    /// [`HostEvent::Unknown`] and keep going rather than aborting the whole batch.
    /// If `event.event_type` isn't registered, returns [`HostEvent::Unknown`] with the
    /// raw fields intact.
    pub fn decode(&self, event: &Event) -> Result<HostEvent, CodecError> {
        let raw = decode_raw(&event.payload, event.payload_encoding)?;
        let deserializer = self
            .inner
            .read()
            .expect("event registry lock poisoned")
            .get(&event.event_type)
            .cloned();

        match deserializer {
            Some(deserializer) => deserializer.deserialize(&raw).map(|value| HostEvent::Known {
                event_type: event.event_type.clone(),
                value,
                raw,
            }),
            None => Ok(HostEvent::Unknown {
                event_type: event.event_type.clone(),
                raw,
            }),
        }
    }

    /// Decode raw bytes directly (used by tests and by callers that have a payload
    /// outside the context of a committed [`Event`], e.g. scenario 6's forward-compat
    /// check).
    pub fn decode_bytes(&self, event_type: &str, bytes: &[u8], encoding: Encoding) -> Result<HostEvent, CodecError> {
        let raw = decode_raw(bytes, encoding)?;
        let deserializer = self
            .inner
            .read()
            .expect("event registry lock poisoned")
            .get(event_type)
            .cloned();

        match deserializer {
            Some(deserializer) => deserializer.deserialize(&raw).map(|value| HostEvent::Known {
                event_type: event_type.to_string(),
                value,
                raw,
            }),
            None => Ok(HostEvent::Unknown {
                event_type: event_type.to_string(),
                raw,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_raw;
    use serde_json::{Map, Value};

    #[derive(Debug, PartialEq)]
    struct UserRegistered {
        name: String,
    }

    #[test]
    fn unregistered_type_falls_back_to_raw() {
        let registry = EventRegistry::new();
        let mut map = Map::new();
        map.insert("name".into(), Value::String("Alice".into()));
        let bytes = encode_raw(&RawFields(map), Encoding::Json).unwrap();

        let decoded = registry.decode_bytes("UserRegistered", &bytes, Encoding::Json).unwrap();
        assert!(matches!(decoded, HostEvent::Unknown { .. }));
        assert_eq!(decoded.raw().get("name"), Some(&Value::String("Alice".into())));
    }

    #[test]
    fn registered_type_decodes_and_keeps_unknown_fields_in_raw() {
        let registry = EventRegistry::new();
        registry.register("UserRegistered", |raw: &RawFields| {
            let name = raw
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::Malformed {
                    event_type: "UserRegistered".into(),
                    reason: "missing name".into(),
                })?;
            Ok(UserRegistered { name: name.to_string() })
        });

        let mut map = Map::new();
        map.insert("name".into(), Value::String("Alice".into()));
        map.insert("future_field".into(), Value::String("X".into()));
        let bytes = encode_raw(&RawFields(map), Encoding::Json).unwrap();

        let decoded = registry.decode_bytes("UserRegistered", &bytes, Encoding::Json).unwrap();
        assert_eq!(
            decoded.downcast::<UserRegistered>(),
            Some(&UserRegistered { name: "Alice".into() })
        );
        assert_eq!(decoded.raw().get("future_field"), Some(&Value::String("X".into())));

        let re_encoded = encode_raw(decoded.raw(), Encoding::Json).unwrap();
        let re_decoded = registry.decode_bytes("UserRegistered", &re_encoded, Encoding::Json).unwrap();
        assert_eq!(re_decoded.raw().get("future_field"), Some(&Value::String("X".into())));
    }

    #[test]
    fn reregistering_overwrites() {
        let registry = EventRegistry::new();
        registry.register("E", |_: &RawFields| Ok(1u32));
        registry.register("E", |_: &RawFields| Ok(2u32));
        let decoded = registry.decode_bytes("E", b"{}", Encoding::Json).unwrap();
        assert_eq!(decoded.downcast::<u32>(), Some(&2));
    }
}
