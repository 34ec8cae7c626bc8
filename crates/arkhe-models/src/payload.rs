//! Dynamic operation output and its JSON sanitizer.
//!
//! Operations return heterogeneous data: nested maps, raw bytes read from
//! a subprocess, values of types the service knows nothing about. That data
//! is modelled as a closed recursive [`Payload`] and normalized into a
//! `serde_json::Value` by [`sanitize`], which never fails.

use std::fmt;
use std::sync::Arc;

use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A value whose shape is unknown to the service.
///
/// The only thing the sanitizer asks of it is a text rendering, which is
/// allowed to fail.
pub trait OpaqueValue: fmt::Debug + Send + Sync {
    /// Human-readable type name, used in logs.
    fn type_name(&self) -> &str;

    /// Render the value as text. `None` means the conversion failed.
    fn to_text(&self) -> Option<String>;
}

/// Output of an operation, before sanitization.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Payload>),
    /// Ordered entries; keys may be any payload and are coerced to text.
    Map(Vec<(Payload, Payload)>),
    Opaque(Arc<dyn OpaqueValue>),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(b.into())
    }

    pub fn opaque(value: impl OpaqueValue + 'static) -> Self {
        Self::Opaque(Arc::new(value))
    }

    /// Build a map from text-keyed entries.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Payload::Text(k.into()), v))
                .collect(),
        )
    }

    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &str {
        match self {
            Payload::Null => "null",
            Payload::Bool(_) => "bool",
            Payload::Int(_) | Payload::UInt(_) => "int",
            Payload::Float(_) => "float",
            Payload::Text(_) => "text",
            Payload::Bytes(_) => "bytes",
            Payload::Array(_) => "array",
            Payload::Map(_) => "map",
            Payload::Opaque(o) => o.type_name(),
        }
    }

    /// True when the tree holds only JSON-native values with text keys.
    pub fn is_json_safe(&self) -> bool {
        match self {
            Payload::Null | Payload::Bool(_) | Payload::Int(_) | Payload::UInt(_) | Payload::Text(_) => true,
            Payload::Float(f) => f.is_finite(),
            Payload::Bytes(_) | Payload::Opaque(_) => false,
            Payload::Array(items) => items.iter().all(Payload::is_json_safe),
            Payload::Map(entries) => entries
                .iter()
                .all(|(k, v)| matches!(k, Payload::Text(_)) && v.is_json_safe()),
        }
    }

    /// Sanitize into a payload tree that is guaranteed to be JSON-safe.
    pub fn sanitized(&self) -> Payload {
        Payload::from(sanitize(self))
    }
}

/// Normalize any payload into a JSON value. Never fails.
///
/// - bytes become UTF-8 text with undecodable sequences dropped
/// - map keys are coerced to text, values sanitized recursively
/// - arrays are sanitized element-wise
/// - primitives pass through; non-finite floats become null
/// - opaque values use their text rendering, or null if that fails
pub fn sanitize(payload: &Payload) -> Value {
    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(b) => Value::Bool(*b),
        Payload::Int(i) => Value::from(*i),
        Payload::UInt(u) => Value::from(*u),
        Payload::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Payload::Text(s) => Value::String(s.clone()),
        Payload::Bytes(b) => Value::String(decode_lossy(b)),
        Payload::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        Payload::Map(entries) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                object.insert(key_to_text(key), sanitize(value));
            }
            Value::Object(object)
        }
        Payload::Opaque(o) => o.to_text().map(Value::String).unwrap_or(Value::Null),
    }
}

/// Decode UTF-8, dropping invalid sequences instead of replacing them.
fn decode_lossy(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

fn key_to_text(key: &Payload) -> String {
    match key {
        Payload::Text(s) => s.clone(),
        other => match sanitize(other) {
            Value::String(s) => s,
            value => value.to_string(),
        },
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Null, Payload::Null) => true,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::UInt(a), Payload::UInt(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a == b,
            (Payload::Text(a), Payload::Text(b)) => a == b,
            (Payload::Bytes(a), Payload::Bytes(b)) => a == b,
            (Payload::Array(a), Payload::Array(b)) => a == b,
            (Payload::Map(a), Payload::Map(b)) => a == b,
            (Payload::Opaque(a), Payload::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Payload::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Payload::UInt(u)
                } else {
                    Payload::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Payload::Text(s),
            Value::Array(items) => Payload::Array(items.into_iter().map(Payload::from).collect()),
            Value::Object(object) => Payload::Map(
                object
                    .into_iter()
                    .map(|(k, v)| (Payload::Text(k), Payload::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Option<String>> for Payload {
    fn from(s: Option<String>) -> Self {
        s.map(Payload::Text).unwrap_or(Payload::Null)
    }
}

/// Strict serialization: only JSON-native values are accepted.
///
/// Bytes, opaque values, non-text map keys and non-finite floats are
/// errors here; run the payload through [`sanitize`] first.
impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Null => serializer.serialize_unit(),
            Payload::Bool(b) => serializer.serialize_bool(*b),
            Payload::Int(i) => serializer.serialize_i64(*i),
            Payload::UInt(u) => serializer.serialize_u64(*u),
            Payload::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Payload::Float(f) => Err(S::Error::custom(format!("float {f} is not representable in JSON"))),
            Payload::Text(s) => serializer.serialize_str(s),
            Payload::Bytes(b) => Err(S::Error::custom(format!(
                "{} raw bytes are not JSON serializable",
                b.len()
            ))),
            Payload::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Payload::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    match key {
                        Payload::Text(k) => map.serialize_entry(k, value)?,
                        other => {
                            return Err(S::Error::custom(format!(
                                "map key of type {} is not a string",
                                other.kind()
                            )))
                        }
                    }
                }
                map.end()
            }
            Payload::Opaque(o) => Err(S::Error::custom(format!(
                "object of type {} is not JSON serializable",
                o.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Frame {
        index: u32,
    }

    impl OpaqueValue for Frame {
        fn type_name(&self) -> &str {
            "Frame"
        }

        fn to_text(&self) -> Option<String> {
            Some(format!("<Frame {}>", self.index))
        }
    }

    #[derive(Debug)]
    struct Unprintable;

    impl OpaqueValue for Unprintable {
        fn type_name(&self) -> &str {
            "Unprintable"
        }

        fn to_text(&self) -> Option<String> {
            None
        }
    }

    fn mixed_payload() -> Payload {
        Payload::map([
            ("stdout", Payload::bytes(b"scan ok\xff\xfe done".to_vec())),
            (
                "nested",
                Payload::map([
                    ("inner", Payload::map([("depth", Payload::Int(2))])),
                    ("frames", Payload::Array(vec![Payload::opaque(Frame { index: 3 })])),
                ]),
            ),
            ("handle", Payload::opaque(Unprintable)),
            ("ratio", Payload::Float(0.5)),
        ])
    }

    #[test]
    fn test_bytes_are_decoded_dropping_invalid_sequences() {
        assert_eq!(
            sanitize(&Payload::bytes(b"abc\xffdef".to_vec())),
            json!("abcdef")
        );
        assert_eq!(
            sanitize(&Payload::bytes("naïve".as_bytes().to_vec())),
            json!("naïve")
        );
    }

    #[test]
    fn test_mixed_payload_round_trips_through_json() {
        let payload = mixed_payload();
        assert!(serde_json::to_string(&payload).is_err());

        let value = sanitize(&payload);
        let text = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);

        assert_eq!(value["stdout"], json!("scan ok done"));
        assert_eq!(value["nested"]["inner"]["depth"], json!(2));
        assert_eq!(value["nested"]["frames"][0], json!("<Frame 3>"));
        assert_eq!(value["handle"], Value::Null);
        assert_eq!(value["ratio"], json!(0.5));
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let once = mixed_payload().sanitized();
        let twice = once.sanitized();
        assert_eq!(once, twice);
        assert!(once.is_json_safe());
        assert_eq!(sanitize(&once), sanitize(&twice));
    }

    #[test]
    fn test_map_keys_are_coerced_to_text() {
        let payload = Payload::Map(vec![
            (Payload::Int(1), Payload::text("one")),
            (Payload::Bool(true), Payload::text("yes")),
            (Payload::bytes(b"raw".to_vec()), Payload::Null),
            (Payload::Null, Payload::Int(0)),
        ]);
        assert_eq!(
            sanitize(&payload),
            json!({"1": "one", "true": "yes", "raw": null, "null": 0})
        );
    }

    #[test]
    fn test_duplicate_keys_keep_last_value() {
        let payload = Payload::Map(vec![
            (Payload::Int(1), Payload::text("first")),
            (Payload::text("1"), Payload::text("second")),
        ]);
        assert_eq!(sanitize(&payload), json!({"1": "second"}));
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        assert_eq!(sanitize(&Payload::Float(f64::NAN)), Value::Null);
        assert_eq!(sanitize(&Payload::Float(f64::INFINITY)), Value::Null);
    }

    #[test]
    fn test_json_values_pass_through_unchanged() {
        let value = json!({"url": "https://cdn.example.com/out.mp4", "size": 1024, "tags": ["a", true, null, 1.5]});
        assert_eq!(sanitize(&Payload::from(value.clone())), value);
    }

    #[test]
    fn test_strict_serialization_of_safe_payload() {
        let payload = Payload::map([("a", Payload::Int(1)), ("b", Payload::text("x"))]);
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({"a": 1, "b": "x"}));
    }
}
