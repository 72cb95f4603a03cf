//! Tagged-value metadata codec
//!
//! Group metadata is an ordered association list whose values may be
//! strings, numbers, booleans, dates or nested maps. The encoding is a
//! versioned, explicitly tagged JSON document: every value carries its
//! type tag, so decoding never guesses — a string that happens to look
//! like a date stays a string.

use super::local_store::StoreError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value};

const META_VERSION: u64 = 1;

/// ISO-8601 with fixed millisecond precision, e.g.
/// `2026-08-05T12:34:56.789Z`
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Ordered association list of metadata fields
pub type MetaMap = Vec<(String, MetaValue)>;

/// One metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Map(MetaMap),
}

/// Encode a metadata map to its stored byte form
pub fn encode_meta(map: &MetaMap) -> Result<Vec<u8>, StoreError> {
    let doc = json!({
        "version": META_VERSION,
        "value": encode_map(map),
    });
    serde_json::to_vec(&doc).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Decode stored bytes back into a metadata map
pub fn decode_meta(bytes: &[u8]) -> Result<MetaMap, StoreError> {
    let doc: Value =
        serde_json::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))?;
    let version = doc
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Codec("missing version".to_string()))?;
    if version != META_VERSION {
        return Err(StoreError::Codec(format!("unsupported version {version}")));
    }
    let value = doc
        .get("value")
        .ok_or_else(|| StoreError::Codec("missing value".to_string()))?;
    decode_map(value)
}

fn encode_map(map: &MetaMap) -> Value {
    Value::Array(
        map.iter()
            .map(|(key, value)| json!([key, encode_value(value)]))
            .collect(),
    )
}

fn encode_value(value: &MetaValue) -> Value {
    match value {
        MetaValue::Str(s) => json!({ "t": "str", "v": s }),
        MetaValue::Num(n) => json!({ "t": "num", "v": n }),
        MetaValue::Bool(b) => json!({ "t": "bool", "v": b }),
        MetaValue::Date(d) => json!({ "t": "date", "v": d.format(DATE_FORMAT).to_string() }),
        MetaValue::Map(m) => json!({ "t": "map", "v": encode_map(m) }),
    }
}

fn decode_map(value: &Value) -> Result<MetaMap, StoreError> {
    let entries = value
        .as_array()
        .ok_or_else(|| StoreError::Codec("map is not an array".to_string()))?;
    let mut map = MetaMap::with_capacity(entries.len());
    for entry in entries {
        let pair = entry
            .as_array()
            .filter(|pair| pair.len() == 2)
            .ok_or_else(|| StoreError::Codec("map entry is not a pair".to_string()))?;
        let key = pair[0]
            .as_str()
            .ok_or_else(|| StoreError::Codec("map key is not a string".to_string()))?;
        map.push((key.to_string(), decode_value(&pair[1])?));
    }
    Ok(map)
}

fn decode_value(value: &Value) -> Result<MetaValue, StoreError> {
    let tag = value
        .get("t")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Codec("value has no type tag".to_string()))?;
    let inner = value
        .get("v")
        .ok_or_else(|| StoreError::Codec("value has no payload".to_string()))?;
    match tag {
        "str" => inner
            .as_str()
            .map(|s| MetaValue::Str(s.to_string()))
            .ok_or_else(|| StoreError::Codec("str payload is not a string".to_string())),
        "num" => inner
            .as_f64()
            .map(MetaValue::Num)
            .ok_or_else(|| StoreError::Codec("num payload is not a number".to_string())),
        "bool" => inner
            .as_bool()
            .map(MetaValue::Bool)
            .ok_or_else(|| StoreError::Codec("bool payload is not a boolean".to_string())),
        "date" => {
            let text = inner
                .as_str()
                .ok_or_else(|| StoreError::Codec("date payload is not a string".to_string()))?;
            let parsed = NaiveDateTime::parse_from_str(text, DATE_FORMAT)
                .map_err(|e| StoreError::Codec(format!("bad date '{text}': {e}")))?;
            Ok(MetaValue::Date(parsed.and_utc()))
        }
        "map" => Ok(MetaValue::Map(decode_map(inner)?)),
        other => Err(StoreError::Codec(format!("unknown type tag '{other}'"))),
    }
}
