//! The published JSON document

use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

/// Key of the mapping every snapshot must carry
pub const ATTRIBUTES_KEY: &str = "attributes";

/// One complete instance of the published document
///
/// A snapshot is built fresh every cycle from the primary source response and
/// replaced wholesale; nothing carries over from the previous cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    document: Value,
}

impl DataSnapshot {
    /// Wrap a parsed document, checking it has an `attributes` object
    pub fn from_value(document: Value) -> Result<Self> {
        match document.get(ATTRIBUTES_KEY) {
            Some(Value::Object(_)) => Ok(Self { document }),
            Some(other) => Err(SyncError::InvalidSnapshot(format!(
                "`{ATTRIBUTES_KEY}` must be an object, got {}",
                json_kind(other)
            ))),
            None => Err(SyncError::InvalidSnapshot(format!(
                "missing `{ATTRIBUTES_KEY}` mapping"
            ))),
        }
    }

    /// Parse a snapshot from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let document: Value = serde_json::from_slice(bytes)?;
        Self::from_value(document)
    }

    /// The `attributes` mapping
    pub fn attributes(&self) -> &Map<String, Value> {
        match self.document.get(ATTRIBUTES_KEY) {
            Some(Value::Object(map)) => map,
            _ => unreachable!("snapshot constructed without attributes object"),
        }
    }

    fn attributes_mut(&mut self) -> &mut Map<String, Value> {
        match self.document.get_mut(ATTRIBUTES_KEY) {
            Some(Value::Object(map)) => map,
            _ => unreachable!("snapshot constructed without attributes object"),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes().get(key)
    }

    /// Whether an attribute is absent or holds a falsy value
    pub fn is_attribute_falsy(&self, key: &str) -> bool {
        self.attribute(key).map_or(true, is_falsy)
    }

    /// Overwrite an attribute with a string value
    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        self.attributes_mut()
            .insert(key.to_string(), Value::String(value.into()));
    }

    pub fn as_value(&self) -> &Value {
        &self.document
    }

    pub fn into_value(self) -> Value {
        self.document
    }

    /// Serialize to the UTF-8 JSON encoding published over BLE
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.document)?)
    }
}

/// Falsy in the loose sense used by the upstream feed: absent, null, false,
/// zero, or an empty string, array or object
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_falsy_values() {
        assert!(is_falsy(&json!(null)));
        assert!(is_falsy(&json!(false)));
        assert!(is_falsy(&json!(0)));
        assert!(is_falsy(&json!(0.0)));
        assert!(is_falsy(&json!("")));
        assert!(is_falsy(&json!([])));
        assert!(is_falsy(&json!({})));

        assert!(!is_falsy(&json!("07:15")));
        assert!(!is_falsy(&json!(true)));
        assert!(!is_falsy(&json!(1)));
        assert!(!is_falsy(&json!(["x"])));
    }

    #[test]
    fn test_snapshot_requires_attributes() {
        assert!(DataSnapshot::from_value(json!({"state": "on"})).is_err());
        assert!(DataSnapshot::from_value(json!({"attributes": "nope"})).is_err());
        assert!(DataSnapshot::from_value(json!({"attributes": {}})).is_ok());
    }

    #[test]
    fn test_missing_attribute_is_falsy() {
        let snapshot =
            DataSnapshot::from_value(json!({"attributes": {"bus_201": "08:00"}})).unwrap();
        assert!(snapshot.is_attribute_falsy("bus_197"));
        assert!(!snapshot.is_attribute_falsy("bus_201"));
    }

    #[test]
    fn test_set_attribute_keeps_other_fields() {
        let mut snapshot = DataSnapshot::from_value(json!({
            "state": "12.5",
            "attributes": {"bus_197": "", "temperature": 12.5}
        }))
        .unwrap();

        snapshot.set_attribute("bus_197", "07:15|07:30");

        assert_eq!(
            snapshot.as_value(),
            &json!({
                "state": "12.5",
                "attributes": {"bus_197": "07:15|07:30", "temperature": 12.5}
            })
        );
    }

    #[test]
    fn test_bytes_round_trip() {
        let snapshot =
            DataSnapshot::from_value(json!({"attributes": {"bus_197": "07:15"}})).unwrap();
        let bytes = snapshot.to_bytes().unwrap();
        assert_eq!(DataSnapshot::from_slice(&bytes).unwrap(), snapshot);
    }
}
