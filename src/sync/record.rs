//! Records and sequences.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ReconcileError;

/// One observation in a sequence (e.g. a GPS fix).
///
/// Only `hash` and `index` matter to the protocol; everything else the server
/// sends is kept verbatim in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Short content digest.
    pub hash: String,
    /// Position in the sequence.
    pub index: u64,
    /// Application payload.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with no payload.
    pub fn new(hash: impl Into<String>, index: u64) -> Self {
        Self {
            hash: hash.into(),
            index,
            fields: Map::new(),
        }
    }

    /// Add a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Ordered records of one entity within one topic.
pub type Sequence = Vec<Record>;

/// Check `sequence[i].index == i` for every position.
pub fn check_indices(sequence: &[Record]) -> Result<(), ReconcileError> {
    for (position, record) in sequence.iter().enumerate() {
        let expected = position as u64;
        if record.index != expected {
            return Err(ReconcileError::IndexGap {
                expected,
                found: record.index,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_long_keys() {
        let record: Record =
            serde_json::from_value(json!({"hash": "u0Zw", "index": 0, "position": [1.5, 2.5]})).unwrap();
        assert_eq!(record.hash, "u0Zw");
        assert_eq!(record.index, 0);
        assert_eq!(record.get("position"), Some(&json!([1.5, 2.5])));
    }

    #[test]
    fn test_payload_named_like_compact_key() {
        let record: Record =
            serde_json::from_value(json!({"hash": "3KI5", "index": 1, "x": "o"})).unwrap();
        assert_eq!(record.index, 1);
        assert_eq!(record.get("x"), Some(&json!("o")));
    }

    #[test]
    fn test_missing_hash_rejected() {
        let result: Result<Record, _> = serde_json::from_value(json!({"index": 0}));
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_keeps_payload() {
        let record = Record::new("abcd", 3).with_field("status", json!("Active"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"hash": "abcd", "index": 3, "status": "Active"}));
    }

    #[test]
    fn test_check_indices() {
        let good = vec![Record::new("a", 0), Record::new("b", 1)];
        assert!(check_indices(&good).is_ok());
        assert!(check_indices(&[]).is_ok());

        let gap = vec![Record::new("a", 0), Record::new("c", 2)];
        assert!(matches!(
            check_indices(&gap),
            Err(ReconcileError::IndexGap {
                expected: 1,
                found: 2
            })
        ));
    }
}
