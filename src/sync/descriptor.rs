//! Update descriptors
//!
//! The delta the server sends for one sequence. On the wire it is a JSON
//! object whose keys select the shape:
//!
//! ```text
//! {"blocks": [..], "partial_block": [..]}   re-describe the whole sequence
//! {"partial_block": [..]}                   same, with no hashed blocks
//! {"add_block": [..]}                       append verbatim
//! {}                                        nothing changed
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::Record;
use crate::core::ReconcileError;

/// A closed index range of a sequence, pinned by the hash of its last record.
///
/// Two blocks over the same range are interchangeable iff both `end_index`
/// and `end_hash` match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// First index covered.
    pub start_index: u64,
    /// Last index covered (inclusive).
    pub end_index: u64,
    /// Hash of the record at `end_index`.
    pub end_hash: String,
}

impl Block {
    /// Create a block.
    pub fn new(start_index: u64, end_index: u64, end_hash: impl Into<String>) -> Self {
        Self {
            start_index,
            end_index,
            end_hash: end_hash.into(),
        }
    }

    /// Number of records covered, or `None` for an inverted range or one
    /// whose length does not fit in a `u64`.
    pub fn span(&self) -> Option<u64> {
        self.end_index
            .checked_sub(self.start_index)?
            .checked_add(1)
    }

    /// Reject ranges [`span`](Self::span) cannot measure.
    pub fn validate(&self) -> Result<u64, ReconcileError> {
        self.span().ok_or_else(|| {
            ReconcileError::Malformed(format!(
                "block {}..={} is not a valid range",
                self.start_index, self.end_index
            ))
        })
    }

    /// Whether `list` already holds this exact range.
    pub fn is_cached_in(&self, list: &[Record]) -> bool {
        usize::try_from(self.end_index)
            .ok()
            .and_then(|end| list.get(end))
            .is_some_and(|record| record.hash == self.end_hash)
    }
}

/// Delta for one sequence. Exactly one shape per update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUpdate", into = "RawUpdate")]
pub enum UpdateDescriptor {
    /// Hashed blocks covering a prefix, then a raw unhashed tail.
    Blocks {
        /// Blocks in index order, starting at 0.
        blocks: Vec<Block>,
        /// Records after the last block.
        partial_block: Vec<Record>,
    },
    /// Records to append to the client's current copy.
    Append {
        /// Records to append.
        add_block: Vec<Record>,
    },
    /// Nothing changed.
    Noop,
}

impl UpdateDescriptor {
    /// Decode a descriptor from a JSON value, mapping any failure to
    /// [`ReconcileError::Malformed`].
    pub fn from_value(value: Value) -> Result<Self, ReconcileError> {
        serde_json::from_value(value).map_err(|e| ReconcileError::Malformed(e.to_string()))
    }

    /// Whether applying this update can require block fetches.
    pub fn may_fetch(&self) -> bool {
        matches!(self, Self::Blocks { blocks, .. } if !blocks.is_empty())
    }
}

/// Wire form; every key optional, nothing else allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocks: Option<Vec<Block>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partial_block: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    add_block: Option<Vec<Record>>,
}

impl TryFrom<RawUpdate> for UpdateDescriptor {
    type Error = ReconcileError;

    fn try_from(raw: RawUpdate) -> Result<Self, Self::Error> {
        match raw {
            RawUpdate {
                blocks: None,
                partial_block: None,
                add_block: None,
            } => Ok(Self::Noop),
            RawUpdate {
                blocks: None,
                partial_block: None,
                add_block: Some(add_block),
            } => Ok(Self::Append { add_block }),
            RawUpdate {
                blocks,
                partial_block,
                add_block: None,
            } => {
                let blocks = blocks.unwrap_or_default();
                for block in &blocks {
                    block.validate()?;
                }
                Ok(Self::Blocks {
                    blocks,
                    partial_block: partial_block.unwrap_or_default(),
                })
            }
            RawUpdate { .. } => Err(ReconcileError::Malformed(
                "add_block cannot be combined with blocks or partial_block".to_string(),
            )),
        }
    }
}

impl From<UpdateDescriptor> for RawUpdate {
    fn from(update: UpdateDescriptor) -> Self {
        match update {
            UpdateDescriptor::Blocks {
                blocks,
                partial_block,
            } => Self {
                blocks: Some(blocks),
                partial_block: Some(partial_block),
                add_block: None,
            },
            UpdateDescriptor::Append { add_block } => Self {
                add_block: Some(add_block),
                ..Self::default()
            },
            UpdateDescriptor::Noop => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blocks_shape() {
        let update = UpdateDescriptor::from_value(json!({
            "blocks": [{"start_index": 0, "end_index": 19, "end_hash": "qRd1"}],
            "partial_block": [{"hash": "zE1X", "index": 20}]
        }))
        .unwrap();
        match update {
            UpdateDescriptor::Blocks {
                blocks,
                partial_block,
            } => {
                assert_eq!(blocks, vec![Block::new(0, 19, "qRd1")]);
                assert_eq!(partial_block, vec![Record::new("zE1X", 20)]);
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_partial_block_only() {
        let update = UpdateDescriptor::from_value(json!({
            "partial_block": [{"hash": "FOOBAR", "index": 0}]
        }))
        .unwrap();
        assert_eq!(
            update,
            UpdateDescriptor::Blocks {
                blocks: vec![],
                partial_block: vec![Record::new("FOOBAR", 0)],
            }
        );
        assert!(!update.may_fetch());
    }

    #[test]
    fn test_add_block_shape() {
        let update =
            UpdateDescriptor::from_value(json!({"add_block": [{"hash": "LaqB", "index": 30}]}))
                .unwrap();
        assert_eq!(
            update,
            UpdateDescriptor::Append {
                add_block: vec![Record::new("LaqB", 30)]
            }
        );
    }

    #[test]
    fn test_empty_is_noop() {
        assert_eq!(
            UpdateDescriptor::from_value(json!({})).unwrap(),
            UpdateDescriptor::Noop
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = UpdateDescriptor::from_value(json!({"bad_format": null}));
        assert!(matches!(result, Err(ReconcileError::Malformed(_))));
    }

    #[test]
    fn test_mixed_shapes_rejected() {
        let result = UpdateDescriptor::from_value(json!({
            "partial_block": [],
            "add_block": []
        }));
        assert!(matches!(result, Err(ReconcileError::Malformed(_))));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(UpdateDescriptor::from_value(json!([1, 2, 3])).is_err());
        assert!(UpdateDescriptor::from_value(json!("blocks")).is_err());
    }

    #[test]
    fn test_inverted_block_rejected() {
        let result = UpdateDescriptor::from_value(json!({
            "blocks": [{"start_index": 5, "end_index": 4, "end_hash": "x"}]
        }));
        assert!(matches!(result, Err(ReconcileError::Malformed(_))));
    }

    #[test]
    fn test_encode_omits_absent_keys() {
        let value = serde_json::to_value(UpdateDescriptor::Noop).unwrap();
        assert_eq!(value, json!({}));

        let value = serde_json::to_value(UpdateDescriptor::Append {
            add_block: vec![Record::new("a", 0)],
        })
        .unwrap();
        assert_eq!(value, json!({"add_block": [{"hash": "a", "index": 0}]}));
    }

    #[test]
    fn test_block_cache_check() {
        let list = vec![Record::new("a", 0), Record::new("b", 1)];
        assert!(Block::new(0, 1, "b").is_cached_in(&list));
        assert!(!Block::new(0, 1, "z").is_cached_in(&list));
        assert!(!Block::new(0, 2, "c").is_cached_in(&list));
        assert_eq!(Block::new(20, 24, "juYX").span(), Some(5));
        assert_eq!(Block::new(5, 4, "x").span(), None);
        assert_eq!(Block::new(0, u64::MAX, "x").span(), None);
        assert_eq!(Block::new(1, u64::MAX, "x").span(), Some(u64::MAX));
    }

    #[test]
    fn test_unbounded_block_rejected() {
        let result = UpdateDescriptor::from_value(json!({
            "blocks": [{"start_index": 0, "end_index": u64::MAX, "end_hash": "x"}]
        }));
        assert!(matches!(result, Err(ReconcileError::Malformed(_))));
    }
}
