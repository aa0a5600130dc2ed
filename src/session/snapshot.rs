//! Persisted session snapshot.
//!
//! The snapshot holds everything needed to redraw an event without touching
//! the network: version tags, the config and routes documents, every cached
//! sequence and the latest value maps.
//!
//! Persisted form:
//!
//! ```text
//! {"format": 1, "digest": hex(sha256(payload)), "payload": "<snapshot json>"}
//! ```
//!
//! The envelope is zstd-compressed when the `compression` feature is on.
//! Anything that fails to decode, carries another format number, fails its
//! digest, or is not live is treated as stale and removed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::storage::SnapshotStorage;
use crate::core::StorageError;
use crate::core::constants::SNAPSHOT_FORMAT;
use crate::sync::{Record, Sequence};

/// Default zstd compression level (1-22, higher = smaller but slower)
#[cfg(feature = "compression")]
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// zstd frame magic, little-endian `0xFD2FB528`.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Cached state of one event session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    /// Whether the event is currently live.
    pub live: bool,
    /// Version tag of `config`.
    pub config_hash: Option<String>,
    /// Version tag of `routes`.
    pub routes_hash: Option<String>,
    /// Event config document.
    pub config: Option<Value>,
    /// Event routes document.
    pub routes: Option<Value>,
    /// topic -> entity -> sequence
    #[serde(default)]
    pub lists: BTreeMap<String, BTreeMap<String, Sequence>>,
    /// topic -> entity -> merged value map
    #[serde(default)]
    pub values: BTreeMap<String, BTreeMap<String, Value>>,
}

impl PersistedSnapshot {
    /// Cached sequence, empty if none.
    pub fn sequence(&self, topic: &str, entity: &str) -> &[Record] {
        self.lists
            .get(topic)
            .and_then(|entities| entities.get(entity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace a cached sequence.
    pub fn set_sequence(&mut self, topic: &str, entity: &str, sequence: Sequence) {
        self.lists
            .entry(topic.to_string())
            .or_default()
            .insert(entity.to_string(), sequence);
    }

    /// Every cached `(topic, entity, sequence)`, in key order.
    pub fn sequences(&self) -> impl Iterator<Item = (&str, &str, &[Record])> {
        self.lists.iter().flat_map(|(topic, entities)| {
            entities
                .iter()
                .map(move |(entity, seq)| (topic.as_str(), entity.as_str(), seq.as_slice()))
        })
    }

    /// Current values of one entity.
    pub fn values(&self, topic: &str, entity: &str) -> Option<&Value> {
        self.values.get(topic).and_then(|entities| entities.get(entity))
    }

    /// Merge `update` into the entity's values and return the merged map.
    ///
    /// Object fields are merged shallowly; any non-object replaces.
    pub fn merge_values(&mut self, topic: &str, entity: &str, update: &Value) -> Value {
        let slot = self
            .values
            .entry(topic.to_string())
            .or_default()
            .entry(entity.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match (slot.as_object_mut(), update.as_object()) {
            (Some(current), Some(fields)) => {
                for (key, value) in fields {
                    current.insert(key.clone(), value.clone());
                }
            }
            _ => *slot = update.clone(),
        }
        slot.clone()
    }

    /// Drop sequences and values of entities not in `keep`.
    ///
    /// Returns how many `(topic, entity)` entries were dropped.
    pub fn retain_entities(&mut self, keep: &BTreeSet<String>) -> usize {
        let mut dropped = 0;
        for entities in self.lists.values_mut() {
            let before = entities.len();
            entities.retain(|entity, _| keep.contains(entity));
            dropped += before - entities.len();
        }
        for entities in self.values.values_mut() {
            let before = entities.len();
            entities.retain(|entity, _| keep.contains(entity));
            dropped += before - entities.len();
        }
        self.lists.retain(|_, entities| !entities.is_empty());
        self.values.retain(|_, entities| !entities.is_empty());
        dropped
    }
}

/// Entity names declared by a config document's `riders` list.
pub fn config_entities(config: &Value) -> Option<BTreeSet<String>> {
    let riders = config.get("riders")?.as_array()?;
    Some(
        riders
            .iter()
            .filter_map(|rider| rider.get("name")?.as_str().map(str::to_string))
            .collect(),
    )
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: u32,
    digest: String,
    payload: String,
}

/// Encode a snapshot into its persisted form.
pub fn encode_snapshot(snapshot: &PersistedSnapshot) -> Result<Vec<u8>, StorageError> {
    let payload = serde_json::to_string(snapshot)?;
    let envelope = Envelope {
        format: SNAPSHOT_FORMAT,
        digest: hex::encode(Sha256::digest(payload.as_bytes())),
        payload,
    };
    let bytes = serde_json::to_vec(&envelope)?;

    #[cfg(feature = "compression")]
    let bytes = zstd::encode_all(bytes.as_slice(), DEFAULT_COMPRESSION_LEVEL)?;

    Ok(bytes)
}

/// Decode a persisted snapshot, verifying format and digest.
pub fn decode_snapshot(bytes: &[u8]) -> Result<PersistedSnapshot, StorageError> {
    let plain;
    let json = if bytes.starts_with(&ZSTD_MAGIC) {
        plain = decompress(bytes)?;
        plain.as_slice()
    } else {
        bytes
    };

    let envelope: Envelope = serde_json::from_slice(json)
        .map_err(|e| StorageError::Corrupt(format!("bad envelope: {e}")))?;
    if envelope.format != SNAPSHOT_FORMAT {
        return Err(StorageError::Corrupt(format!(
            "format {} (expected {SNAPSHOT_FORMAT})",
            envelope.format
        )));
    }
    let digest = hex::encode(Sha256::digest(envelope.payload.as_bytes()));
    if digest != envelope.digest {
        return Err(StorageError::Corrupt("digest mismatch".to_string()));
    }
    serde_json::from_str(&envelope.payload)
        .map_err(|e| StorageError::Corrupt(format!("bad payload: {e}")))
}

#[cfg(feature = "compression")]
fn decompress(bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    zstd::decode_all(bytes).map_err(|e| StorageError::Corrupt(format!("decompression failed: {e}")))
}

#[cfg(not(feature = "compression"))]
fn decompress(_bytes: &[u8]) -> Result<Vec<u8>, StorageError> {
    Err(StorageError::Corrupt(
        "compressed snapshot but compression is disabled".to_string(),
    ))
}

/// What [`SnapshotStore::commit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Snapshot written.
    Persisted,
    /// Snapshot written after clearing the backend.
    PersistedAfterClear,
    /// Not live; any stored copy removed.
    Removed,
    /// Persistence is disabled for this session.
    Skipped,
}

/// Loads and writes one session's snapshot under a fixed key.
pub struct SnapshotStore {
    storage: Arc<dyn SnapshotStorage>,
    key: String,
    enabled: bool,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Store snapshots in `storage` under `key`.
    pub fn new(storage: Arc<dyn SnapshotStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            enabled: true,
        }
    }

    /// Storage key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether writes still reach the backend.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Load the stored snapshot, if present and usable.
    ///
    /// Stale copies are removed. Only backend failures are errors.
    pub fn load(&self) -> Result<Option<PersistedSnapshot>, StorageError> {
        let Some(bytes) = self.storage.get(&self.key)? else {
            return Ok(None);
        };
        match decode_snapshot(&bytes) {
            Ok(snapshot) if snapshot.live => {
                debug!(key = %self.key, bytes = bytes.len(), "loaded snapshot");
                Ok(Some(snapshot))
            }
            Ok(_) => {
                debug!(key = %self.key, "discarding snapshot of non-live session");
                self.storage.remove(&self.key)?;
                Ok(None)
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "discarding stale snapshot");
                self.storage.remove(&self.key)?;
                Ok(None)
            }
        }
    }

    /// Persist `snapshot` if live, otherwise make sure nothing is stored.
    ///
    /// A failed write clears the backend and is retried once; if that fails
    /// too, persistence is disabled and the error returned.
    pub fn commit(&mut self, snapshot: &PersistedSnapshot) -> Result<CommitOutcome, StorageError> {
        if !self.enabled {
            return Ok(CommitOutcome::Skipped);
        }
        if !snapshot.live {
            self.storage.remove(&self.key)?;
            return Ok(CommitOutcome::Removed);
        }

        let bytes = encode_snapshot(snapshot)?;
        match self.storage.set(&self.key, &bytes) {
            Ok(()) => Ok(CommitOutcome::Persisted),
            Err(first) => {
                warn!(key = %self.key, error = %first, "snapshot write failed, clearing storage");
                let retry = self
                    .storage
                    .clear()
                    .and_then(|()| self.storage.set(&self.key, &bytes));
                match retry {
                    Ok(()) => Ok(CommitOutcome::PersistedAfterClear),
                    Err(second) => {
                        self.enabled = false;
                        Err(second)
                    }
                }
            }
        }
    }

    /// Remove any stored copy.
    pub fn discard(&self) -> Result<(), StorageError> {
        self.storage.remove(&self.key)
    }
}
