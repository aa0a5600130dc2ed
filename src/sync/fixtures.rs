//! Shared test fixtures: a 35-record sequence cut into three hashed blocks
//! and a five-record tail.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::{Block, Record, UpdateDescriptor};
use crate::core::{ApiError, BlockFetcher};

const HASHES: [&str; 35] = [
    "u0Zw", "3KI5", "fhi8", "k6sn", "96Jb", "q2Yu", "agiy", "cTTc", "xtbb", "cuBt", "KCgI",
    "GkCH", "bjmL", "4a1o", "9-EB", "9xom", "NrrA", "Wltt", "tvhv", "qRd1", "zE1X", "j3ii",
    "-3UE", "yBJf", "juYX", "wARg", "Zwue", "QFbp", "Vj-2", "k9VG", "LaqB", "7is4", "yG0W",
    "qmpi", "opj8",
];

const TEXT: &str = "Lorem ipsum dolor sit amet posuere.";

/// The full source sequence.
pub(crate) fn blocked_source() -> Vec<Record> {
    HASHES
        .iter()
        .zip(TEXT.chars())
        .enumerate()
        .map(|(index, (hash, ch))| {
            Record::new(*hash, index as u64).with_field("x", json!(ch.to_string()))
        })
        .collect()
}

/// The update a server holding [`blocked_source`] would send.
pub(crate) fn full_update() -> UpdateDescriptor {
    UpdateDescriptor::Blocks {
        blocks: vec![
            Block::new(0, 19, "qRd1"),
            Block::new(20, 24, "juYX"),
            Block::new(25, 29, "k9VG"),
        ],
        partial_block: blocked_source()[30..35].to_vec(),
    }
}

/// Serves blocks out of an in-memory sequence and records every request.
pub(crate) struct SourceFetcher {
    source: Vec<Record>,
    fetched: Mutex<Vec<Block>>,
}

impl SourceFetcher {
    pub(crate) fn new(source: Vec<Record>) -> Self {
        Self {
            source,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }

    pub(crate) fn fetched(&self) -> Vec<Block> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockFetcher for SourceFetcher {
    async fn fetch_block(&self, block: &Block) -> Result<Vec<Record>, ApiError> {
        self.fetched.lock().unwrap().push(block.clone());
        let start = (block.start_index as usize).min(self.source.len());
        let end = (block.end_index as usize + 1).min(self.source.len());
        Ok(self.source[start..end].to_vec())
    }
}
