//! Block reconciliation
//!
//! Turns a cached sequence plus an [`UpdateDescriptor`] into the new
//! authoritative sequence and the minimal change between the two.
//!
//! Blocks whose end record the client already holds (same index, same hash)
//! are sliced from the cached copy; only the rest are fetched, all at once.
//! The diff is a prefix diff: everything from the first differing hash
//! onwards is reported as replaced, since downstream state (a drawn path)
//! cannot be patched in place past a divergence point.

use futures::future::try_join_all;
use tracing::debug;

use super::descriptor::{Block, UpdateDescriptor};
use super::record::Record;
use crate::core::{BlockFetcher, ReconcileError};

/// Minimal client-visible change between the old and new sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Records consumers must discard, in order.
    pub old_items: Vec<Record>,
    /// Records consumers must apply, in order.
    pub new_items: Vec<Record>,
    /// The materialized new sequence.
    pub new_list: Vec<Record>,
}

impl SyncResult {
    /// Result for an update that changed nothing.
    pub fn unchanged(list: &[Record]) -> Self {
        Self {
            old_items: Vec::new(),
            new_items: Vec::new(),
            new_list: list.to_vec(),
        }
    }

    /// Result that replays a whole sequence, as if the client had nothing.
    pub fn full(list: &[Record]) -> Self {
        Self {
            old_items: Vec::new(),
            new_items: list.to_vec(),
            new_list: list.to_vec(),
        }
    }

    /// Prefix diff of `old_list` against `new_list`.
    pub fn diff(old_list: &[Record], new_list: Vec<Record>) -> Self {
        let first = first_divergence(old_list, &new_list);
        Self {
            old_items: old_list[first..].to_vec(),
            new_items: new_list[first..].to_vec(),
            new_list,
        }
    }

    /// Whether consumers have nothing to do.
    pub fn is_unchanged(&self) -> bool {
        self.old_items.is_empty() && self.new_items.is_empty()
    }
}

/// First index where the hashes differ, or the shorter length.
pub fn first_divergence(a: &[Record], b: &[Record]) -> usize {
    a.iter()
        .zip(b)
        .position(|(x, y)| x.hash != y.hash)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// Reconcile `old_list` against `update`.
///
/// Neither input is modified; on error the caller keeps its cached copy.
pub async fn reconcile<F>(
    fetcher: &F,
    old_list: &[Record],
    update: &UpdateDescriptor,
) -> Result<SyncResult, ReconcileError>
where
    F: BlockFetcher + ?Sized,
{
    match update {
        UpdateDescriptor::Noop => Ok(SyncResult::unchanged(old_list)),
        UpdateDescriptor::Append { add_block } => {
            let mut new_list = Vec::with_capacity(old_list.len() + add_block.len());
            new_list.extend_from_slice(old_list);
            new_list.extend_from_slice(add_block);
            Ok(SyncResult {
                old_items: Vec::new(),
                new_items: add_block.clone(),
                new_list,
            })
        }
        UpdateDescriptor::Blocks {
            blocks,
            partial_block,
        } => {
            let new_list = materialize(fetcher, old_list, blocks, partial_block).await?;
            Ok(SyncResult::diff(old_list, new_list))
        }
    }
}

async fn materialize<F>(
    fetcher: &F,
    old_list: &[Record],
    blocks: &[Block],
    partial_block: &[Record],
) -> Result<Vec<Record>, ReconcileError>
where
    F: BlockFetcher + ?Sized,
{
    for block in blocks {
        block.validate()?;
    }
    let missing: Vec<&Block> = blocks.iter().filter(|b| !b.is_cached_in(old_list)).collect();
    debug!(
        blocks = blocks.len(),
        fetching = missing.len(),
        partial = partial_block.len(),
        "materializing sequence"
    );

    let mut fetched = try_join_all(missing.iter().map(|block| fetch_checked(fetcher, block)))
        .await?
        .into_iter();

    let mut new_list = Vec::new();
    for block in blocks {
        if block.is_cached_in(old_list) {
            // end_index < old_list.len() and start_index <= end_index
            let range = block.start_index as usize..=block.end_index as usize;
            new_list.extend_from_slice(&old_list[range]);
        } else if let Some(records) = fetched.next() {
            new_list.extend(records);
        }
    }
    new_list.extend_from_slice(partial_block);
    Ok(new_list)
}

async fn fetch_checked<F>(fetcher: &F, block: &Block) -> Result<Vec<Record>, ReconcileError>
where
    F: BlockFetcher + ?Sized,
{
    let span = block.validate()?;
    let records = fetcher
        .fetch_block(block)
        .await
        .map_err(|source| ReconcileError::Fetch {
            start: block.start_index,
            end: block.end_index,
            source,
        })?;

    let mismatch = |detail: String| ReconcileError::BlockMismatch {
        start: block.start_index,
        end: block.end_index,
        detail,
    };
    if records.len() as u64 != span {
        return Err(mismatch(format!(
            "expected {span} records, got {}",
            records.len()
        )));
    }
    match records.last() {
        Some(last) if last.hash != block.end_hash => Err(mismatch(format!(
            "end hash {} does not match {}",
            last.hash, block.end_hash
        ))),
        _ => Ok(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ApiError;
    use crate::sync::fixtures::{SourceFetcher, blocked_source, full_update};
    use async_trait::async_trait;
    use futures::executor::block_on;
    use proptest::prelude::*;

    fn changed(index: u64) -> Record {
        Record::new("FOOBAR", index).with_field("x", serde_json::json!("."))
    }

    #[tokio::test]
    async fn test_empty_source() {
        let fetcher = SourceFetcher::new(vec![]);
        let update = UpdateDescriptor::Blocks {
            blocks: vec![],
            partial_block: vec![],
        };
        let result = reconcile(&fetcher, &[], &update).await.unwrap();
        assert_eq!(result, SyncResult::default());
    }

    #[tokio::test]
    async fn test_noop_is_idempotent() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let result = reconcile(&fetcher, &source, &UpdateDescriptor::Noop)
            .await
            .unwrap();
        assert_eq!(result.new_list, source);
        assert!(result.is_unchanged());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cold_start() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let result = reconcile(&fetcher, &[], &full_update()).await.unwrap();
        assert_eq!(result.new_list, source);
        assert_eq!(result.new_items, source);
        assert!(result.old_items.is_empty());
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_full_cache_hit() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let result = reconcile(&fetcher, &source, &full_update()).await.unwrap();
        assert_eq!(result.new_list, source);
        assert!(result.is_unchanged());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_old() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let result = reconcile(&fetcher, &source[..25], &full_update())
            .await
            .unwrap();

        assert_eq!(result.new_list, source);
        assert!(result.old_items.is_empty());
        assert_eq!(result.new_items, source[25..35].to_vec());
        // 0..=19 and 20..=24 come from cache; only 25..=29 goes out.
        assert_eq!(fetcher.fetched(), vec![Block::new(25, 29, "k9VG")]);
    }

    #[tokio::test]
    async fn test_rollback() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let mut old = source.clone();
        old.push(Record::new("FOOBAR", 35).with_field("x", serde_json::json!("l")));

        let result = reconcile(&fetcher, &old, &full_update()).await.unwrap();
        assert_eq!(result.new_list, source);
        assert_eq!(result.old_items, vec![old[35].clone()]);
        assert!(result.new_items.is_empty());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_divergence_at_tail() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let mut old = source[..34].to_vec();
        old.push(changed(34));

        let result = reconcile(&fetcher, &old, &full_update()).await.unwrap();
        assert_eq!(result.new_list, source);
        assert_eq!(result.old_items, vec![changed(34)]);
        assert_eq!(result.new_items, vec![source[34].clone()]);
    }

    #[tokio::test]
    async fn test_divergence_mid_sequence_invalidates_rest() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let mut old = source.clone();
        old[24] = changed(24);

        let result = reconcile(&fetcher, &old, &full_update()).await.unwrap();
        assert_eq!(result.new_list, source);
        assert_eq!(result.old_items, old[24..].to_vec());
        assert_eq!(result.new_items, source[24..].to_vec());
        assert_eq!(fetcher.fetched(), vec![Block::new(20, 24, "juYX")]);
    }

    #[tokio::test]
    async fn test_cache_hit_trusts_end_hash() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let mut old = source.clone();
        old[22] = changed(22);

        // Only the end record pins a block, so 20..=24 is reused as cached.
        let result = reconcile(&fetcher, &old, &full_update()).await.unwrap();
        assert_eq!(result.new_list, old);
        assert!(result.is_unchanged());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_just_partial_block() {
        let only = vec![changed(0)];
        let fetcher = SourceFetcher::new(only.clone());
        let update = UpdateDescriptor::Blocks {
            blocks: vec![],
            partial_block: only.clone(),
        };
        let result = reconcile(&fetcher, &[], &update).await.unwrap();
        assert_eq!(result.new_list, only);
        assert_eq!(result.new_items, only);
        assert!(result.old_items.is_empty());
    }

    #[tokio::test]
    async fn test_add_block() {
        let source = blocked_source();
        let fetcher = SourceFetcher::new(source.clone());
        let update = UpdateDescriptor::Append {
            add_block: source[31..35].to_vec(),
        };
        let result = reconcile(&fetcher, &source[..31], &update).await.unwrap();
        assert_eq!(result.new_list, source);
        assert!(result.old_items.is_empty());
        assert_eq!(result.new_items, source[31..35].to_vec());
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_bad_format_rejected_before_reconcile() {
        let result = UpdateDescriptor::from_value(serde_json::json!({"bad_format": null}));
        assert!(matches!(result, Err(ReconcileError::Malformed(_))));
    }

    struct FailingFetcher;

    #[async_trait]
    impl BlockFetcher for FailingFetcher {
        async fn fetch_block(&self, _block: &Block) -> Result<Vec<Record>, ApiError> {
            Err(ApiError::Status {
                status: 500,
                body: "Wrong end_hash".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_whole_call() {
        let source = blocked_source();
        let old = source[..25].to_vec();
        let result = reconcile(&FailingFetcher, &old, &full_update()).await;
        assert!(matches!(
            result,
            Err(ReconcileError::Fetch { start: 25, end: 29, .. })
        ));
        // Cached copy is borrowed, never touched.
        assert_eq!(old, source[..25].to_vec());
    }

    #[tokio::test]
    async fn test_block_mismatch_detected() {
        let mut wrong = blocked_source();
        wrong[29] = changed(29);
        let fetcher = SourceFetcher::new(wrong);
        let result = reconcile(&fetcher, &[], &full_update()).await;
        assert!(matches!(
            result,
            Err(ReconcileError::BlockMismatch { start: 25, end: 29, .. })
        ));
    }

    #[tokio::test]
    async fn test_short_block_detected() {
        let fetcher = SourceFetcher::new(blocked_source()[..27].to_vec());
        let result = reconcile(&fetcher, &[], &full_update()).await;
        assert!(matches!(result, Err(ReconcileError::BlockMismatch { .. })));
    }

    #[tokio::test]
    async fn test_unbounded_block_rejected_before_fetch() {
        let fetcher = SourceFetcher::new(vec![Record::new("x", 0)]);
        let update = UpdateDescriptor::Blocks {
            blocks: vec![Block::new(0, u64::MAX, "x")],
            partial_block: vec![],
        };
        let result = reconcile(&fetcher, &[], &update).await;
        assert!(matches!(result, Err(ReconcileError::Malformed(_))));
        assert_eq!(fetcher.calls(), 0);
    }

    /// Serves `source`, but only once two fetches are in flight together.
    struct RendezvousFetcher {
        source: Vec<Record>,
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl BlockFetcher for RendezvousFetcher {
        async fn fetch_block(&self, block: &Block) -> Result<Vec<Record>, ApiError> {
            self.barrier.wait().await;
            let range = block.start_index as usize..=block.end_index as usize;
            Ok(self.source[range].to_vec())
        }
    }

    #[tokio::test]
    async fn test_missing_blocks_fetched_concurrently() {
        let source = blocked_source();
        let fetcher = RendezvousFetcher {
            source: source.clone(),
            barrier: tokio::sync::Barrier::new(2),
        };
        let update = UpdateDescriptor::Blocks {
            blocks: vec![Block::new(0, 19, "qRd1"), Block::new(20, 24, "juYX")],
            partial_block: vec![],
        };
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            reconcile(&fetcher, &[], &update),
        )
        .await
        .expect("block fetches did not overlap")
        .unwrap();
        assert_eq!(result.new_list, source[..25].to_vec());
    }

    #[test]
    fn test_first_divergence() {
        let a = vec![Record::new("a", 0), Record::new("b", 1)];
        let b = vec![Record::new("a", 0), Record::new("c", 1)];
        assert_eq!(first_divergence(&a, &b), 1);
        assert_eq!(first_divergence(&a, &a[..1]), 1);
        assert_eq!(first_divergence(&[], &a), 0);
    }

    proptest! {
        #[test]
        fn prop_any_prefix_reaches_source(cut in 0usize..=35) {
            let source = blocked_source();
            let fetcher = SourceFetcher::new(source.clone());
            let result = block_on(reconcile(&fetcher, &source[..cut], &full_update())).unwrap();
            prop_assert_eq!(&result.new_list, &source);
            prop_assert!(result.old_items.is_empty());
            prop_assert_eq!(result.new_items, source[cut..].to_vec());
        }

        #[test]
        fn prop_append_never_fetches(cut in 0usize..=35) {
            let source = blocked_source();
            let fetcher = SourceFetcher::new(source.clone());
            let update = UpdateDescriptor::Append { add_block: source[cut..].to_vec() };
            let result = block_on(reconcile(&fetcher, &source[..cut], &update)).unwrap();
            prop_assert_eq!(result.new_list, source);
            prop_assert_eq!(fetcher.calls(), 0);
        }
    }
}
