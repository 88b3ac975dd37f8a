//! Hybrid compaction: size-tiered at level 0, leveled from level 1 up.
//!
//! Flushes land at level 0 and arrive in bursts, so level 0 is managed the
//! same way size-tiered compaction manages its single tier — bucket by
//! size, merge a bucket once it reaches `min_threshold` members, output
//! stays at level 0. Once level 0 has nothing left to bucket, the same
//! call falls through to leveled promotion for level 1 and deeper, which
//! keeps read amplification bounded for the bulk of the dataset.
//!
//! One [`HybridCompaction`] value backs both the minor and major roles
//! ([`CompactionStrategyType::minor`](crate::compaction::CompactionStrategyType::minor)
//! and [`CompactionStrategyType::major`](crate::compaction::CompactionStrategyType::major)
//! both construct it) — there is no separate forced full-merge mode for
//! this strategy, only the same opportunistic step run on demand.

use std::sync::Arc;

use crate::compaction::leveled::LeveledCompaction;
use crate::compaction::stcs::{bucket_sstables, select_compaction_bucket};
use crate::compaction::{
    CompactionError, CompactionResult, CompactionStrategy, MergeIterator, dedup_records,
    finalize_compaction, full_range_scan_iters,
};
use crate::engine::EngineConfig;
use crate::manifest::Manifest;
use crate::sstable::SSTable;
use tracing::{debug, info};

pub struct HybridCompaction;

impl CompactionStrategy for HybridCompaction {
    fn compact(
        &self,
        sstables: &[Arc<SSTable>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        let level_zero: Vec<Arc<SSTable>> = sstables
            .iter()
            .filter(|s| s.level() == 0)
            .cloned()
            .collect();

        if !level_zero.is_empty() {
            let buckets = bucket_sstables(&level_zero, config);
            if let Some(selected) = select_compaction_bucket(&buckets, config) {
                let selected_ssts: Vec<&SSTable> =
                    selected.iter().map(|&i| level_zero[i].as_ref()).collect();
                let removed_ids: Vec<u64> = selected_ssts.iter().map(|s| s.id()).collect();

                info!(
                    selected_count = selected_ssts.len(),
                    ?removed_ids,
                    "hybrid compaction: merging level-0 bucket"
                );

                let iters = full_range_scan_iters(&selected_ssts)?;
                let merge_iter = MergeIterator::new(iters);
                let (point_entries, range_tombstones) = dedup_records(merge_iter);

                let result = finalize_compaction(
                    manifest,
                    data_dir,
                    removed_ids,
                    point_entries,
                    range_tombstones,
                    config.bloom_fp_rate,
                )?;

                return Ok(Some(result));
            }
            debug!(
                level_zero_count = level_zero.len(),
                "hybrid compaction: level 0 below merge threshold, trying leveled promotion"
            );
        }

        LeveledCompaction.compact(sstables, manifest, data_dir, config)
    }
}
