//! Leveled compaction.
//!
//! SSTables are organized into levels `0..config.level_count`, each with a
//! size budget `B(L) = base_level_size_bytes * level_size_ratio^L`. Level 0
//! is special-cased: its tables may overlap in key range (they arrive
//! straight from memtable flushes or level-0 size-tiered merges), so a
//! level-0 compaction always takes *every* level-0 table. From level 1
//! upward, tables within a level are disjoint, so compaction promotes one
//! table plus whichever tables in the next level overlap its key range.
//!
//! Minor compaction picks the shallowest level whose size exceeds its
//! budget and merges it one level deeper. Major compaction ignores levels
//! and budgets entirely — it merges everything into the deepest configured
//! level, applying range tombstones and dropping all spent tombstones, the
//! same way size-tiered major compaction does.

use std::sync::Arc;

use crate::compaction::{
    CompactionError, CompactionResult, CompactionStrategy, MergeIterator, dedup_records,
    finalize_compaction_at_level, full_range_scan_iters,
};
use crate::engine::EngineConfig;
use crate::engine::RangeTombstone;
use crate::engine::utils::Record;
use crate::manifest::Manifest;
use crate::sstable::{PointEntry, SSTable};
use tracing::{debug, info, trace};

// ------------------------------------------------------------------------------------------------
// Budgets and selection
// ------------------------------------------------------------------------------------------------

/// Size budget in bytes for level `l`: `base * ratio^l`.
fn level_budget(config: &EngineConfig, l: u32) -> u64 {
    config
        .base_level_size_bytes
        .saturating_mul(config.level_size_ratio.saturating_pow(l))
}

/// Groups SSTable indices by level, for levels `0..config.level_count`.
/// Tables at a level past `level_count - 1` (shouldn't normally occur) are
/// folded into the deepest level so they're never silently ignored.
fn group_by_level(sstables: &[Arc<SSTable>], config: &EngineConfig) -> Vec<Vec<usize>> {
    let deepest = config.level_count.saturating_sub(1);
    let mut levels: Vec<Vec<usize>> = vec![Vec::new(); config.level_count.max(1) as usize];
    for (i, sst) in sstables.iter().enumerate() {
        let l = sst.level().min(deepest) as usize;
        levels[l].push(i);
    }
    levels
}

/// Picks the shallowest level whose total size exceeds its budget.
/// Returns `None` if every level is within budget.
fn pick_overflowing_level(levels: &[Vec<usize>], sstables: &[Arc<SSTable>], config: &EngineConfig) -> Option<u32> {
    for (l, members) in levels.iter().enumerate() {
        if members.is_empty() {
            continue;
        }
        let total: u64 = members.iter().map(|&i| sstables[i].file_size()).sum();
        if total > level_budget(config, l as u32) {
            return Some(l as u32);
        }
    }
    None
}

/// Returns `true` if the key ranges `[a_min, a_max]` and `[b_min, b_max]`
/// overlap (inclusive on both ends).
fn ranges_overlap(a_min: &[u8], a_max: &[u8], b_min: &[u8], b_max: &[u8]) -> bool {
    a_min <= b_max && b_min <= a_max
}

/// Selects the SSTables to merge for a level-`l` overflow: the whole level
/// when `l == 0` (tables may overlap), otherwise the largest table in the
/// level plus every overlapping table one level down.
fn select_for_level(
    l: u32,
    levels: &[Vec<usize>],
    sstables: &[Arc<SSTable>],
) -> Vec<usize> {
    if l == 0 {
        return levels[0].clone();
    }

    let this_level = &levels[l as usize];
    let chosen = *this_level
        .iter()
        .max_by_key(|&&i| sstables[i].file_size())
        .expect("level selected for overflow must be non-empty");

    let chosen_min = &sstables[chosen].properties.min_key;
    let chosen_max = &sstables[chosen].properties.max_key;

    let mut selected = vec![chosen];
    if let Some(next_level) = levels.get(l as usize + 1) {
        for &i in next_level {
            let min_key = &sstables[i].properties.min_key;
            let max_key = &sstables[i].properties.max_key;
            if ranges_overlap(chosen_min, chosen_max, min_key, max_key) {
                selected.push(i);
            }
        }
    }

    selected
}

// ------------------------------------------------------------------------------------------------
// Minor (level promotion)
// ------------------------------------------------------------------------------------------------

/// Leveled compaction's incremental step: promote one overflowing level
/// into the next.
pub struct LeveledCompaction;

impl CompactionStrategy for LeveledCompaction {
    fn compact(
        &self,
        sstables: &[Arc<SSTable>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        if sstables.is_empty() {
            return Ok(None);
        }

        let levels = group_by_level(sstables, config);
        let overflowing = match pick_overflowing_level(&levels, sstables, config) {
            Some(l) => l,
            None => {
                debug!(sstable_count = sstables.len(), "leveled compaction: no level over budget");
                return Ok(None);
            }
        };

        let selected_indices = select_for_level(overflowing, &levels, sstables);
        let deepest = config.level_count.saturating_sub(1);
        let output_level = (overflowing + 1).min(deepest);

        let selected_ssts: Vec<&SSTable> = selected_indices.iter().map(|&i| sstables[i].as_ref()).collect();
        let removed_ids: Vec<u64> = selected_ssts.iter().map(|s| s.id()).collect();

        info!(
            level = overflowing,
            output_level,
            selected_count = selected_ssts.len(),
            ?removed_ids,
            "leveled compaction: promoting overflowing level"
        );

        let iters = full_range_scan_iters(&selected_ssts)?;
        let merge_iter = MergeIterator::new(iters);
        let (point_entries, range_tombstones) = dedup_records(merge_iter);

        let result = finalize_compaction_at_level(
            manifest,
            data_dir,
            removed_ids,
            point_entries,
            range_tombstones,
            output_level,
            config.bloom_fp_rate,
        )?;

        Ok(Some(result))
    }
}

// ------------------------------------------------------------------------------------------------
// Major (full merge into the deepest level)
// ------------------------------------------------------------------------------------------------

/// Leveled major compaction: a user-triggered full merge of every SSTable
/// regardless of level, landing in the deepest configured level. Mirrors
/// size-tiered major compaction's tombstone handling.
pub struct LeveledMajorCompaction;

impl CompactionStrategy for LeveledMajorCompaction {
    fn compact(
        &self,
        sstables: &[Arc<SSTable>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        if sstables.len() < 2 {
            debug!(sstable_count = sstables.len(), "leveled major compaction: fewer than 2 SSTables, skipping");
            return Ok(None);
        }

        let sst_refs: Vec<&SSTable> = sstables.iter().map(|s| s.as_ref()).collect();
        let removed_ids: Vec<u64> = sstables.iter().map(|s| s.id()).collect();
        let deepest = config.level_count.saturating_sub(1);

        info!(sstable_count = sstables.len(), ?removed_ids, deepest, "leveled major compaction: starting full merge");

        let mut all_range_tombstones: Vec<RangeTombstone> = Vec::new();
        for sst in sstables {
            all_range_tombstones.extend(sst.range_tombstone_iter());
        }

        let iters = full_range_scan_iters(&sst_refs)?;
        let merge_iter = MergeIterator::new(iters);

        let mut point_entries: Vec<PointEntry> = Vec::new();
        let mut last_key: Option<Vec<u8>> = None;

        for record in merge_iter {
            match record {
                Record::RangeDelete { .. } => {}
                Record::Delete { key, lsn, .. } => {
                    if last_key.as_ref() == Some(&key) {
                        continue;
                    }
                    last_key = Some(key.clone());
                    trace!(key = ?key, lsn, "leveled major: dropping point tombstone");
                }
                Record::Put { key, value, lsn, timestamp } => {
                    if last_key.as_ref() == Some(&key) {
                        continue;
                    }
                    last_key = Some(key.clone());

                    if is_suppressed_by_range(&key, lsn, &all_range_tombstones) {
                        trace!(key = ?key, lsn, "leveled major: Put suppressed by range tombstone");
                        continue;
                    }

                    point_entries.push(PointEntry { key, value: Some(value), lsn, timestamp });
                }
            }
        }

        let result = finalize_compaction_at_level(
            manifest,
            data_dir,
            removed_ids,
            point_entries,
            Vec::new(),
            deepest,
            config.bloom_fp_rate,
        )?;

        info!(new_sst_id = ?result.new_sst_id, "leveled major compaction: complete");

        Ok(Some(result))
    }
}

fn is_suppressed_by_range(key: &[u8], put_lsn: u64, range_tombstones: &[RangeTombstone]) -> bool {
    for rt in range_tombstones {
        if key >= rt.start.as_slice() && key < rt.end.as_slice() && rt.lsn > put_lsn {
            return true;
        }
    }
    false
}
