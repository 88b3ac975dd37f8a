//! WAL group-commit sync-mode tests.
//!
//! These tests verify the `fsync` deferral behavior of [`WalSyncMode::Group`]
//! and [`WalSyncMode::Async`]: appends still replay correctly regardless of
//! when the underlying file is actually synced, the group's time deadline
//! forces a sync even when the count threshold hasn't been reached, and
//! `rotate_next()` carries the configured sync mode into the new segment.
//!
//! Coverage:
//! - `Group` mode batches appends up to `group_size` without losing data
//! - `Group` mode's `max_interval` deadline forces a sync independent of count
//! - `Async` mode relies on an explicit `flush()` call
//! - `rotate_next()` preserves the WAL's sync mode across segments
//!
//! ## See also
//! - [`tests_basic`] — basic append / replay / truncate cycle
//! - [`tests_rotation`] — file rotation and sequence validation

#[cfg(test)]
mod tests {
    use crate::wal::tests::helpers::*;
    use crate::wal::{Wal, WalSyncMode};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    // ----------------------------------------------------------------
    // Count-based batching
    // ----------------------------------------------------------------

    /// # Scenario
    /// `Group` mode with `group_size: 3` receives exactly 3 appends.
    ///
    /// # Expected behavior
    /// All 3 records replay correctly once the group threshold is hit,
    /// regardless of the deferred `fsync`.
    #[test]
    fn group_mode_defers_sync_until_count_threshold() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal_group.bin");
        let wal = Wal::open_with_sync_mode(
            path.to_str().unwrap(),
            None,
            WalSyncMode::Group {
                group_size: 3,
                max_interval: Duration::from_secs(3600),
            },
        )
        .unwrap();

        let records: Vec<ManifestRecord> = (0..3)
            .map(|i| ManifestRecord {
                id: i,
                path: format!("sst-{i}"),
                creation_timestamp: i,
            })
            .collect();

        for record in &records {
            wal.append(record).unwrap();
        }

        let replayed = collect_iter(&wal).unwrap();
        assert_eq!(records, replayed);
    }

    // ----------------------------------------------------------------
    // Time-based deadline
    // ----------------------------------------------------------------

    /// # Scenario
    /// `Group` mode's count threshold is far from reached, but
    /// `max_interval` has elapsed since the last sync.
    ///
    /// # Expected behavior
    /// The next append still triggers a sync, and both records replay.
    #[test]
    fn group_mode_flushes_on_time_deadline() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal_group_timer.bin");
        let wal = Wal::open_with_sync_mode(
            path.to_str().unwrap(),
            None,
            WalSyncMode::Group {
                group_size: 10_000,
                max_interval: Duration::from_millis(20),
            },
        )
        .unwrap();

        let record = ManifestRecord {
            id: 1,
            path: "sst-1".into(),
            creation_timestamp: 1,
        };
        wal.append(&record).unwrap();

        thread::sleep(Duration::from_millis(40));
        wal.append(&record).unwrap();

        let replayed = collect_iter(&wal).unwrap();
        assert_eq!(vec![record.clone(), record], replayed);
    }

    // ----------------------------------------------------------------
    // Async mode
    // ----------------------------------------------------------------

    /// # Scenario
    /// `Async` mode never syncs on append.
    ///
    /// # Expected behavior
    /// An explicit `flush()` still makes the record durable and replayable.
    #[test]
    fn async_mode_relies_on_explicit_flush() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal_async.bin");
        let wal =
            Wal::open_with_sync_mode(path.to_str().unwrap(), None, WalSyncMode::Async).unwrap();

        let record = ManifestRecord {
            id: 7,
            path: "sst-7".into(),
            creation_timestamp: 7,
        };
        wal.append(&record).unwrap();
        wal.flush().unwrap();

        let replayed = collect_iter(&wal).unwrap();
        assert_eq!(vec![record], replayed);
    }

    // ----------------------------------------------------------------
    // Rotation
    // ----------------------------------------------------------------

    /// # Scenario
    /// A WAL opened with `Group` mode is rotated via `rotate_next()`.
    ///
    /// # Expected behavior
    /// The freshly rotated segment keeps the same `WalSyncMode`, instead
    /// of silently resetting to `Sync`.
    #[test]
    fn rotate_next_preserves_configured_sync_mode() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal_rotate.bin");
        let mut wal = Wal::open_with_sync_mode(
            path.to_str().unwrap(),
            None,
            WalSyncMode::Group {
                group_size: 5,
                max_interval: Duration::from_secs(1),
            },
        )
        .unwrap();

        wal.rotate_next().unwrap();

        assert_eq!(
            wal.sync_mode(),
            WalSyncMode::Group {
                group_size: 5,
                max_interval: Duration::from_secs(1),
            }
        );
    }
}
