//! Axis metadata snapshots and the versioned snapshot store.
//!
//! Every factor table persists its axis state (identifier axis, date-time
//! axis, factor name list, and the current chunk layout generation) as a
//! JSON document under `_factor_meta/`:
//!
//! ```text
//! table_root/
//!   _factor_meta/
//!     CURRENT            # latest committed snapshot version (e.g. "3\n")
//!     0000000001.json    # AxesSnapshot version 1
//!     0000000002.json    # AxesSnapshot version 2
//! ```
//!
//! Snapshot files are written with create-new semantics (one file per
//! version, never rewritten) and `CURRENT` is replaced atomically, so the
//! committed axis state flips in a single step. A missing `CURRENT` means
//! version `0`: the table has no committed presence yet. Readers trust the
//! snapshot `CURRENT` points at; chunks written ahead of a commit that never
//! happened are invisible, and chunks missing behind a committed snapshot
//! read as missing values.
//!
//! The snapshot is a full replacement document rather than an action log:
//! the axes are small compared to the chunk data, and any write that shifts
//! axis positions rewrites the chunk layout anyway.
//!
//! This module also owns the pure axis-merge helpers used by the write path:
//! computing the sorted union of an existing axis with an incoming one and
//! the position maps that drive chunk reindexing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};
use std::path::PathBuf;

use crate::storage::{self, StorageError, TableLocation};

/// Current axis snapshot / on-disk metadata format version.
///
/// Bumped only on a breaking change to the JSON layout.
pub const AXES_FORMAT_VERSION: u32 = 1;

/// The committed axis state of one factor table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AxesSnapshot {
    /// On-disk format version, for future evolution.
    pub format_version: u32,

    /// Creation timestamp of the table, preserved across commits.
    pub created_at: DateTime<Utc>,

    /// Identifier axis: strictly ascending union of all written identifiers.
    pub ids: Vec<String>,

    /// Date-time axis: strictly ascending union of all written date-times.
    pub dts: Vec<DateTime<Utc>>,

    /// Factor names in canonical order (creation order; renames keep the
    /// position, deletions remove the entry).
    pub factors: Vec<String>,

    /// Chunk layout generation the axes currently map onto.
    pub generation: u64,
}

impl AxesSnapshot {
    /// The state of a table that has never been committed.
    pub fn empty() -> Self {
        Self {
            format_version: AXES_FORMAT_VERSION,
            created_at: Utc::now(),
            ids: Vec::new(),
            dts: Vec::new(),
            factors: Vec::new(),
            generation: 0,
        }
    }
}

/// Errors raised while loading or committing axis snapshots.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SnapshotError {
    /// The expected snapshot version did not match the committed version.
    /// Under the single-writer model this indicates two handles writing the
    /// same table.
    #[snafu(display("Snapshot conflict: expected version {expected}, found {found}"))]
    Conflict {
        /// The version the writer expected to extend.
        expected: u64,
        /// The version actually committed.
        found: u64,
        /// The backtrace at the time the conflict was detected.
        backtrace: Backtrace,
    },

    /// The metadata on disk is structurally invalid (unparseable `CURRENT`
    /// or snapshot JSON, version counter overflow).
    #[snafu(display("Corrupt snapshot state: {msg}"))]
    CorruptState {
        /// Description of the invalid state.
        msg: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Storage failure while reading or writing metadata files.
    #[snafu(display("Snapshot storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },
}

/// Reader/writer for the versioned axis snapshots under a table root.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    location: TableLocation,
}

impl SnapshotStore {
    /// Name of the metadata subdirectory.
    pub const META_DIR_NAME: &str = "_factor_meta";
    /// Name of the file that stores the current version pointer.
    pub const CURRENT_FILE_NAME: &str = "CURRENT";
    /// Number of digits used in zero-padded snapshot file names.
    pub const SNAPSHOT_FILENAME_DIGITS: usize = 10;

    /// Create a snapshot store rooted at a table directory.
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    fn meta_rel_dir() -> PathBuf {
        PathBuf::from(Self::META_DIR_NAME)
    }

    /// Relative path of the `CURRENT` pointer under a table root.
    ///
    /// Exposed so the catalog can test for committed presence without
    /// duplicating the layout convention.
    pub fn current_rel_path() -> PathBuf {
        Self::meta_rel_dir().join(Self::CURRENT_FILE_NAME)
    }

    fn snapshot_rel_path(version: u64) -> PathBuf {
        let file_name = format!(
            "{:0width$}.json",
            version,
            width = Self::SNAPSHOT_FILENAME_DIGITS
        );
        Self::meta_rel_dir().join(file_name)
    }

    /// Load the current committed version.
    ///
    /// A missing `CURRENT` file is a fresh table and reads as version `0`.
    /// Empty or unparseable content is [`SnapshotError::CorruptState`].
    pub async fn load_current_version(&self) -> Result<u64, SnapshotError> {
        let rel = Self::current_rel_path();

        let contents = match storage::read_to_string(&self.location, &rel).await {
            Ok(s) => s,
            Err(StorageError::NotFound { .. }) => return Ok(0),
            Err(source) => return Err(SnapshotError::Storage { source }),
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return CorruptStateSnafu {
                msg: format!("CURRENT has empty content at {rel:?}"),
            }
            .fail();
        }
        trimmed.parse::<u64>().map_err(|e| SnapshotError::CorruptState {
            msg: format!("CURRENT has invalid content {trimmed:?}: {e}"),
            backtrace: Backtrace::capture(),
        })
    }

    /// Load the snapshot committed as `version`.
    pub async fn load_snapshot(&self, version: u64) -> Result<AxesSnapshot, SnapshotError> {
        let rel = Self::snapshot_rel_path(version);
        let json = storage::read_to_string(&self.location, &rel)
            .await
            .context(StorageSnafu)?;

        serde_json::from_str(&json).map_err(|e| SnapshotError::CorruptState {
            msg: format!("failed to parse snapshot {version}: {e}"),
            backtrace: Backtrace::capture(),
        })
    }

    /// Commit `snapshot` as the next version, guarded by `expected`.
    ///
    /// Steps:
    /// 1. Load `CURRENT`; mismatch with `expected` is a [`SnapshotError::Conflict`].
    /// 2. Serialize the snapshot and create `_factor_meta/<version>.json`
    ///    with create-new semantics, the atomic guard against a racing
    ///    writer committing the same version.
    /// 3. Atomically replace `CURRENT` with the new version.
    ///
    /// A crash after step 2 leaves an orphaned snapshot file that readers
    /// never look at; re-running the commit surfaces the orphan as
    /// `AlreadyExists` rather than silently diverging.
    pub async fn commit_with_expected_version(
        &self,
        expected: u64,
        snapshot: &AxesSnapshot,
    ) -> Result<u64, SnapshotError> {
        let current = self.load_current_version().await?;
        if current != expected {
            return ConflictSnafu {
                expected,
                found: current,
            }
            .fail();
        }

        let version = expected.checked_add(1).context(CorruptStateSnafu {
            msg: "version counter overflow".to_string(),
        })?;

        let json = serde_json::to_vec(snapshot).map_err(|e| SnapshotError::CorruptState {
            msg: format!("failed to serialize snapshot {version}: {e}"),
            backtrace: Backtrace::capture(),
        })?;

        let snapshot_rel = Self::snapshot_rel_path(version);
        storage::write_new(&self.location, &snapshot_rel, &json)
            .await
            .context(StorageSnafu)?;

        let current_contents = format!("{version}\n");
        storage::write_atomic(
            &self.location,
            &Self::current_rel_path(),
            current_contents.as_bytes(),
        )
        .await
        .context(StorageSnafu)?;

        Ok(version)
    }
}

/// Sorted union of an existing (already ascending) axis with an incoming one.
///
/// Returns the merged axis plus two position maps: `old_map[i]` is the merged
/// position of `existing[i]`, and `incoming_map[j]` is the merged position of
/// `incoming[j]`. Entries of `incoming` must be unique (the write block
/// guarantees this); duplicates against `existing` are unioned away.
pub fn merge_axis<T: Ord + Clone>(
    existing: &[T],
    incoming: &[T],
) -> (Vec<T>, Vec<usize>, Vec<usize>) {
    let mut merged: Vec<T> = existing.to_vec();
    for item in incoming {
        if existing.binary_search(item).is_err() {
            merged.push(item.clone());
        }
    }
    merged.sort();

    let position = |item: &T| -> usize {
        merged
            .binary_search(item)
            .expect("merged axis contains every input entry")
    };
    let old_map = existing.iter().map(&position).collect();
    let incoming_map = incoming.iter().map(&position).collect();
    (merged, old_map, incoming_map)
}

/// Whether a merge moved any existing axis entry to a new position.
///
/// True exactly when some incoming entry sorts before an existing one; the
/// write path then has to reindex every factor's chunks.
pub fn positions_shifted(old_map: &[usize]) -> bool {
    old_map.iter().enumerate().any(|(i, &pos)| i != pos)
}

/// Sort a unique axis request, returning the sorted axis and the map from
/// input position to sorted position. Used by create-mode writes, where the
/// block's axes become the table's axes verbatim but must be stored sorted.
pub fn sorted_axis<T: Ord + Clone>(items: &[T]) -> (Vec<T>, Vec<usize>) {
    let mut sorted = items.to_vec();
    sorted.sort();
    let map = items
        .iter()
        .map(|item| {
            sorted
                .binary_search(item)
                .expect("sorted axis contains every input entry")
        })
        .collect();
    (sorted, map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn create_test_snapshot_store() -> (TempDir, SnapshotStore) {
        let tmp = TempDir::new().expect("create temp dir");
        let store = SnapshotStore::new(TableLocation::local(tmp.path()));
        (tmp, store)
    }

    fn sample_snapshot() -> AxesSnapshot {
        AxesSnapshot {
            format_version: AXES_FORMAT_VERSION,
            created_at: Utc::now(),
            ids: vec!["000001.SZ".to_string(), "000002.SZ".to_string()],
            dts: vec![Utc::now()],
            factors: vec!["close".to_string()],
            generation: 1,
        }
    }

    // ==================== SnapshotStore tests ====================

    #[tokio::test]
    async fn fresh_directory_reads_as_version_zero() -> TestResult {
        let (_tmp, store) = create_test_snapshot_store();

        assert_eq!(store.load_current_version().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn commit_sequence_advances_current() -> TestResult {
        let (tmp, store) = create_test_snapshot_store();
        let snapshot = sample_snapshot();

        let v1 = store.commit_with_expected_version(0, &snapshot).await?;
        let v2 = store.commit_with_expected_version(1, &snapshot).await?;

        assert_eq!((v1, v2), (1, 2));
        assert_eq!(store.load_current_version().await?, 2);

        let commit_path = tmp
            .path()
            .join(SnapshotStore::META_DIR_NAME)
            .join("0000000002.json");
        assert!(commit_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn commit_with_stale_expected_version_conflicts() -> TestResult {
        let (_tmp, store) = create_test_snapshot_store();
        let snapshot = sample_snapshot();

        store.commit_with_expected_version(0, &snapshot).await?;
        let result = store.commit_with_expected_version(0, &snapshot).await;

        let err = result.expect_err("expected Conflict");
        match err {
            SnapshotError::Conflict {
                expected, found, ..
            } => {
                assert_eq!(expected, 0);
                assert_eq!(found, 1);
            }
            other => panic!("expected Conflict error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_json() -> TestResult {
        let (_tmp, store) = create_test_snapshot_store();
        let snapshot = sample_snapshot();

        store.commit_with_expected_version(0, &snapshot).await?;
        let loaded = store.load_snapshot(1).await?;

        assert_eq!(loaded, snapshot);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_current_content_is_reported() -> TestResult {
        let (tmp, store) = create_test_snapshot_store();

        let meta_dir = tmp.path().join(SnapshotStore::META_DIR_NAME);
        tokio::fs::create_dir_all(&meta_dir).await?;
        tokio::fs::write(meta_dir.join(SnapshotStore::CURRENT_FILE_NAME), "not-a-number").await?;

        let err = store
            .load_current_version()
            .await
            .expect_err("expected CorruptState");
        assert!(matches!(err, SnapshotError::CorruptState { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn empty_current_content_is_reported() -> TestResult {
        let (tmp, store) = create_test_snapshot_store();

        let meta_dir = tmp.path().join(SnapshotStore::META_DIR_NAME);
        tokio::fs::create_dir_all(&meta_dir).await?;
        tokio::fs::write(meta_dir.join(SnapshotStore::CURRENT_FILE_NAME), "").await?;

        let err = store
            .load_current_version()
            .await
            .expect_err("expected CorruptState");
        assert!(matches!(err, SnapshotError::CorruptState { .. }));
        Ok(())
    }

    // ==================== Axis merge tests ====================

    #[test]
    fn merge_axis_pure_extension_keeps_positions() {
        let existing = vec!["a", "b"];
        let incoming = vec!["c", "b"];

        let (merged, old_map, incoming_map) = merge_axis(&existing, &incoming);

        assert_eq!(merged, vec!["a", "b", "c"]);
        assert_eq!(old_map, vec![0, 1]);
        assert_eq!(incoming_map, vec![2, 1]);
        assert!(!positions_shifted(&old_map));
    }

    #[test]
    fn merge_axis_insertion_shifts_positions() {
        let existing = vec!["b", "d"];
        let incoming = vec!["a", "c"];

        let (merged, old_map, incoming_map) = merge_axis(&existing, &incoming);

        assert_eq!(merged, vec!["a", "b", "c", "d"]);
        assert_eq!(old_map, vec![1, 3]);
        assert_eq!(incoming_map, vec![0, 2]);
        assert!(positions_shifted(&old_map));
    }

    #[test]
    fn merge_axis_with_empty_existing() {
        let existing: Vec<&str> = Vec::new();
        let incoming = vec!["b", "a"];

        let (merged, old_map, incoming_map) = merge_axis(&existing, &incoming);

        assert_eq!(merged, vec!["a", "b"]);
        assert!(old_map.is_empty());
        assert_eq!(incoming_map, vec![1, 0]);
    }

    #[test]
    fn sorted_axis_tracks_input_positions() {
        let (sorted, map) = sorted_axis(&["c", "a", "b"]);

        assert_eq!(sorted, vec!["a", "b", "c"]);
        assert_eq!(map, vec![2, 0, 1]);
    }
}
