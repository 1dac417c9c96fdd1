//! Factor table: the logical view over one named group of factors sharing
//! an identifier axis and a date-time axis.
//!
//! A [`FactorTable`] owns its axis state (loaded from the latest committed
//! [`crate::axes::AxesSnapshot`]) and delegates physical access to the
//! [`crate::chunk::ChunkStore`]. Reads present a dense logical view (every
//! (factor, date-time, identifier) coordinate of the current domain
//! resolves to a value or the NaN missing sentinel) regardless of how
//! sparsely the chunks are populated. Writes run the merge-on-write engine
//! in the `write` submodule; schema mutations live in `alter`.
//!
//! Handles are obtained through the catalog ([`crate::catalog::FactorDb`]),
//! which owns table existence and naming. One handle is one writer: mutating
//! operations take `&mut self` and the caller is responsible for not opening
//! two writing handles onto the same table.

mod alter;
mod read;
mod write;

use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    axes::{AxesSnapshot, SnapshotStore},
    chunk::ChunkStore,
    cursor::TemporalCursor,
    error::{SnapshotSnafu, StoreError},
    storage::TableLocation,
};

pub use write::WriteMode;

/// A handle onto one factor table.
#[derive(Debug)]
pub struct FactorTable {
    name: String,
    snapshots: SnapshotStore,
    chunks: ChunkStore,
    /// Latest committed snapshot version; 0 for an uncommitted table.
    version: u64,
    state: AxesSnapshot,
}

impl FactorTable {
    /// Open the table at `location`, loading its committed axis state.
    ///
    /// An uncommitted table (no snapshot yet) opens with empty axes and
    /// version 0; the catalog decides whether that is an error
    /// (`get_table`) or the expected starting point (`create_table`).
    pub(crate) async fn open(name: String, location: TableLocation) -> Result<Self, StoreError> {
        let snapshots = SnapshotStore::new(location.clone());
        let chunks = ChunkStore::new(location);

        let version = snapshots.load_current_version().await.context(SnapshotSnafu)?;
        let state = if version == 0 {
            AxesSnapshot::empty()
        } else {
            snapshots.load_snapshot(version).await.context(SnapshotSnafu)?
        };

        Ok(Self {
            name,
            snapshots,
            chunks,
            version,
            state,
        })
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Factor names in canonical order, stable across reads and reloads.
    pub fn factor_names(&self) -> &[String] {
        &self.state.factors
    }

    /// The identifier axis, ascending.
    pub fn ids(&self) -> &[String] {
        &self.state.ids
    }

    /// The date-time axis, ascending.
    pub fn date_times(&self) -> &[DateTime<Utc>] {
        &self.state.dts
    }

    /// Whether the table has a committed snapshot.
    pub fn is_committed(&self) -> bool {
        self.version != 0
    }

    /// The committed snapshot version this handle reflects.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Begin a temporal cursor run over `run_dts` (the driver's time axis,
    /// which may be any subset or superset of the stored axis).
    pub fn start_cursor(&self, run_dts: &[DateTime<Utc>]) -> TemporalCursor<'_> {
        TemporalCursor::start(self, run_dts)
    }

    pub(crate) fn chunk_store(&self) -> &ChunkStore {
        &self.chunks
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.generation
    }

    /// Positions of `requested` entries on a sorted axis; `None` for entries
    /// outside the axis (which read as missing, never as an error).
    pub(crate) fn axis_positions<T: Ord>(axis: &[T], requested: &[T]) -> Vec<Option<usize>> {
        requested
            .iter()
            .map(|item| axis.binary_search(item).ok())
            .collect()
    }
}
