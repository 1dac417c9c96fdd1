//! Merge-on-write engine.
//!
//! This module contains the core write implementation for `FactorTable`:
//! - validating the incoming block against its own declared axes,
//! - computing the sorted union of stored and incoming axes,
//! - choosing between the in-place path (a pure overwrite inside the
//!   committed domain) and the reindexing path (any change to the axes or
//!   the factor list lays every factor's chunks out afresh under the next
//!   generation),
//! - committing the widened axis snapshot only after all chunk writes for
//!   the call have succeeded.
//!
//! Crash ordering: chunks first, snapshot second. On reopen the committed
//! snapshot is trusted; chunks written ahead of a commit that never happened
//! are invisible (they live in a generation, or belong to a factor, that no
//! snapshot references), and a chunk missing behind a committed snapshot
//! reads as missing values. Because an interrupted write can leave such
//! chunks behind, every domain-changing write rebuilds from the *committed*
//! state only: the target generation is cleared before reindexing into it,
//! a factor not in the committed list has its leftover chunks deleted before
//! its first legitimate cells are written, and the reindex copies nothing
//! beyond the committed axis bounds. Keep new write-time invariants here so
//! the flow stays centralized.

use log::warn;
use snafu::prelude::*;
use std::collections::BTreeMap;

use crate::{
    axes::{AxesSnapshot, merge_axis, positions_shifted, sorted_axis},
    block::DataBlock,
    chunk::{CHUNK_COLS, CHUNK_ROWS, ChunkBlock, ChunkCoord, chunk_of},
    error::{NameConflictSnafu, SnapshotSnafu, StoreError, UnknownTableSnafu},
    names::validate_component_name,
    table::FactorTable,
};

/// How a write interacts with existing table state.
///
/// `Update` and `Append` run the same union-of-axes merge with
/// overwrite-on-overlap; the distinction is caller convention (revising
/// history vs. extending forward in time), not a difference in outcome.
/// Only `Create` changes behavior: it requires a table with no committed
/// snapshot and sets the axes to exactly the block's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// First write: the table must not already exist.
    Create,
    /// Merge into an existing table, revising overlapping coordinates.
    Update,
    /// Merge into an existing table, extending the stored domain.
    Append,
}

impl FactorTable {
    /// Apply `block` to the table under `mode`.
    ///
    /// The call either fully applies its merge or fails before committing
    /// any visible metadata state; there is no partial-success return.
    pub async fn write_data(
        &mut self,
        block: &DataBlock,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        for factor in block.factors() {
            validate_component_name(factor)?;
        }

        match mode {
            WriteMode::Create => self.write_create(block).await,
            WriteMode::Update | WriteMode::Append => self.write_merge(block).await,
        }
    }

    /// Create path: the block's axes become the table's axes verbatim
    /// (stored sorted), under generation 1.
    async fn write_create(&mut self, block: &DataBlock) -> Result<(), StoreError> {
        if self.version != 0 {
            return NameConflictSnafu {
                name: self.name.clone(),
            }
            .fail();
        }

        let (dts, row_map) = sorted_axis(block.dts());
        let (ids, col_map) = sorted_axis(block.ids());

        let snapshot = AxesSnapshot {
            ids,
            dts,
            factors: block.factors().to_vec(),
            generation: 1,
            ..AxesSnapshot::empty()
        };

        // An earlier create that died before its commit may have left chunks
        // behind; nothing committed exists yet, so clear wholesale.
        for factor in block.factors() {
            self.chunks.delete_factor(factor).await?;
        }

        for factor_index in 0..block.factors().len() {
            self.apply_block_factor(block, factor_index, 1, &row_map, &col_map)
                .await?;
        }

        self.version = self
            .snapshots
            .commit_with_expected_version(0, &snapshot)
            .await
            .context(SnapshotSnafu)?;
        self.state = snapshot;
        Ok(())
    }

    /// Update/append path: union the axes, then merge the block in.
    async fn write_merge(&mut self, block: &DataBlock) -> Result<(), StoreError> {
        if self.version == 0 {
            return UnknownTableSnafu {
                table: self.name.clone(),
            }
            .fail();
        }

        let (new_dts, old_row_map, in_row_map) = merge_axis(&self.state.dts, block.dts());
        let (new_ids, old_col_map, in_col_map) = merge_axis(&self.state.ids, block.ids());

        // Canonical order: existing factors keep their positions, new ones
        // are appended in block order.
        let mut factors = self.state.factors.clone();
        let mut added_factors: Vec<String> = Vec::new();
        for factor in block.factors() {
            if !factors.contains(factor) {
                factors.push(factor.clone());
                added_factors.push(factor.clone());
            }
        }

        let domain_changed = new_dts.len() != self.state.dts.len()
            || new_ids.len() != self.state.ids.len()
            || !added_factors.is_empty()
            || positions_shifted(&old_row_map)
            || positions_shifted(&old_col_map);

        if !domain_changed {
            // Pure overwrite inside the committed domain: chunks are updated
            // in place and no snapshot commit is needed. Leftovers of an
            // interrupted write sit outside the domain and stay unreadable.
            for factor_index in 0..block.factors().len() {
                self.apply_block_factor(
                    block,
                    factor_index,
                    self.state.generation,
                    &in_row_map,
                    &in_col_map,
                )
                .await?;
            }
            return Ok(());
        }

        // Any domain change rebuilds the layout under the next generation,
        // from committed chunks only. Clearing the target generation (and
        // the whole directory of a not-yet-committed factor) first keeps
        // cells persisted by an interrupted earlier write from surfacing
        // once the widened domain commits.
        let generation = self.state.generation + 1;
        for factor in &self.state.factors.clone() {
            self.chunks.delete_generation(factor, generation).await?;
            self.reindex_factor(
                factor,
                self.state.generation,
                generation,
                &old_row_map,
                &old_col_map,
            )
            .await?;
        }
        for factor in &added_factors {
            self.chunks.delete_factor(factor).await?;
        }

        for factor_index in 0..block.factors().len() {
            self.apply_block_factor(block, factor_index, generation, &in_row_map, &in_col_map)
                .await?;
        }

        let snapshot = AxesSnapshot {
            format_version: self.state.format_version,
            created_at: self.state.created_at,
            ids: new_ids,
            dts: new_dts,
            factors,
            generation,
        };
        self.version = self
            .snapshots
            .commit_with_expected_version(self.version, &snapshot)
            .await
            .context(SnapshotSnafu)?;
        self.state = snapshot;

        self.sweep_stale_generations().await;
        Ok(())
    }

    /// Merge one factor's slice of `block` into the chunks of `generation`.
    ///
    /// `row_map`/`col_map` translate block positions to logical axis
    /// positions. Each touched chunk is read-modified-written once; chunks
    /// that end up all-missing are not written.
    async fn apply_block_factor(
        &self,
        block: &DataBlock,
        factor_index: usize,
        generation: u64,
        row_map: &[usize],
        col_map: &[usize],
    ) -> Result<(), StoreError> {
        let factor = &block.factors()[factor_index];

        let mut per_chunk: BTreeMap<ChunkCoord, Vec<(usize, usize, f64)>> = BTreeMap::new();
        for (ti, &row) in row_map.iter().enumerate() {
            for (ii, &col) in col_map.iter().enumerate() {
                let (coord, local_row, local_col) = chunk_of(row, col);
                per_chunk.entry(coord).or_default().push((
                    local_row,
                    local_col,
                    block.get(factor_index, ti, ii),
                ));
            }
        }

        for (coord, cells) in per_chunk {
            let mut chunk = self
                .chunks
                .read_chunk(factor, generation, coord)
                .await?
                .unwrap_or_else(ChunkBlock::new_missing);
            for (local_row, local_col, value) in cells {
                chunk.set(local_row, local_col, value);
            }
            if !chunk.is_all_missing() {
                self.chunks
                    .write_chunk(factor, generation, coord, &chunk)
                    .await?;
            }
        }
        Ok(())
    }

    /// Relocate one factor's populated cells from `old_generation` onto the
    /// merged axes under `new_generation`.
    ///
    /// Only cells inside the committed axis bounds are copied; anything a
    /// dead write left beyond them is dropped here.
    ///
    /// Old chunks are streamed one at a time; the new-generation buffers are
    /// bounded by the chunks this factor actually populates.
    async fn reindex_factor(
        &self,
        factor: &str,
        old_generation: u64,
        new_generation: u64,
        old_row_map: &[usize],
        old_col_map: &[usize],
    ) -> Result<(), StoreError> {
        let coords = self.chunks.list_chunks(factor, old_generation).await?;

        let mut buffers: BTreeMap<ChunkCoord, ChunkBlock> = BTreeMap::new();
        for coord in coords {
            let Some(old_chunk) = self
                .chunks
                .read_chunk(factor, old_generation, coord)
                .await?
            else {
                continue;
            };

            for local_row in 0..CHUNK_ROWS {
                let old_row = coord.row as usize * CHUNK_ROWS + local_row;
                if old_row >= old_row_map.len() {
                    break;
                }
                let new_row = old_row_map[old_row];

                for local_col in 0..CHUNK_COLS {
                    let value = old_chunk.get(local_row, local_col);
                    if value.is_nan() {
                        continue;
                    }
                    let old_col = coord.col as usize * CHUNK_COLS + local_col;
                    if old_col >= old_col_map.len() {
                        continue;
                    }
                    let new_col = old_col_map[old_col];

                    let (new_coord, nr, nc) = chunk_of(new_row, new_col);
                    buffers
                        .entry(new_coord)
                        .or_insert_with(ChunkBlock::new_missing)
                        .set(nr, nc, value);
                }
            }
        }

        for (coord, buffer) in &buffers {
            if !buffer.is_all_missing() {
                self.chunks
                    .write_chunk(factor, new_generation, *coord, buffer)
                    .await?;
            }
        }
        Ok(())
    }

    /// Best-effort removal of chunk generations the committed snapshot no
    /// longer references. Failures only cost disk space, so they are logged
    /// and ignored; the next domain-changing write sweeps again.
    async fn sweep_stale_generations(&self) {
        let factors = match self.chunks.list_factors().await {
            Ok(factors) => factors,
            Err(e) => {
                warn!("stale generation sweep skipped for table {}: {e}", self.name);
                return;
            }
        };

        for factor in factors {
            let generations = match self.chunks.list_generations(&factor).await {
                Ok(generations) => generations,
                Err(e) => {
                    warn!("cannot list generations of factor {factor}: {e}");
                    continue;
                }
            };
            for generation in generations {
                if generation != self.state.generation {
                    if let Err(e) = self.chunks.delete_generation(&factor, generation).await {
                        warn!("cannot delete stale generation {generation} of {factor}: {e}");
                    }
                }
            }
        }
    }
}
