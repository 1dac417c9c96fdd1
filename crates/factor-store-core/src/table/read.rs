//! Dense reads over sparsely populated chunks.
//!
//! The read path translates each requested (factor, date-time, identifier)
//! triple into a chunk coordinate plus a local cell, loads every touched
//! chunk exactly once, and scatters the values into a NaN-prefilled cube.
//! Requested entries outside the current axes stay NaN; only a factor name
//! the table does not know is an error.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::{
    block::DataBlock,
    chunk::{ChunkCoord, chunk_of},
    error::{StoreError, UnknownFactorSnafu},
    table::FactorTable,
};

impl FactorTable {
    /// Read the dense `[factors][dts][ids]` cube for the requested selection.
    ///
    /// Every triple never covered by a prior write resolves to NaN.
    /// Identifiers and date-times outside the stored axes are permitted and
    /// yield NaN; a factor not present in the table fails with
    /// [`StoreError::UnknownFactor`].
    pub async fn read_data(
        &self,
        factors: &[String],
        dts: &[DateTime<Utc>],
        ids: &[String],
    ) -> Result<DataBlock, StoreError> {
        for factor in factors {
            if !self.state.factors.contains(factor) {
                return UnknownFactorSnafu { factor }.fail();
            }
        }

        let mut cube = DataBlock::filled(
            factors.to_vec(),
            dts.to_vec(),
            ids.to_vec(),
            f64::NAN,
        );

        let row_positions = Self::axis_positions(&self.state.dts, dts);
        let col_positions = Self::axis_positions(&self.state.ids, ids);

        // Cells grouped by the chunk that holds them, so each chunk is
        // fetched once per factor: coord -> [(dt index, id index, local row,
        // local col)].
        let mut wanted: BTreeMap<ChunkCoord, Vec<(usize, usize, usize, usize)>> = BTreeMap::new();
        for (ti, row) in row_positions.iter().enumerate() {
            let Some(row) = row else { continue };
            for (ii, col) in col_positions.iter().enumerate() {
                let Some(col) = col else { continue };
                let (coord, local_row, local_col) = chunk_of(*row, *col);
                wanted
                    .entry(coord)
                    .or_default()
                    .push((ti, ii, local_row, local_col));
            }
        }

        let generation = self.state.generation;
        for (fi, factor) in factors.iter().enumerate() {
            for (coord, cells) in &wanted {
                let Some(chunk) = self.chunks.read_chunk(factor, generation, *coord).await? else {
                    continue;
                };
                for &(ti, ii, local_row, local_col) in cells {
                    cube.set(fi, ti, ii, chunk.get(local_row, local_col));
                }
            }
        }

        Ok(cube)
    }
}
