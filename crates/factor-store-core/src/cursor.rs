//! Temporal cursor: stepwise reads along a run's date-time axis.
//!
//! A [`TemporalCursor`] serves the simulation-driver access pattern: the
//! driver walks its own date-time axis in ascending order and at each step
//! reads a single date-time slice of the table. The cursor exploits that
//! pattern by caching the chunk-row band containing the current date-time,
//! so consecutive steps inside one band reuse loaded chunks instead of
//! touching storage again.
//!
//! The cursor borrows the table, so the table cannot be written to while a
//! run is in progress; ending the run (or dropping the cursor) releases the
//! borrow. Moving backwards is permitted but defeats the cache, so it is
//! logged as a warning.

use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashMap;

use crate::{
    block::DataBlock,
    chunk::{CHUNK_ROWS, ChunkBlock, ChunkCoord, chunk_of},
    error::{AxisMismatchSnafu, CursorNotPositionedSnafu, StoreError, UnknownFactorSnafu},
    table::FactorTable,
};

/// A positioned read cursor over one table, bound to a run's date-time axis.
pub struct TemporalCursor<'t> {
    table: &'t FactorTable,
    run_dts: Vec<DateTime<Utc>>,
    /// Index of the current date-time on `run_dts`; `None` before the first
    /// move.
    current: Option<usize>,
    /// Chunk-row band of the current date-time on the stored axis; `None`
    /// when the current date-time is off the stored axis.
    band: Option<u64>,
    /// Chunks loaded for the current band, negative results included.
    cache: HashMap<(String, ChunkCoord), Option<ChunkBlock>>,
}

impl<'t> TemporalCursor<'t> {
    pub(crate) fn start(table: &'t FactorTable, run_dts: &[DateTime<Utc>]) -> Self {
        Self {
            table,
            run_dts: run_dts.to_vec(),
            current: None,
            band: None,
            cache: HashMap::new(),
        }
    }

    /// The run's date-time axis this cursor was started with.
    pub fn run_date_times(&self) -> &[DateTime<Utc>] {
        &self.run_dts
    }

    /// The date-time the cursor currently points at, if any move happened.
    pub fn current(&self) -> Option<&DateTime<Utc>> {
        self.current.map(|i| &self.run_dts[i])
    }

    /// Position the cursor on `dt`.
    ///
    /// `dt` must be on the run's date-time axis; a date-time outside the run
    /// fails with [`StoreError::AxisMismatch`]. The date-time need not be on
    /// the table's stored axis; reads at such a position yield all-missing
    /// slices.
    pub fn move_to(&mut self, dt: &DateTime<Utc>) -> Result<(), StoreError> {
        let Some(index) = self.run_dts.iter().position(|d| d == dt) else {
            return AxisMismatchSnafu {
                reason: format!("date-time {dt} is not on the cursor's run axis"),
            }
            .fail();
        };

        if let Some(previous) = self.current {
            if index < previous {
                warn!(
                    "cursor on table {} moved backwards from {} to {dt}",
                    self.table.name(),
                    self.run_dts[previous]
                );
            }
        }

        let band = self
            .table
            .date_times()
            .binary_search(dt)
            .ok()
            .map(|row| (row / CHUNK_ROWS) as u64);
        if band != self.band {
            self.cache.clear();
            self.band = band;
        }
        self.current = Some(index);
        Ok(())
    }

    /// Read the one-date-time slice at the current position.
    ///
    /// Fails with [`StoreError::CursorNotPositioned`] before the first
    /// `move_to`. Identifiers off the stored axis read as NaN; an unknown
    /// factor is an error, exactly as in [`FactorTable::read_data`].
    pub async fn read_current(
        &mut self,
        factors: &[String],
        ids: &[String],
    ) -> Result<DataBlock, StoreError> {
        let Some(index) = self.current else {
            return CursorNotPositionedSnafu.fail();
        };
        for factor in factors {
            if !self.table.factor_names().contains(factor) {
                return UnknownFactorSnafu { factor }.fail();
            }
        }

        let dt = self.run_dts[index];
        let mut slice =
            DataBlock::filled(factors.to_vec(), vec![dt], ids.to_vec(), f64::NAN);

        let Some(row) = self.table.date_times().binary_search(&dt).ok() else {
            return Ok(slice);
        };

        let col_positions = FactorTable::axis_positions(self.table.ids(), ids);
        let generation = self.table.generation();
        for (fi, factor) in factors.iter().enumerate() {
            for (ii, col) in col_positions.iter().enumerate() {
                let Some(col) = col else { continue };
                let (coord, local_row, local_col) = chunk_of(row, *col);

                let key = (factor.clone(), coord);
                if !self.cache.contains_key(&key) {
                    let chunk = self
                        .table
                        .chunk_store()
                        .read_chunk(factor, generation, coord)
                        .await?;
                    self.cache.insert(key.clone(), chunk);
                }
                if let Some(Some(chunk)) = self.cache.get(&key) {
                    slice.set(fi, 0, ii, chunk.get(local_row, local_col));
                }
            }
        }

        Ok(slice)
    }

    /// End the run, releasing the borrow on the table.
    pub fn end(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::TableLocation,
        table::{FactorTable, WriteMode},
    };
    use chrono::TimeZone;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, d, 0, 0, 0)
            .single()
            .expect("valid UTC timestamp")
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn seeded_table(tmp: &TempDir) -> Result<FactorTable, StoreError> {
        let mut table =
            FactorTable::open("t".to_string(), TableLocation::local(tmp.path().join("t"))).await?;
        let block = DataBlock::new(
            names(&["f0"]),
            vec![day(1), day(2)],
            names(&["a", "b"]),
            vec![1.0, 2.0, 3.0, 4.0],
        )?;
        table.write_data(&block, WriteMode::Create).await?;
        Ok(table)
    }

    #[tokio::test]
    async fn read_before_move_is_an_error() -> TestResult {
        let tmp = TempDir::new()?;
        let table = seeded_table(&tmp).await?;

        let mut cursor = table.start_cursor(&[day(1), day(2)]);
        let err = cursor
            .read_current(&names(&["f0"]), &names(&["a"]))
            .await
            .expect_err("expected CursorNotPositioned");
        assert!(matches!(err, StoreError::CursorNotPositioned { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn cursor_walks_the_run_axis() -> TestResult {
        let tmp = TempDir::new()?;
        let table = seeded_table(&tmp).await?;

        let mut cursor = table.start_cursor(&[day(1), day(2), day(3)]);

        cursor.move_to(&day(1))?;
        let slice = cursor.read_current(&names(&["f0"]), &names(&["a", "b"])).await?;
        assert_eq!(slice.value("f0", &day(1), "a"), Some(1.0));
        assert_eq!(slice.value("f0", &day(1), "b"), Some(2.0));

        cursor.move_to(&day(2))?;
        let slice = cursor.read_current(&names(&["f0"]), &names(&["a"])).await?;
        assert_eq!(slice.value("f0", &day(2), "a"), Some(3.0));

        // Off the stored axis but on the run axis: an all-missing slice.
        cursor.move_to(&day(3))?;
        let slice = cursor.read_current(&names(&["f0"]), &names(&["a"])).await?;
        assert!(slice.value("f0", &day(3), "a").is_some_and(f64::is_nan));

        cursor.end();
        Ok(())
    }

    #[tokio::test]
    async fn move_off_the_run_axis_is_an_error() -> TestResult {
        let tmp = TempDir::new()?;
        let table = seeded_table(&tmp).await?;

        let mut cursor = table.start_cursor(&[day(1), day(2)]);
        let err = cursor.move_to(&day(9)).expect_err("expected AxisMismatch");
        assert!(matches!(err, StoreError::AxisMismatch { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_factor_fails_at_read() -> TestResult {
        let tmp = TempDir::new()?;
        let table = seeded_table(&tmp).await?;

        let mut cursor = table.start_cursor(&[day(1)]);
        cursor.move_to(&day(1))?;
        let err = cursor
            .read_current(&names(&["nope"]), &names(&["a"]))
            .await
            .expect_err("expected UnknownFactor");
        assert!(matches!(err, StoreError::UnknownFactor { .. }));
        Ok(())
    }
}
