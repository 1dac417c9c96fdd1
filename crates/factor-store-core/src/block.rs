//! Dense factor × date-time × identifier value cubes.
//!
//! A [`DataBlock`] is the shape shared by write requests and read results:
//! a rectangular selection of factors, date-times, and identifiers with a
//! row-major `[factor][dt][id]` `f64` payload. The block owns the mapping
//! between axis entries and flat value positions: the index-translation
//! that lets the table layer present a dense logical view over sparsely
//! populated chunks. Cells with no recorded value are `f64::NAN`, never an
//! implicit zero.
//!
//! A block is ephemeral: it is consumed by the merge engine or returned from
//! a read, and is never persisted as an entity.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::error::{AxisMismatchSnafu, StoreError};

/// A dense cube of values over factors × date-times × identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    factors: Vec<String>,
    dts: Vec<DateTime<Utc>>,
    ids: Vec<String>,
    /// Row-major `[factor][dt][id]`.
    values: Vec<f64>,
}

fn ensure_unique<T: Ord>(items: &[T], axis: &str) -> Result<(), StoreError> {
    let distinct: BTreeSet<&T> = items.iter().collect();
    if distinct.len() != items.len() {
        return AxisMismatchSnafu {
            reason: format!("duplicate entries in the {axis} axis of the block"),
        }
        .fail();
    }
    Ok(())
}

impl DataBlock {
    /// Build a block from axes and a row-major `[factor][dt][id]` payload.
    ///
    /// Fails with [`StoreError::AxisMismatch`] when the payload length does
    /// not match the declared axes or an axis contains duplicates. Axis
    /// entries need not be sorted; values are addressed by input position.
    pub fn new(
        factors: Vec<String>,
        dts: Vec<DateTime<Utc>>,
        ids: Vec<String>,
        values: Vec<f64>,
    ) -> Result<Self, StoreError> {
        ensure_unique(&factors, "factor")?;
        ensure_unique(&dts, "date-time")?;
        ensure_unique(&ids, "identifier")?;

        let expected = factors.len() * dts.len() * ids.len();
        if values.len() != expected {
            return AxisMismatchSnafu {
                reason: format!(
                    "{} values do not fill factors({}) x dts({}) x ids({}) = {}",
                    values.len(),
                    factors.len(),
                    dts.len(),
                    ids.len(),
                    expected
                ),
            }
            .fail();
        }

        Ok(Self {
            factors,
            dts,
            ids,
            values,
        })
    }

    /// Build a block with every cell set to `fill`.
    ///
    /// Reads use this with `f64::NAN` so cells no chunk covers come back as
    /// missing. Duplicate axis entries are permitted here: a read request
    /// may name the same selection entry twice.
    pub fn filled(
        factors: Vec<String>,
        dts: Vec<DateTime<Utc>>,
        ids: Vec<String>,
        fill: f64,
    ) -> Self {
        let len = factors.len() * dts.len() * ids.len();
        Self {
            factors,
            dts,
            ids,
            values: vec![fill; len],
        }
    }

    /// The block's factor axis, in input order.
    pub fn factors(&self) -> &[String] {
        &self.factors
    }

    /// The block's date-time axis, in input order.
    pub fn dts(&self) -> &[DateTime<Utc>] {
        &self.dts
    }

    /// The block's identifier axis, in input order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The block shape as `(factors, dts, ids)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.factors.len(), self.dts.len(), self.ids.len())
    }

    fn index(&self, factor: usize, dt: usize, id: usize) -> usize {
        (factor * self.dts.len() + dt) * self.ids.len() + id
    }

    /// Value at positional coordinate `(factor, dt, id)`.
    pub fn get(&self, factor: usize, dt: usize, id: usize) -> f64 {
        self.values[self.index(factor, dt, id)]
    }

    /// Set the value at positional coordinate `(factor, dt, id)`.
    pub fn set(&mut self, factor: usize, dt: usize, id: usize, value: f64) {
        let index = self.index(factor, dt, id);
        self.values[index] = value;
    }

    /// Value addressed by axis entries instead of positions.
    ///
    /// `None` when any of the entries is not on the block's axes. Mostly a
    /// convenience for tests and callers inspecting read results.
    pub fn value(&self, factor: &str, dt: &DateTime<Utc>, id: &str) -> Option<f64> {
        let f = self.factors.iter().position(|x| x == factor)?;
        let t = self.dts.iter().position(|x| x == dt)?;
        let i = self.ids.iter().position(|x| x == id)?;
        Some(self.get(f, t, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, d, 0, 0, 0)
            .single()
            .expect("valid UTC timestamp")
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_validates_shape() {
        let err = DataBlock::new(names(&["f0"]), vec![day(1)], names(&["a", "b"]), vec![1.0])
            .expect_err("expected AxisMismatch");
        assert!(matches!(err, StoreError::AxisMismatch { .. }));
    }

    #[test]
    fn new_rejects_duplicate_axis_entries() {
        let err = DataBlock::new(
            names(&["f0"]),
            vec![day(1)],
            names(&["a", "a"]),
            vec![1.0, 2.0],
        )
        .expect_err("expected AxisMismatch");
        assert!(matches!(err, StoreError::AxisMismatch { .. }));
    }

    #[test]
    fn get_set_and_value_address_the_same_cells() {
        let mut block = DataBlock::filled(
            names(&["f0", "f1"]),
            vec![day(1), day(2)],
            names(&["a", "b", "c"]),
            0.0,
        );
        block.set(1, 0, 2, 9.5);

        assert_eq!(block.get(1, 0, 2), 9.5);
        assert_eq!(block.value("f1", &day(1), "c"), Some(9.5));
        assert_eq!(block.value("f0", &day(1), "c"), Some(0.0));
        assert_eq!(block.value("f2", &day(1), "c"), None);
        assert_eq!(block.value("f1", &day(3), "c"), None);
    }

    #[test]
    fn filled_with_nan_reads_as_missing() {
        let block = DataBlock::filled(names(&["f0"]), vec![day(1)], names(&["a"]), f64::NAN);
        assert!(block.get(0, 0, 0).is_nan());
    }
}
