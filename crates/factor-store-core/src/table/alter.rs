//! Schema alterations: renaming and deleting factors.
//!
//! Both operations follow the same discipline as the write path: the
//! committed snapshot is the source of truth, and the ordering of chunk moves
//! versus snapshot commits is chosen so a crash at any point leaves the table
//! readable:
//! - rename moves the chunk directory first, then commits; a crash in between
//!   leaves the old name committed with its chunks apparently missing, which
//!   reads as missing values rather than corruption.
//! - delete commits first, then removes the chunk directory best-effort; a
//!   crash in between leaves unreferenced chunks that only cost disk space.

use log::warn;
use snafu::prelude::*;

use crate::{
    error::{
        NameConflictSnafu, SnapshotSnafu, StoreError, UnknownFactorSnafu, UnknownTableSnafu,
    },
    names::validate_component_name,
    table::FactorTable,
};

impl FactorTable {
    /// Rename the factor `old` to `new`, keeping its values and its position
    /// in the canonical factor order.
    pub async fn rename_factor(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
        validate_component_name(new)?;
        self.ensure_committed()?;

        let Some(pos) = self.state.factors.iter().position(|f| f == old) else {
            return UnknownFactorSnafu { factor: old }.fail();
        };
        if self.state.factors.iter().any(|f| f == new) {
            return NameConflictSnafu { name: new }.fail();
        }

        self.chunks.rename_factor(old, new).await?;

        let mut snapshot = self.state.clone();
        snapshot.factors[pos] = new.to_string();
        self.version = self
            .snapshots
            .commit_with_expected_version(self.version, &snapshot)
            .await
            .context(SnapshotSnafu)?;
        self.state = snapshot;
        Ok(())
    }

    /// Remove `factors` from the table along with their values.
    ///
    /// Every name is checked before anything changes, so a bad name in the
    /// list fails the whole call without side effects. Chunk directories are
    /// removed only after the commit; a removal failure is logged and the
    /// leftovers are unreferenced.
    pub async fn delete_factors(&mut self, factors: &[String]) -> Result<(), StoreError> {
        self.ensure_committed()?;

        for factor in factors {
            if !self.state.factors.contains(factor) {
                return UnknownFactorSnafu { factor }.fail();
            }
        }

        let mut snapshot = self.state.clone();
        snapshot.factors.retain(|f| !factors.contains(f));
        self.version = self
            .snapshots
            .commit_with_expected_version(self.version, &snapshot)
            .await
            .context(SnapshotSnafu)?;
        self.state = snapshot;

        for factor in factors {
            if let Err(e) = self.chunks.delete_factor(factor).await {
                warn!("cannot remove chunks of deleted factor {factor}: {e}");
            }
        }
        Ok(())
    }

    fn ensure_committed(&self) -> Result<(), StoreError> {
        if self.version == 0 {
            return UnknownTableSnafu {
                table: self.name.clone(),
            }
            .fail();
        }
        Ok(())
    }
}
