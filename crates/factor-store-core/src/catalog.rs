//! The catalog: the root-level namespace of factor tables.
//!
//! A [`FactorDb`] is a handle onto one store root directory. Each table is a
//! child directory; a table *exists* exactly when it has a committed axis
//! snapshot (`<table>/_factor_meta/CURRENT`), so a directory left behind by
//! a crashed first write is invisible until its create commits. The catalog
//! owns existence and naming (creating, listing, renaming, and deleting
//! tables) and hands out [`FactorTable`] handles for everything else.

use snafu::prelude::*;
use std::path::Path;

use crate::{
    axes::SnapshotStore,
    block::DataBlock,
    error::{ConnectionSnafu, NameConflictSnafu, StorageSnafu, StoreError, UnknownTableSnafu},
    names::validate_component_name,
    storage::{self, TableLocation},
    table::{FactorTable, WriteMode},
};

/// A connection to a factor store root.
#[derive(Debug, Clone)]
pub struct FactorDb {
    root: TableLocation,
}

impl FactorDb {
    /// Connect to the store rooted at `location`, creating the root
    /// directory if it does not exist.
    ///
    /// Fails with [`StoreError::Connection`] when the root cannot be created
    /// or opened.
    pub async fn connect(location: TableLocation) -> Result<Self, StoreError> {
        storage::create_dir_all(&location, Path::new(""))
            .await
            .context(ConnectionSnafu {
                path: location.to_string(),
            })?;
        Ok(Self { root: location })
    }

    /// The root location this catalog is connected to.
    pub fn root(&self) -> &TableLocation {
        &self.root
    }

    /// Names of all committed tables, ascending.
    ///
    /// Directories without a committed snapshot (a create in progress, or
    /// abandoned by a crash) are not listed.
    pub async fn table_names(&self) -> Result<Vec<String>, StoreError> {
        let entries = storage::list_dir(&self.root, Path::new(""))
            .await
            .context(StorageSnafu)?;

        let mut names = Vec::new();
        for entry in entries {
            if !entry.is_dir {
                continue;
            }
            let current = Path::new(&entry.name).join(SnapshotStore::current_rel_path());
            if storage::file_exists(&self.root, &current)
                .await
                .context(StorageSnafu)?
            {
                names.push(entry.name);
            }
        }
        Ok(names)
    }

    /// Open an existing table.
    ///
    /// Fails with [`StoreError::UnknownTable`] when the table has no
    /// committed snapshot.
    pub async fn get_table(&self, name: &str) -> Result<FactorTable, StoreError> {
        validate_component_name(name)?;
        let table = FactorTable::open(name.to_string(), self.root.subdir(name)).await?;
        if !table.is_committed() {
            return UnknownTableSnafu { table: name }.fail();
        }
        Ok(table)
    }

    /// Open a handle for creating a new table.
    ///
    /// Fails with [`StoreError::NameConflict`] when the table already has a
    /// committed snapshot. The table becomes visible to [`Self::table_names`]
    /// only after its first (create-mode) write commits.
    pub async fn create_table(&self, name: &str) -> Result<FactorTable, StoreError> {
        validate_component_name(name)?;
        let table = FactorTable::open(name.to_string(), self.root.subdir(name)).await?;
        if table.is_committed() {
            return NameConflictSnafu { name }.fail();
        }
        Ok(table)
    }

    /// Write `block` into table `name` under `mode` and return the handle.
    ///
    /// A convenience wrapper pairing handle acquisition with the write:
    /// create-mode writes go through [`Self::create_table`], merge-mode
    /// writes through [`Self::get_table`].
    pub async fn write_data(
        &self,
        name: &str,
        block: &DataBlock,
        mode: WriteMode,
    ) -> Result<FactorTable, StoreError> {
        let mut table = match mode {
            WriteMode::Create => self.create_table(name).await?,
            WriteMode::Update | WriteMode::Append => self.get_table(name).await?,
        };
        table.write_data(block, mode).await?;
        Ok(table)
    }

    /// Rename the table `old` to `new`.
    ///
    /// A single directory rename; open handles onto the old name must be
    /// dropped first.
    pub async fn rename_table(&self, old: &str, new: &str) -> Result<(), StoreError> {
        validate_component_name(old)?;
        validate_component_name(new)?;

        if !self.table_exists(old).await? {
            return UnknownTableSnafu { table: old }.fail();
        }
        if storage::dir_exists(&self.root, Path::new(new))
            .await
            .context(StorageSnafu)?
        {
            return NameConflictSnafu { name: new }.fail();
        }

        storage::rename(&self.root, Path::new(old), Path::new(new))
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    /// Rename the factor `old` to `new` inside table `table`.
    ///
    /// Delegates to [`FactorTable::rename_factor`]; surfaces `UnknownTable`
    /// for a missing table and its `UnknownFactor`/`NameConflict` guards.
    pub async fn rename_factor(
        &self,
        table: &str,
        old: &str,
        new: &str,
    ) -> Result<(), StoreError> {
        let mut table = self.get_table(table).await?;
        table.rename_factor(old, new).await
    }

    /// Remove `factors` from table `table` along with their values.
    ///
    /// Delegates to [`FactorTable::delete_factors`]; one unknown name fails
    /// the whole call without side effects.
    pub async fn delete_factor(&self, table: &str, factors: &[String]) -> Result<(), StoreError> {
        let mut table = self.get_table(table).await?;
        table.delete_factors(factors).await
    }

    /// Delete the table `name` and everything under it.
    pub async fn delete_table(&self, name: &str) -> Result<(), StoreError> {
        validate_component_name(name)?;
        if !self.table_exists(name).await? {
            return UnknownTableSnafu { table: name }.fail();
        }
        storage::remove_dir_all(&self.root, Path::new(name))
            .await
            .context(StorageSnafu)?;
        Ok(())
    }

    async fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let current = Path::new(name).join(SnapshotStore::current_rel_path());
        storage::file_exists(&self.root, &current)
            .await
            .context(StorageSnafu)
    }
}
