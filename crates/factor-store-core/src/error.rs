//! Error types and SNAFU context selectors for the factor store.
//!
//! This module centralizes the [`StoreError`] enum used by the public API and
//! exposes context selectors (via `#[snafu(visibility(pub(crate)))]`) so
//! implementation details in sibling modules can attach error context without
//! re-exporting everything at the crate root. Keep new variants here to ensure
//! consistent user-facing messages.

use snafu::{Backtrace, prelude::*};

use crate::{axes::SnapshotError, storage::StorageError};

/// Errors from factor store operations.
///
/// The taxonomy is intentionally flat: every variant indicates a caller error
/// or a storage-integrity problem, never a transient condition, so nothing is
/// retried internally.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The root storage location could not be opened or created.
    #[snafu(display("Cannot connect to factor store root {path}: {source}"))]
    Connection {
        /// The root path that could not be opened.
        path: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// The named table has no committed physical presence.
    #[snafu(display("Unknown table: {table}"))]
    UnknownTable {
        /// The table name that was not found.
        table: String,
    },

    /// The named factor is not present in the table.
    #[snafu(display("Unknown factor: {factor}"))]
    UnknownFactor {
        /// The factor name that was not found.
        factor: String,
    },

    /// A create or rename targeted a name that already exists.
    #[snafu(display("Name conflict: {name} already exists"))]
    NameConflict {
        /// The conflicting name.
        name: String,
    },

    /// A table or factor name cannot be mapped to a storage path.
    #[snafu(display("Invalid name {name:?}: {reason}"))]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// A write block's shape is inconsistent with its own declared axes,
    /// or an axis of the block contains duplicate entries.
    #[snafu(display("Axis mismatch: {reason}"))]
    AxisMismatch {
        /// Description of the inconsistency.
        reason: String,
    },

    /// A chunk file exists but could not be decoded. This is never silently
    /// treated as a missing value.
    #[snafu(display("Storage corruption at {path}: {detail}"))]
    StorageCorruption {
        /// Path of the unreadable chunk file.
        path: String,
        /// Description of the structural violation.
        detail: String,
        /// The backtrace at the time the corruption was detected.
        backtrace: Backtrace,
    },

    /// A temporal cursor was read before any `move_to` call.
    #[snafu(display("Cursor is not positioned; call move_to before reading"))]
    CursorNotPositioned,

    /// Storage error while accessing table data.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },

    /// Axis snapshot load or commit failure.
    #[snafu(display("Axis snapshot error: {source}"))]
    Snapshot {
        /// Underlying snapshot error.
        #[snafu(source, backtrace)]
        source: SnapshotError,
    },
}
