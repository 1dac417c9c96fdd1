//! # factor-store
//!
//! Chunked time-series store for tables of named numeric factors indexed by
//! an identifier axis and a date-time axis.
//!
//! This crate is the supported public entry point and provides a small,
//! stable surface over `factor-store-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use factor_store::prelude::*;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Chunk grid namespace (wrapper-only).
pub mod chunk {
    pub use factor_store_core::chunk::{CHUNK_COLS, CHUNK_ROWS, ChunkCoord};
}

pub use factor_store_core::block::DataBlock;
pub use factor_store_core::catalog::FactorDb;
pub use factor_store_core::cursor::TemporalCursor;
pub use factor_store_core::error::StoreError;
pub use factor_store_core::storage::TableLocation;
pub use factor_store_core::table::{FactorTable, WriteMode};
