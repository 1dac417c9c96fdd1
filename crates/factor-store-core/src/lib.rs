//! Core implementation of the factor store: a chunked, merge-on-write store
//! for tables of named numeric factors indexed by an identifier axis and a
//! date-time axis.
//!
//! The store is organized in layers:
//!
//! - [`storage`]: local-filesystem backend with atomic write-then-rename and
//!   create-new primitives; all path conventions live here.
//! - [`chunk`]: the fixed-shape chunk grid, the chunk file codec, and
//!   physical chunk management under a table root.
//! - [`axes`]: versioned axis snapshots (`_factor_meta/`) with optimistic
//!   commit, plus the pure axis-merge helpers.
//! - [`block`]: the dense `[factor][dt][id]` value cube exchanged with
//!   callers; missing values are `f64::NAN`.
//! - [`table`]: the logical table: dense reads, the merge-on-write engine,
//!   and factor-level schema mutations.
//! - [`cursor`]: stepwise single-date-time reads for simulation runs.
//! - [`catalog`]: the root namespace for connecting, listing, creating,
//!   renaming, and deleting tables.
//!
//! Most applications should depend on the `factor-store` facade crate and
//! use its prelude rather than this crate directly.

#![deny(missing_docs)]

pub mod axes;
pub mod block;
pub mod catalog;
pub mod chunk;
pub mod cursor;
pub mod error;
mod names;
pub mod storage;
pub mod table;
