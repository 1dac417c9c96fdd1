//! Wrapper prelude.
//!
//! The `factor-store` crate is the supported public entry point. Downstream
//! code should prefer importing from this prelude instead of depending on
//! internal core module paths.

pub use crate::chunk;
pub use crate::{
    DataBlock, FactorDb, FactorTable, StoreError, TableLocation, TemporalCursor, WriteMode,
};
