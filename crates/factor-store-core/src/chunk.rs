//! Chunked array store: grid math, the chunk block codec, and physical
//! chunk file management.
//!
//! A table's per-factor value array is a logical dense 2-D matrix with
//! date-times as rows and identifiers as columns. The matrix is tiled into
//! fixed-shape chunks of [`CHUNK_ROWS`] × [`CHUNK_COLS`] cells; chunk
//! coordinate `(r, c)` covers logical rows `[r*CHUNK_ROWS, (r+1)*CHUNK_ROWS)`
//! and columns `[c*CHUNK_COLS, (c+1)*CHUNK_COLS)`. Chunks are independently
//! addressable files, so partial writes never rewrite unrelated chunks and
//! axis growth at the tail touches only the chunks it lands in.
//!
//! On-disk layout under a table root:
//!
//! ```text
//! table_root/
//!   <factor>/
//!     g0000000001/                   # chunk generation directory
//!       0000000000_0000000000.chunk  # (chunk-row, chunk-col)
//!       0000000000_0000000001.chunk
//! ```
//!
//! The generation directory exists so that a write which *shifts* existing
//! axis positions can lay out a full replacement under `g<n+1>` and switch
//! over with a single metadata commit; see the table write path.
//!
//! A chunk file is `FCK1` head magic, a format version, the chunk shape,
//! a row-major little-endian `f64` payload (NaN-filled), and `1KCF` tail
//! magic. Every structural violation on decode is surfaced as storage
//! corruption, never as a missing value.

use bytes::{Buf, BufMut, BytesMut};
use snafu::prelude::*;
use std::path::PathBuf;

use crate::{
    error::{StorageCorruptionSnafu, StoreError},
    storage::{self, StorageError, TableLocation},
};

/// Number of logical date-time rows covered by one chunk.
pub const CHUNK_ROWS: usize = 256;
/// Number of logical identifier columns covered by one chunk.
pub const CHUNK_COLS: usize = 64;

/// Head magic of a chunk file.
const CHUNK_MAGIC_HEAD: &[u8; 4] = b"FCK1";
/// Tail magic of a chunk file.
const CHUNK_MAGIC_TAIL: &[u8; 4] = b"1KCF";
/// Current chunk file format version.
const CHUNK_FORMAT_VERSION: u16 = 1;
/// Bytes before the payload: head magic + version + rows + cols.
const CHUNK_HEADER_LEN: usize = 4 + 2 + 4 + 4;

/// Coordinate of a chunk within the (date-time × identifier) grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkCoord {
    /// Chunk row index (date-time direction).
    pub row: u64,
    /// Chunk column index (identifier direction).
    pub col: u64,
}

/// Locate the chunk holding logical position `(row, col)`.
///
/// Returns the chunk coordinate plus the local (within-chunk) row and column.
pub fn chunk_of(row: usize, col: usize) -> (ChunkCoord, usize, usize) {
    let coord = ChunkCoord {
        row: (row / CHUNK_ROWS) as u64,
        col: (col / CHUNK_COLS) as u64,
    };
    (coord, row % CHUNK_ROWS, col % CHUNK_COLS)
}

/// One fixed-shape block of `f64` values, NaN-filled where unwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkBlock {
    values: Vec<f64>,
}

impl ChunkBlock {
    /// A chunk with every cell set to the missing sentinel.
    pub fn new_missing() -> Self {
        Self {
            values: vec![f64::NAN; CHUNK_ROWS * CHUNK_COLS],
        }
    }

    /// Value at local position `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * CHUNK_COLS + col]
    }

    /// Set the value at local position `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * CHUNK_COLS + col] = value;
    }

    /// Whether every cell is the missing sentinel.
    ///
    /// All-missing chunks are never written; the absent file *is* the
    /// representation of an unpopulated region.
    pub fn is_all_missing(&self) -> bool {
        self.values.iter().all(|v| v.is_nan())
    }

    /// Encode the chunk into its on-disk byte representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            BytesMut::with_capacity(CHUNK_HEADER_LEN + self.values.len() * 8 + 4);
        buf.put_slice(CHUNK_MAGIC_HEAD);
        buf.put_u16_le(CHUNK_FORMAT_VERSION);
        buf.put_u32_le(CHUNK_ROWS as u32);
        buf.put_u32_le(CHUNK_COLS as u32);
        for v in &self.values {
            buf.put_f64_le(*v);
        }
        buf.put_slice(CHUNK_MAGIC_TAIL);
        buf.to_vec()
    }

    /// Decode a chunk from its on-disk byte representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChunkDecodeError> {
        let cell_count = CHUNK_ROWS * CHUNK_COLS;
        let expected = CHUNK_HEADER_LEN + cell_count * 8 + 4;
        ensure!(
            bytes.len() == expected,
            WrongLengthSnafu {
                expected,
                actual: bytes.len(),
            }
        );

        let mut cursor = bytes;
        let mut head = [0u8; 4];
        cursor.copy_to_slice(&mut head);
        ensure!(&head == CHUNK_MAGIC_HEAD, BadHeadMagicSnafu { found: head });

        let version = cursor.get_u16_le();
        ensure!(
            version == CHUNK_FORMAT_VERSION,
            UnsupportedVersionSnafu { found: version }
        );

        let rows = cursor.get_u32_le();
        let cols = cursor.get_u32_le();
        ensure!(
            rows as usize == CHUNK_ROWS && cols as usize == CHUNK_COLS,
            WrongShapeSnafu { rows, cols }
        );

        let mut values = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            values.push(cursor.get_f64_le());
        }

        let mut tail = [0u8; 4];
        cursor.copy_to_slice(&mut tail);
        ensure!(&tail == CHUNK_MAGIC_TAIL, BadTailMagicSnafu { found: tail });

        Ok(Self { values })
    }
}

/// Structural violations found while decoding a chunk file.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum ChunkDecodeError {
    /// The file length does not match the fixed chunk layout.
    #[snafu(display("chunk file has {actual} bytes, expected {expected}"))]
    WrongLength {
        /// Expected total byte length.
        expected: usize,
        /// Actual byte length found.
        actual: usize,
    },

    /// The head magic bytes were wrong.
    #[snafu(display("bad chunk head magic {found:?}"))]
    BadHeadMagic {
        /// The bytes found where the head magic was expected.
        found: [u8; 4],
    },

    /// The tail magic bytes were wrong (typically a truncated-then-padded
    /// or overwritten file).
    #[snafu(display("bad chunk tail magic {found:?}"))]
    BadTailMagic {
        /// The bytes found where the tail magic was expected.
        found: [u8; 4],
    },

    /// The chunk format version is not supported.
    #[snafu(display("unsupported chunk format version {found}"))]
    UnsupportedVersion {
        /// The version number found in the header.
        found: u16,
    },

    /// The header declares a chunk shape other than the fixed grid shape.
    #[snafu(display("chunk shape {rows}x{cols} does not match the fixed grid"))]
    WrongShape {
        /// Row count found in the header.
        rows: u32,
        /// Column count found in the header.
        cols: u32,
    },
}

/// Physical chunk file management under one table root.
///
/// Keys are (factor name, generation, chunk coordinate); values are
/// [`ChunkBlock`]s. The store knows nothing about axes; translating logical
/// (date-time, identifier) positions into chunk coordinates is the table
/// layer's job.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    location: TableLocation,
}

impl ChunkStore {
    /// File extension of chunk files.
    pub const CHUNK_EXT: &str = "chunk";
    /// Number of digits used in zero-padded chunk and generation names.
    pub const NAME_DIGITS: usize = 10;

    /// Create a chunk store rooted at a table directory.
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    fn generation_rel_dir(factor: &str, generation: u64) -> PathBuf {
        PathBuf::from(factor).join(format!("g{generation:0width$}", width = Self::NAME_DIGITS))
    }

    fn chunk_rel_path(factor: &str, generation: u64, coord: ChunkCoord) -> PathBuf {
        Self::generation_rel_dir(factor, generation).join(format!(
            "{row:0width$}_{col:0width$}.{ext}",
            row = coord.row,
            col = coord.col,
            width = Self::NAME_DIGITS,
            ext = Self::CHUNK_EXT,
        ))
    }

    /// Read the chunk at `(factor, generation, coord)`.
    ///
    /// An absent chunk file is `Ok(None)`; the table layer reads it as
    /// all-missing. A present but undecodable file is
    /// [`StoreError::StorageCorruption`].
    pub async fn read_chunk(
        &self,
        factor: &str,
        generation: u64,
        coord: ChunkCoord,
    ) -> Result<Option<ChunkBlock>, StoreError> {
        let rel = Self::chunk_rel_path(factor, generation, coord);
        let bytes = match storage::read_all_bytes(&self.location, &rel).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(source) => return Err(StoreError::Storage { source }),
        };

        match ChunkBlock::decode(&bytes) {
            Ok(block) => Ok(Some(block)),
            Err(e) => StorageCorruptionSnafu {
                path: rel.display().to_string(),
                detail: e.to_string(),
            }
            .fail(),
        }
    }

    /// Write the chunk at `(factor, generation, coord)`, atomically replacing
    /// any prior content at chunk granularity.
    pub async fn write_chunk(
        &self,
        factor: &str,
        generation: u64,
        coord: ChunkCoord,
        block: &ChunkBlock,
    ) -> Result<(), StoreError> {
        let rel = Self::chunk_rel_path(factor, generation, coord);
        storage::write_atomic(&self.location, &rel, &block.encode())
            .await
            .map_err(|source| StoreError::Storage { source })
    }

    /// Factors currently backed by physical data: every non-metadata
    /// subdirectory of the table root.
    pub async fn list_factors(&self) -> Result<Vec<String>, StoreError> {
        let entries = storage::list_dir(&self.location, PathBuf::new().as_path())
            .await
            .context(crate::error::StorageSnafu)?;
        Ok(entries
            .into_iter()
            .filter(|e| e.is_dir && !e.name.starts_with('_'))
            .map(|e| e.name)
            .collect())
    }

    /// Generations physically present for `factor`, ascending.
    pub async fn list_generations(&self, factor: &str) -> Result<Vec<u64>, StoreError> {
        let entries = storage::list_dir(&self.location, PathBuf::from(factor).as_path())
            .await
            .context(crate::error::StorageSnafu)?;
        let mut generations: Vec<u64> = entries
            .into_iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| e.name.strip_prefix('g').and_then(|n| n.parse().ok()))
            .collect();
        generations.sort_unstable();
        Ok(generations)
    }

    /// Coordinates of the chunks physically present for `(factor, generation)`.
    ///
    /// A `.chunk` file whose name does not parse as a coordinate is reported
    /// as corruption; unrelated files (for example `.tmp` leftovers) are
    /// ignored.
    pub async fn list_chunks(
        &self,
        factor: &str,
        generation: u64,
    ) -> Result<Vec<ChunkCoord>, StoreError> {
        let dir = Self::generation_rel_dir(factor, generation);
        let entries = storage::list_dir(&self.location, &dir)
            .await
            .context(crate::error::StorageSnafu)?;

        let mut coords = Vec::new();
        for entry in entries.into_iter().filter(|e| !e.is_dir) {
            let Some(stem) = entry.name.strip_suffix(".chunk") else {
                continue;
            };
            let parsed = stem
                .split_once('_')
                .and_then(|(r, c)| Some((r.parse::<u64>().ok()?, c.parse::<u64>().ok()?)));
            match parsed {
                Some((row, col)) => coords.push(ChunkCoord { row, col }),
                None => {
                    return StorageCorruptionSnafu {
                        path: dir.join(&entry.name).display().to_string(),
                        detail: "chunk file name does not parse as a coordinate".to_string(),
                    }
                    .fail();
                }
            }
        }
        coords.sort_unstable();
        Ok(coords)
    }

    /// Remove all physical data of `factor`. Absence is not an error.
    pub async fn delete_factor(&self, factor: &str) -> Result<(), StoreError> {
        match storage::remove_dir_all(&self.location, PathBuf::from(factor).as_path()).await {
            Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
            Err(source) => Err(StoreError::Storage { source }),
        }
    }

    /// Relocate all physical data of `old` under `new`. A factor with no
    /// physical data (never written or all-missing) has no directory; that
    /// absence is not an error.
    pub async fn rename_factor(&self, old: &str, new: &str) -> Result<(), StoreError> {
        match storage::rename(
            &self.location,
            PathBuf::from(old).as_path(),
            PathBuf::from(new).as_path(),
        )
        .await
        {
            Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
            Err(source) => Err(StoreError::Storage { source }),
        }
    }

    /// Remove one generation directory of `factor`. Absence is not an error.
    pub async fn delete_generation(&self, factor: &str, generation: u64) -> Result<(), StoreError> {
        let dir = Self::generation_rel_dir(factor, generation);
        match storage::remove_dir_all(&self.location, &dir).await {
            Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
            Err(source) => Err(StoreError::Storage { source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn create_test_store() -> (TempDir, ChunkStore) {
        let tmp = TempDir::new().expect("create temp dir");
        let store = ChunkStore::new(TableLocation::local(tmp.path()));
        (tmp, store)
    }

    #[test]
    fn chunk_of_maps_positions_to_coordinates() {
        let (coord, lr, lc) = chunk_of(0, 0);
        assert_eq!(coord, ChunkCoord { row: 0, col: 0 });
        assert_eq!((lr, lc), (0, 0));

        let (coord, lr, lc) = chunk_of(CHUNK_ROWS, CHUNK_COLS - 1);
        assert_eq!(coord, ChunkCoord { row: 1, col: 0 });
        assert_eq!((lr, lc), (0, CHUNK_COLS - 1));

        let (coord, lr, lc) = chunk_of(CHUNK_ROWS * 3 + 7, CHUNK_COLS * 2 + 5);
        assert_eq!(coord, ChunkCoord { row: 3, col: 2 });
        assert_eq!((lr, lc), (7, 5));
    }

    #[test]
    fn codec_round_trips_values_and_missing_cells() -> TestResult {
        let mut block = ChunkBlock::new_missing();
        block.set(0, 0, 1.5);
        block.set(10, 3, -2.25);
        block.set(CHUNK_ROWS - 1, CHUNK_COLS - 1, 0.0);

        let decoded = ChunkBlock::decode(&block.encode())?;

        assert_eq!(decoded.get(0, 0), 1.5);
        assert_eq!(decoded.get(10, 3), -2.25);
        assert_eq!(decoded.get(CHUNK_ROWS - 1, CHUNK_COLS - 1), 0.0);
        assert!(decoded.get(1, 1).is_nan());
        Ok(())
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        let bytes = ChunkBlock::new_missing().encode();

        let err = ChunkBlock::decode(&bytes[..bytes.len() - 1]).expect_err("expected WrongLength");

        assert!(matches!(err, ChunkDecodeError::WrongLength { .. }));
    }

    #[test]
    fn decode_rejects_bad_head_magic() {
        let mut bytes = ChunkBlock::new_missing().encode();
        bytes[0] = b'X';

        let err = ChunkBlock::decode(&bytes).expect_err("expected BadHeadMagic");

        assert!(matches!(err, ChunkDecodeError::BadHeadMagic { .. }));
    }

    #[test]
    fn decode_rejects_bad_tail_magic() {
        let mut bytes = ChunkBlock::new_missing().encode();
        let last = bytes.len() - 1;
        bytes[last] = b'X';

        let err = ChunkBlock::decode(&bytes).expect_err("expected BadTailMagic");

        assert!(matches!(err, ChunkDecodeError::BadTailMagic { .. }));
    }

    #[tokio::test]
    async fn read_chunk_returns_none_for_absent_file() -> TestResult {
        let (_tmp, store) = create_test_store();

        let chunk = store
            .read_chunk("factor0", 1, ChunkCoord { row: 0, col: 0 })
            .await?;

        assert!(chunk.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn write_then_read_chunk_round_trips() -> TestResult {
        let (_tmp, store) = create_test_store();
        let coord = ChunkCoord { row: 2, col: 1 };

        let mut block = ChunkBlock::new_missing();
        block.set(5, 5, 42.0);
        store.write_chunk("factor0", 1, coord, &block).await?;

        let read_back = store
            .read_chunk("factor0", 1, coord)
            .await?
            .expect("chunk must exist");
        assert_eq!(read_back.get(5, 5), 42.0);
        assert!(read_back.get(0, 0).is_nan());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_chunk_file_is_reported_not_treated_as_missing() -> TestResult {
        let (tmp, store) = create_test_store();
        let coord = ChunkCoord { row: 0, col: 0 };

        let rel = tmp
            .path()
            .join("factor0/g0000000001/0000000000_0000000000.chunk");
        tokio::fs::create_dir_all(rel.parent().expect("parent")).await?;
        tokio::fs::write(&rel, b"garbage").await?;

        let err = store
            .read_chunk("factor0", 1, coord)
            .await
            .expect_err("expected StorageCorruption");
        assert!(matches!(err, StoreError::StorageCorruption { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn list_factors_generations_and_chunks() -> TestResult {
        let (_tmp, store) = create_test_store();
        let block = {
            let mut b = ChunkBlock::new_missing();
            b.set(0, 0, 1.0);
            b
        };

        store
            .write_chunk("alpha", 1, ChunkCoord { row: 0, col: 0 }, &block)
            .await?;
        store
            .write_chunk("alpha", 2, ChunkCoord { row: 1, col: 0 }, &block)
            .await?;
        store
            .write_chunk("beta", 1, ChunkCoord { row: 0, col: 3 }, &block)
            .await?;

        assert_eq!(store.list_factors().await?, vec!["alpha", "beta"]);
        assert_eq!(store.list_generations("alpha").await?, vec![1, 2]);
        assert_eq!(
            store.list_chunks("alpha", 1).await?,
            vec![ChunkCoord { row: 0, col: 0 }]
        );
        assert_eq!(
            store.list_chunks("alpha", 2).await?,
            vec![ChunkCoord { row: 1, col: 0 }]
        );
        // Missing generation lists as empty, not as an error.
        assert!(store.list_chunks("beta", 9).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn delete_and_rename_factor_move_physical_data() -> TestResult {
        let (_tmp, store) = create_test_store();
        let coord = ChunkCoord { row: 0, col: 0 };
        let mut block = ChunkBlock::new_missing();
        block.set(1, 1, 7.0);

        store.write_chunk("old_name", 3, coord, &block).await?;
        store.rename_factor("old_name", "new_name").await?;

        assert!(store.read_chunk("old_name", 3, coord).await?.is_none());
        let moved = store
            .read_chunk("new_name", 3, coord)
            .await?
            .expect("chunk must move with the factor");
        assert_eq!(moved.get(1, 1), 7.0);

        store.delete_factor("new_name").await?;
        assert!(store.read_chunk("new_name", 3, coord).await?.is_none());
        assert!(store.list_factors().await?.is_empty());

        // Both operations tolerate absence.
        store.delete_factor("never_existed").await?;
        store.rename_factor("never_existed", "still_nothing").await?;
        Ok(())
    }
}
