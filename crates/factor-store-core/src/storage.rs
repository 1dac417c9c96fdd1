//! Filesystem storage backend.
//!
//! This module centralizes all path- and filesystem-level logic for
//! `factor-store-core`. Higher layers (chunk store, axis snapshots, catalog)
//! address files and directories *relative to a table or root location* and
//! never touch `std::fs`/`tokio::fs` directly, so that path conventions and
//! durability tricks (write-then-rename, create-new) live in one place.
//!
//! Provided operations:
//!
//! - Atomic whole-file replacement (`write_atomic`): write to a temporary
//!   sibling, fsync, rename into place. This is the durability unit for
//!   chunk files and the `CURRENT` pointer.
//! - Create-new writes (`write_new`): fail if the target already exists,
//!   used for per-version axis snapshot files.
//! - Whole-file reads with a distinguished not-found case, so callers can
//!   map "absent" to a domain meaning (missing chunk, fresh table) instead
//!   of an error.
//! - Directory enumeration, rename, and recursive removal for catalog and
//!   factor-level schema mutations.
//!
//! Only the local filesystem is supported; [`TableLocation`] keeps the API
//! shaped so an object-store backend could be added without rewriting the
//! chunk and snapshot layers.

use snafu::{Backtrace, prelude::*};
use std::{
    error::Error,
    fmt,
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The location of a factor store root or of a single table.
///
/// This enum abstracts over storage backends; only the local filesystem is
/// currently implemented.
#[derive(Clone, Debug)]
pub enum TableLocation {
    /// A location on the local filesystem.
    Local(PathBuf),
}

impl TableLocation {
    /// Creates a `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }

    /// Returns the location of a named child directory.
    ///
    /// Used by the catalog to derive a table location from the root.
    pub fn subdir(&self, name: &str) -> TableLocation {
        match self {
            TableLocation::Local(root) => TableLocation::Local(root.join(name)),
        }
    }
}

impl fmt::Display for TableLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableLocation::Local(root) => write!(f, "{}", root.display()),
        }
    }
}

/// Errors produced by the storage backend implementation.
///
/// Backend-specific I/O errors are wrapped here so higher layers can map them
/// into [`StorageError`] variants with path context attached.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists when creation was requested with
    /// create-new semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The path that was found to already exist.
        path: String,
        /// Underlying backend error that indicates the existing resource.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred on the local filesystem.
    #[snafu(display("I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend I/O error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

/// Classify an `io::Error` at `path` into the matching [`StorageError`].
fn classify(path: &Path, e: io::Error) -> StorageError {
    let path = path.display().to_string();
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
        io::ErrorKind::AlreadyExists => StorageError::AlreadyExists {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
        _ => StorageError::OtherIo {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
    }
}

/// Join a location with a relative path into an absolute local path.
fn join_local(location: &TableLocation, rel: &Path) -> PathBuf {
    match location {
        TableLocation::Local(root) => root.join(rel),
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| classify(parent, e))?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Ensures cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Disarm the guard so the file is NOT removed on drop.
    /// Call this after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we are likely already handling another error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path` inside `location` atomically.
///
/// Performs a write-then-rename sequence: the payload goes to a `.tmp`
/// sibling of the target, is fsynced, and is then renamed into place.
/// An existing file at the target is fully replaced; a crash mid-write
/// leaves the prior file intact.
pub async fn write_atomic(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| classify(&tmp_path, e))?;
        file.write_all(contents)
            .await
            .map_err(|e| classify(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| classify(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, &abs)
        .await
        .map_err(|e| classify(&abs, e))?;

    // Renamed into place; nothing left to clean up.
    guard.disarm();
    Ok(())
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if the file is already present.
///
/// Used for axis snapshot files, where each version must be created exactly
/// once.
pub async fn write_new(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    // Atomic "create only if not exists" on the target path.
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await
        .map_err(|e| classify(&abs, e))?;

    file.write_all(contents)
        .await
        .map_err(|e| classify(&abs, e))?;
    file.sync_all().await.map_err(|e| classify(&abs, e))?;
    Ok(())
}

/// Read the file at `rel_path` within `location` as a `String`.
///
/// Returns [`StorageError::NotFound`] if the file does not exist.
pub async fn read_to_string(location: &TableLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = join_local(location, rel_path);
    fs::read_to_string(&abs)
        .await
        .map_err(|e| classify(&abs, e))
}

/// Read the full contents of the file at `rel_path` within `location`.
///
/// Returns [`StorageError::NotFound`] if the file does not exist.
pub async fn read_all_bytes(location: &TableLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = join_local(location, rel_path);
    fs::read(&abs).await.map_err(|e| classify(&abs, e))
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// The entry's file name (final path component).
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// List the entries of the directory at `rel_path` within `location`,
/// sorted by name.
///
/// A missing directory yields an empty listing rather than an error; the
/// chunk store and catalog treat "nothing there yet" as an empty domain.
pub async fn list_dir(
    location: &TableLocation,
    rel_path: &Path,
) -> StorageResult<Vec<DirEntryInfo>> {
    let abs = join_local(location, rel_path);

    let mut reader = match fs::read_dir(&abs).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(classify(&abs, e)),
    };

    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(|e| classify(&abs, e))? {
        let file_type = entry.file_type().await.map_err(|e| classify(&abs, e))?;
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: file_type.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Rename `from_rel` to `to_rel` within `location`.
///
/// A single `rename` syscall, so a directory move (table or factor rename)
/// is atomic with respect to concurrent listings.
pub async fn rename(location: &TableLocation, from_rel: &Path, to_rel: &Path) -> StorageResult<()> {
    let from_abs = join_local(location, from_rel);
    let to_abs = join_local(location, to_rel);
    fs::rename(&from_abs, &to_abs)
        .await
        .map_err(|e| classify(&from_abs, e))
}

/// Recursively remove the directory at `rel_path` within `location`.
///
/// Returns [`StorageError::NotFound`] if the directory does not exist;
/// callers that want idempotent removal match on that variant.
pub async fn remove_dir_all(location: &TableLocation, rel_path: &Path) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    fs::remove_dir_all(&abs).await.map_err(|e| classify(&abs, e))
}

/// Create the directory at `rel_path` within `location`, including parents.
pub async fn create_dir_all(location: &TableLocation, rel_path: &Path) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    fs::create_dir_all(&abs).await.map_err(|e| classify(&abs, e))
}

/// Check whether a regular file exists at `rel_path` within `location`.
pub async fn file_exists(location: &TableLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = join_local(location, rel_path);
    match fs::metadata(&abs).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(classify(&abs, e)),
    }
}

/// Check whether a directory exists at `rel_path` within `location`.
pub async fn dir_exists(location: &TableLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = join_local(location, rel_path);
    match fs::metadata(&abs).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(classify(&abs, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn write_atomic_creates_file_with_contents() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        write_atomic(&location, Path::new("test.txt"), b"hello world").await?;

        let read_back = tokio::fs::read_to_string(tmp.path().join("test.txt")).await?;
        assert_eq!(read_back, "hello world");
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        write_atomic(&location, Path::new("nested/deep/file.txt"), b"nested").await?;

        let abs = tmp.path().join("nested/deep/file.txt");
        assert!(abs.exists());
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_overwrites_existing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("overwrite.txt");

        write_atomic(&location, rel, b"original").await?;
        write_atomic(&location, rel, b"updated").await?;

        let read_back = read_to_string(&location, rel).await?;
        assert_eq!(read_back, "updated");
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_no_leftover_tmp_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        write_atomic(&location, Path::new("clean.txt"), b"data").await?;

        assert!(!tmp.path().join("clean.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn read_to_string_returns_not_found_for_missing_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        let result = read_to_string(&location, Path::new("does_not_exist.txt")).await;

        let err = result.expect_err("expected NotFound error");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn write_new_fails_if_file_exists() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("existing.txt");

        write_new(&location, rel, b"first").await?;
        let result = write_new(&location, rel, b"second").await;

        let err = result.expect_err("expected AlreadyExists error");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        // Original content must be unchanged.
        assert_eq!(read_to_string(&location, rel).await?, "first");
        Ok(())
    }

    #[tokio::test]
    async fn list_dir_of_missing_directory_is_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        let entries = list_dir(&location, Path::new("nowhere")).await?;

        assert!(entries.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn list_dir_returns_sorted_entries_with_kinds() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        tokio::fs::create_dir(tmp.path().join("bdir")).await?;
        tokio::fs::write(tmp.path().join("afile"), b"x").await?;

        let entries = list_dir(&location, Path::new("")).await?;

        assert_eq!(
            entries,
            vec![
                DirEntryInfo {
                    name: "afile".to_string(),
                    is_dir: false
                },
                DirEntryInfo {
                    name: "bdir".to_string(),
                    is_dir: true
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn rename_moves_directory() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        tokio::fs::create_dir(tmp.path().join("old")).await?;
        tokio::fs::write(tmp.path().join("old/data"), b"x").await?;

        rename(&location, Path::new("old"), Path::new("new")).await?;

        assert!(!tmp.path().join("old").exists());
        assert!(tmp.path().join("new/data").exists());
        Ok(())
    }

    #[tokio::test]
    async fn remove_dir_all_on_missing_directory_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        let result = remove_dir_all(&location, Path::new("missing")).await;

        let err = result.expect_err("expected NotFound error");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn exists_helpers_distinguish_files_and_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        tokio::fs::create_dir(tmp.path().join("d")).await?;
        tokio::fs::write(tmp.path().join("f"), b"x").await?;

        assert!(dir_exists(&location, Path::new("d")).await?);
        assert!(!dir_exists(&location, Path::new("f")).await?);
        assert!(file_exists(&location, Path::new("f")).await?);
        assert!(!file_exists(&location, Path::new("d")).await?);
        assert!(!file_exists(&location, Path::new("g")).await?);
        Ok(())
    }
}
