//! Filesystem access for table roots.
//!
//! Every byte the engine reads or writes goes through the helpers in this
//! module. They resolve a relative path against a [`TableLocation`] and map
//! backend failures into [`StorageError`] with the offending path attached.
//!
//! Three write primitives exist, each with a distinct guarantee:
//!
//! - [`write_atomic`]: temp file + rename. Replaces the target; used for the
//!   `CURRENT` hint.
//! - [`write_new`]: temp file + fsync + hard link. Fails with
//!   [`StorageError::AlreadyExists`] when the target exists and never exposes
//!   a partially written file. Used to publish commit files.
//! - [`write_immutable`]: create-new write for content-addressed data files.
//!
//! The path conventions themselves live in [`layout`].

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use snafu::{IntoError, prelude::*};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

mod error;
pub mod layout;
mod table_location;

pub use error::StorageError;
pub(crate) use error::{AlreadyExistsSnafu, InvalidLocationSnafu, NotFoundSnafu, OtherIoSnafu};
pub use table_location::TableLocation;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Join a table location with a relative path into an absolute local path.
pub(crate) fn join_local(location: &TableLocation, rel: &Path) -> PathBuf {
    match location {
        TableLocation::Local(root) => root.join(rel),
    }
}

fn classify_io(path: &Path, e: io::Error) -> StorageError {
    let path = path.display().to_string();
    match e.kind() {
        io::ErrorKind::NotFound => NotFoundSnafu { path }.into_error(e),
        io::ErrorKind::AlreadyExists => AlreadyExistsSnafu { path }.into_error(e),
        _ => OtherIoSnafu { path }.into_error(e),
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// A sibling temp path unique to this process and call.
fn unique_tmp_path(abs: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    abs.with_file_name(format!(".{file_name}.{}.{n}.tmp", std::process::id()))
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Call after a successful rename.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best effort; the caller is likely already handling another error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_and_sync(path: &Path, contents: &[u8], create_new: bool) -> StorageResult<()> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if create_new {
        opts.create_new(true);
    } else {
        opts.create(true).truncate(true);
    }

    let mut file = opts.open(path).await.map_err(|e| classify_io(path, e))?;

    file.write_all(contents)
        .await
        .context(OtherIoSnafu {
            path: path.display().to_string(),
        })?;

    file.sync_all()
        .await
        .context(OtherIoSnafu {
            path: path.display().to_string(),
        })?;

    Ok(())
}

/// Write `contents` to `rel_path` inside `location`, replacing any existing
/// file atomically (write-then-rename).
pub async fn write_atomic(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = unique_tmp_path(&abs);
    let mut guard = TempFileGuard::new(tmp_path.clone());

    write_and_sync(&tmp_path, contents, false).await?;

    fs::rename(&tmp_path, &abs)
        .await
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    guard.disarm();
    Ok(())
}

/// Publish a *new* file at `rel_path`, failing with
/// [`StorageError::AlreadyExists`] if the target already exists.
///
/// The payload is written and fsynced to a private temp file which is then
/// hard-linked to the target. Linking is atomic and refuses to overwrite, so
/// concurrent publishers of the same path see exactly one winner and readers
/// never observe a partially written target.
pub async fn write_new(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = unique_tmp_path(&abs);
    // The temp name is always removed: on success the link keeps the data.
    let _guard = TempFileGuard::new(tmp_path.clone());

    write_and_sync(&tmp_path, contents, true).await?;

    fs::hard_link(&tmp_path, &abs)
        .await
        .map_err(|e| classify_io(&abs, e))
}

/// Create a new immutable file at `rel_path` with create-new semantics.
///
/// Partial files left behind by a crash are never referenced by a commit.
pub async fn write_immutable(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;
    write_and_sync(&abs, contents, true).await
}

/// Read the file at `rel_path` as UTF-8.
pub async fn read_to_string(location: &TableLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = join_local(location, rel_path);
    fs::read_to_string(&abs)
        .await
        .map_err(|e| classify_io(&abs, e))
}

/// Read the whole file at `rel_path` into memory.
pub async fn read_all_bytes(location: &TableLocation, rel_path: &Path) -> StorageResult<Bytes> {
    let abs = join_local(location, rel_path);
    fs::read(&abs)
        .await
        .map(Bytes::from)
        .map_err(|e| classify_io(&abs, e))
}

/// Whether `rel_path` exists under `location`.
pub async fn exists(location: &TableLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = join_local(location, rel_path);
    fs::try_exists(&abs)
        .await
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })
}

/// Remove a single file. A missing file is not an error.
pub async fn remove_file(location: &TableLocation, rel_path: &Path) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    match fs::remove_file(&abs).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify_io(&abs, e)),
    }
}

/// Move `from` to `to`, both relative to the root. Missing parents of `to`
/// are created. Both paths must live on the same filesystem.
pub async fn rename(location: &TableLocation, from: &Path, to: &Path) -> StorageResult<()> {
    let src = join_local(location, from);
    let dst = join_local(location, to);
    create_parent_dir(&dst).await?;
    fs::rename(&src, &dst)
        .await
        .map_err(|e| classify_io(&src, e))
}

/// Remove a directory tree below the root. A missing directory is not an
/// error.
pub async fn remove_dir_all(location: &TableLocation, rel_path: &Path) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    match fs::remove_dir_all(&abs).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(classify_io(&abs, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn write_atomic_replaces_content() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("nested/dir/file.txt");

        write_atomic(&location, rel, b"one").await?;
        write_atomic(&location, rel, b"two").await?;

        assert_eq!(read_to_string(&location, rel).await?, "two");
        Ok(())
    }

    #[tokio::test]
    async fn write_new_refuses_to_overwrite() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let rel = Path::new("log/0000000001.json");

        write_new(&location, rel, b"first").await?;
        let err = write_new(&location, rel, b"second").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(read_to_string(&location, rel).await?, "first");

        // No temp files are left next to the published file.
        let names: Vec<_> = std::fs::read_dir(tmp.path().join("log"))?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<Result<_, _>>()?;
        assert_eq!(names.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let err = read_all_bytes(&location, Path::new("nope.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!exists(&location, Path::new("nope.bin")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn rename_moves_directories_and_creates_parents() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        write_atomic(&location, Path::new("a/b.txt"), b"x").await?;

        rename(&location, Path::new("a"), Path::new("parked/deep/a")).await?;

        assert!(!exists(&location, Path::new("a")).await?);
        assert_eq!(read_to_string(&location, Path::new("parked/deep/a/b.txt")).await?, "x");

        remove_dir_all(&location, Path::new("parked")).await?;
        remove_dir_all(&location, Path::new("parked")).await?;
        assert!(tmp.path().exists());
        assert_eq!(std::fs::read_dir(tmp.path())?.count(), 0);
        Ok(())
    }
}
