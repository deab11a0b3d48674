//! Browser executable discovery and the process-wide binary cache
//!
//! Some deployments ship Chromium as a single self-contained binary on a
//! read-only or slow filesystem. [`ExecutableCache`] copies that binary into
//! a writable cache directory the first time a session needs it; every later
//! launch reuses the copy.

use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;
use tracing::{info, instrument};

/// Lazily populated copy of the browser executable.
///
/// Initialization is single-flight: concurrent first callers all await the
/// same copy instead of racing duplicate writes. A failed copy leaves the
/// cell empty so the next request tries again. The cache is never
/// invalidated.
#[derive(Debug)]
pub struct ExecutableCache {
    dir: PathBuf,
    cached: OnceCell<PathBuf>,
}

impl ExecutableCache {
    /// Create a cache rooted at `dir`. Nothing is copied until [`resolve`](Self::resolve).
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            cached: OnceCell::new(),
        }
    }

    /// Path of the cached copy if it has been created already
    pub fn cached_path(&self) -> Option<&Path> {
        self.cached.get().map(PathBuf::as_path)
    }

    /// Return the cached copy of `source`, creating it on first use.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn resolve(&self, source: &Path) -> io::Result<PathBuf> {
        let path = self
            .cached
            .get_or_try_init(|| copy_executable(source, &self.dir))
            .await?;
        Ok(path.clone())
    }
}

async fn copy_executable(source: &Path, dir: &Path) -> io::Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("browser path has no file name: {}", source.display()),
        )
    })?;
    let target = dir.join(file_name);

    let source_meta = tokio::fs::metadata(source).await?;
    tokio::fs::create_dir_all(dir).await?;

    // Each process copies once and renames over whatever an earlier process
    // left behind; a concurrent process never sees a half-written executable.
    let staging = dir.join(format!(
        ".{}.{}.partial",
        file_name.to_string_lossy(),
        std::process::id()
    ));
    tokio::fs::copy(source, &staging).await?;
    tokio::fs::rename(&staging, &target).await?;

    info!(
        source = %source.display(),
        target = %target.display(),
        bytes = source_meta.len(),
        "Cached browser executable"
    );
    Ok(target)
}
