//! OS advisory file locks
//!
//! One lock file per resource under a lock directory. The operating system
//! drops the lock when the holding process exits, however it exits.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{debug, warn};

use super::{Acquire, LockGuard, NamedLock};
use crate::domain::{ContextId, ResourceName};
use crate::error::{CoordError, CoordResult};

/// Named locks backed by `flock`-style file locks
#[derive(Clone)]
pub struct FileLocks {
    dir: PathBuf,
}

impl FileLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, name: &ResourceName) -> PathBuf {
        self.dir.join(format!("{}.lock", name.file_stem()))
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.raw_os_error().is_some() && e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Open the lock file and try to lock it without waiting
fn try_lock_file(dir: &Path, path: &Path, holder: &ContextId) -> CoordResult<Option<File>> {
    fs::create_dir_all(dir)?;
    let mut file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {}
        Err(e) if is_contended(&e) => return Ok(None),
        Err(e) => return Err(CoordError::Lock(format!("{}: {}", path.display(), e))),
    }

    // Record the holder for humans inspecting the lock dir
    file.set_len(0)?;
    writeln!(file, "{}", holder)?;
    Ok(Some(file))
}

#[async_trait]
impl NamedLock for FileLocks {
    async fn try_acquire(&self, name: &ResourceName, holder: &ContextId) -> CoordResult<Acquire> {
        let path = self.lock_path(name);
        debug!(%name, %holder, path = %path.display(), "FileLocks::try_acquire: called");

        let dir = self.dir.clone();
        let owner = holder.clone();
        let file = tokio::task::spawn_blocking(move || try_lock_file(&dir, &path, &owner))
            .await
            .map_err(|e| CoordError::Lock(format!("lock task failed: {}", e)))??;

        let Some(file) = file else {
            debug!(%name, "FileLocks::try_acquire: busy");
            return Ok(Acquire::Busy);
        };

        let release = Box::new(move || {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(error = %e, "FileLocks: unlock failed, lock is dropped with the file");
            }
        });

        Ok(Acquire::Held(LockGuard::new(name.clone(), holder.clone(), release)))
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
