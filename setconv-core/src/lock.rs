use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{ConverterError, Result};

/// Advisory exclusive lock guarding one output archive path.
///
/// Held through `<output>.lock` for as long as the value lives; callers take
/// it before starting a conversion so two runs never write the same archive.
pub struct OutputLock {
    file: File,
    path: PathBuf,
}

impl OutputLock {
    pub fn lock_path_for(output: &Path) -> PathBuf {
        let mut path = output.as_os_str().to_owned();
        path.push(".lock");
        PathBuf::from(path)
    }

    fn open(output: &Path) -> Result<(File, PathBuf)> {
        let path = Self::lock_path_for(output);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        Ok((file, path))
    }

    /// Block until no other run holds the output path.
    pub fn acquire(output: &Path) -> Result<Self> {
        let (file, path) = Self::open(output)?;
        file.lock_exclusive().map_err(|e| {
            ConverterError::Lock(format!("failed to lock {}: {}", path.display(), e))
        })?;
        info!("acquired output lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Fail right away if another run holds the output path.
    pub fn try_acquire(output: &Path) -> Result<Self> {
        let (file, path) = Self::open(output)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                info!("acquired output lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(ConverterError::Lock(format!(
                    "another conversion is writing {}",
                    output.display()
                )))
            }
            Err(e) => Err(ConverterError::Lock(format!(
                "failed to lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("released output lock {}", self.path.display());
    }
}
