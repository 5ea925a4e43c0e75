//! Read-through cache of pipeline artifacts
//!
//! Any number of processes may read a completed artifact. Writing is
//! exclusive: a writer claims `.<name>.lock` next to the artifact with an
//! atomic `create_new`, computes the value, publishes it by temp file and
//! rename, then drops the lock. Readers therefore see the artifact either
//! absent or complete.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::utils::logging::log_warning;

/// An artifact that can be stored in and loaded from a single file
pub trait CachedArtifact: Sized {
    /// Load the artifact from a complete file
    fn read_from(path: &Path) -> Result<Self>;

    /// Publish the artifact at `path`; implementations must write atomically
    fn write_to(&self, path: &Path) -> Result<()>;
}

/// Result of [`ArtifactCache::get_or_compute`]
#[derive(Debug)]
pub enum CacheOutcome<T> {
    /// The artifact was computed and published by this call
    Computed(T),
    /// A complete artifact was already present and has been read
    Cached(T),
    /// Another writer holds the lock; nothing was read or computed
    Locked,
}

impl<T> CacheOutcome<T> {
    /// The artifact, unless another writer held the lock
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Computed(value) | Self::Cached(value) => Some(value),
            Self::Locked => None,
        }
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }
}

/// Exclusive claim on an artifact path, released on drop
#[derive(Debug)]
pub struct ArtifactLock {
    path: PathBuf,
}

impl ArtifactLock {
    /// Lock file guarding `artifact`
    #[must_use]
    pub fn lock_path(artifact: &Path) -> PathBuf {
        let name = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        artifact.with_file_name(format!(".{name}.lock"))
    }

    /// Try to claim `artifact`; `Ok(None)` when another writer holds it
    pub fn try_acquire(artifact: &Path) -> Result<Option<Self>> {
        let path = Self::lock_path(artifact);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the lock guarding `artifact`, whoever holds it
    pub fn break_lock(artifact: &Path) -> Result<()> {
        match fs::remove_file(Self::lock_path(artifact)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release lock {}: {e}", self.path.display());
        }
    }
}

/// Cache policy shared by every stage of a run
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactCache {
    overwrite: bool,
}

impl ArtifactCache {
    /// `overwrite` recomputes artifacts even when a complete file exists,
    /// and breaks locks left by other writers
    #[must_use]
    pub const fn new(overwrite: bool) -> Self {
        Self { overwrite }
    }

    /// Whether a complete artifact at `path` may be reused
    #[must_use]
    pub fn is_fresh(&self, path: &Path) -> bool {
        !self.overwrite && path.is_file()
    }

    /// Read the artifact at `path`, or compute and publish it
    pub fn get_or_compute<T, F>(&self, path: &Path, compute: F) -> Result<CacheOutcome<T>>
    where
        T: CachedArtifact,
        F: FnOnce() -> Result<T>,
    {
        self.resolve(path, compute, T::read_from, |value| value)
    }

    /// Make sure a complete artifact exists at `path`, computing and
    /// publishing it if needed
    ///
    /// Unlike [`Self::get_or_compute`], a complete artifact is not read.
    pub fn ensure<T, F>(&self, path: &Path, compute: F) -> Result<CacheOutcome<()>>
    where
        T: CachedArtifact,
        F: FnOnce() -> Result<T>,
    {
        self.resolve(path, compute, |_| Ok(()), |_| ())
    }

    fn claim(&self, path: &Path) -> Result<Option<ArtifactLock>> {
        if let Some(lock) = ArtifactLock::try_acquire(path)? {
            return Ok(Some(lock));
        }
        if !self.overwrite {
            return Ok(None);
        }
        log_warning(
            "Breaking the lock of another writer to overwrite",
            Some(&ArtifactLock::lock_path(path)),
        );
        ArtifactLock::break_lock(path)?;
        ArtifactLock::try_acquire(path)
    }

    fn resolve<T, U, F, R, K>(&self, path: &Path, compute: F, reuse: R, keep: K) -> Result<CacheOutcome<U>>
    where
        T: CachedArtifact,
        F: FnOnce() -> Result<T>,
        R: Fn(&Path) -> Result<U>,
        K: FnOnce(T) -> U,
    {
        if self.is_fresh(path) {
            return reuse(path).map(CacheOutcome::Cached);
        }

        let Some(_lock) = self.claim(path)? else {
            log_warning(
                "Artifact is locked by another writer, skipping",
                Some(&ArtifactLock::lock_path(path)),
            );
            return Ok(CacheOutcome::Locked);
        };

        // Another writer may have finished between the check and the claim.
        if self.is_fresh(path) {
            return reuse(path).map(CacheOutcome::Cached);
        }

        let value = compute()?;
        value.write_to(path)?;
        Ok(CacheOutcome::Computed(keep(value)))
    }
}
