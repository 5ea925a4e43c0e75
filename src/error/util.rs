//! Utility functions for error handling
//!
//! Helpers that turn file system failures into the error variants the
//! pipeline reports for required artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, TabularError};

/// Open a file that must exist
///
/// A missing file is reported as [`TabularError::MissingShardFile`] so that
/// callers can tell an absent artifact apart from other I/O failures.
pub fn open_required(path: &Path) -> Result<fs::File> {
    match fs::File::open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(TabularError::MissingShardFile(path.to_path_buf()))
        }
        Err(e) => Err(TabularError::Io(io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))),
    }
}

/// Check that every path exists, failing on the first absent one
pub fn ensure_all_exist<'a, I>(paths: I) -> Result<()>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    for path in paths {
        if !path.is_file() {
            return Err(TabularError::MissingShardFile(path.clone()));
        }
    }
    Ok(())
}

/// Validate that a directory exists
pub fn validate_directory(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(TabularError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Directory does not exist: {}", path.display()),
        )));
    }
    Ok(())
}
