//! # Snapshot Store
//!
//! File-backed single-record store shared by the gateway (writer) and the
//! HTTP adapter (reader).
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the canonical path, so a reader sees either the previous complete
//! snapshot or the new complete snapshot. Readers take no locks.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::snapshot::TelemetrySnapshot;

/// Default snapshot location shared by both processes
pub const DEFAULT_SNAPSHOT_PATH: &str = "/tmp/cansat_latest_data.json";

/// Latest-snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Canonical snapshot path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored snapshot
    ///
    /// The parent directory is created if missing. On error the previous
    /// snapshot, if any, is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if serialization or any filesystem step fails
    pub fn write(&self, snapshot: &TelemetrySnapshot) -> Result<(), StoreError> {
        let json = snapshot.to_json().map_err(StoreError::Serialize)?;

        let dir = self.directory();
        fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        make_world_readable(tmp.as_file()).map_err(|e| self.io_error(e))?;

        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        // The new snapshot is already visible; this only makes the rename
        // survive a power loss.
        if let Err(e) = sync_directory(dir) {
            warn!("Snapshot written but {} could not be synced: {}", dir.display(), e);
        }

        debug!("Snapshot written to {} ({} bytes)", self.path.display(), json.len());
        Ok(())
    }

    /// Load the stored snapshot
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - no snapshot has been written yet
    /// * `Ok(Some(snapshot))` - the latest complete snapshot
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Parse`] if the file does not hold a snapshot
    pub fn read(&self) -> Result<Option<TelemetrySnapshot>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        TelemetrySnapshot::from_json(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Temp files are created owner-only; the HTTP adapter may run as another user
#[cfg(unix)]
fn make_world_readable(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_world_readable(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

/// Flush directory entries so a completed rename is durable
#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}
