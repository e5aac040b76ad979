//! Output files written by the sampler.
//!
//! Every sampler session writes to `{dir}/{prefix}{timecode}`. Starting a
//! session first deletes every file carrying the prefix, so a reader can
//! never pick up frames left behind by an earlier run.
//!
//! The sampler runs as root but the dashboard does not, and `/tmp` is
//! sticky. The output file is therefore created by the invoking user before
//! the sampler opens it, which keeps it removable without privileges. Files
//! the user still cannot unlink are reported back instead of failing the sweep.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default directory for sampler output.
pub const DEFAULT_OUTPUT_DIR: &str = "/tmp";
/// Default file-name prefix for sampler output.
pub const DEFAULT_FILE_PREFIX: &str = "siltop_powermetrics";

/// Location and naming scheme of sampler output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStore {
    dir: PathBuf,
    prefix: String,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR, DEFAULT_FILE_PREFIX)
    }
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Output path for the session tagged `timecode`.
    pub fn path_for(&self, timecode: &str) -> PathBuf {
        self.dir.join(format!("{}{timecode}", self.prefix))
    }

    /// All existing files that belong to this store, sorted by name.
    pub fn existing_files(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&self.prefix) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Create (or truncate) the output file for `timecode` as the current user.
    pub fn create(&self, timecode: &str) -> io::Result<PathBuf> {
        let path = self.path_for(timecode);
        File::create(&path)?;
        Ok(path)
    }

    /// Remove every file left by earlier sessions.
    ///
    /// Files the current user may not unlink end up in
    /// [`StaleSweep::blocked`]; any other failure is returned.
    pub fn clear_stale(&self) -> io::Result<StaleSweep> {
        let mut sweep = StaleSweep::default();
        for path in self.existing_files()? {
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("removed stale sampler output {}", path.display());
                    sweep.removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    log::debug!("cannot remove {}: {e}", path.display());
                    sweep.blocked.push(path);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sweep)
    }

    /// Remove the output file of one session. Missing files are not an error.
    pub fn remove(&self, timecode: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(timecode)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Result of [`RecordStore::clear_stale`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StaleSweep {
    pub removed: usize,
    /// Stale files owned by someone else, typically the root sampler.
    pub blocked: Vec<PathBuf>,
}

/// Timecode derived from the current wall clock, in whole seconds.
pub fn timecode_now() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}
