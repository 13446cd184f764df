//! Compaction journal.
//!
//! Every merge step is committed in two phases. Outputs are first written next to
//! their final names as staging files, then a journal naming the inputs and outputs
//! is made durable. Once the journal exists the step is committed: staging files are
//! renamed, inputs deleted and the journal removed. Recovery replays a present
//! journal, which is idempotent, and discards staging files no journal refers to.

use crate::error::{Error, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the journal inside the table directory
pub const JOURNAL_FILE: &str = "COMPACTION";

/// Extension of staged compaction outputs
pub const STAGING_EXTENSION: &str = "tmp";

/// A staged output and the name it is committed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedOutput {
    /// Staging path, relative to the table directory
    pub staged: PathBuf,
    /// Final path, relative to the table directory
    pub target: PathBuf,
}

/// One committed merge step
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompactionRecord {
    /// Consumed tables, relative to the table directory
    pub inputs: Vec<PathBuf>,
    /// Produced tables
    pub outputs: Vec<StagedOutput>,
}

impl CompactionRecord {
    /// Make the record durable in `dir`, committing the step
    pub fn commit(&self, dir: &Path, sync: bool) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(JOURNAL_FILE))?;
        file.write_all(&json)?;
        if sync {
            file.sync_all()?;
            sync_dir(dir)?;
        }
        debug!(
            "Compaction journal written: {} inputs, {} outputs",
            self.inputs.len(),
            self.outputs.len()
        );
        Ok(())
    }

    /// Carry out the renames and deletions named by the record.
    ///
    /// Safe to call repeatedly: steps already done are skipped.
    pub fn apply(&self, dir: &Path) -> Result<()> {
        for output in &self.outputs {
            let staged = dir.join(&output.staged);
            if staged.exists() {
                fs::rename(&staged, dir.join(&output.target))?;
            } else if !dir.join(&output.target).exists() {
                return Err(Error::corruption(format!(
                    "Compaction output {} missing in both staged and final form",
                    output.target.display()
                )));
            }
        }

        for input in &self.inputs {
            match fs::remove_file(dir.join(input)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove the journal, completing the step
    pub fn finish(dir: &Path) -> Result<()> {
        match fs::remove_file(dir.join(JOURNAL_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the journal of `dir`, if any.
    ///
    /// A journal that does not parse was torn while being written, so its step never
    /// committed; it is reported as absent.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(JOURNAL_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding torn compaction journal {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

/// Finish or discard whatever compaction step was interrupted in `dir`.
///
/// `level_dirs` are scanned for staging files left behind by a step that never
/// committed. Returns whether a journal was replayed.
pub fn recover(dir: &Path, level_dirs: &[PathBuf]) -> Result<bool> {
    let replayed = match CompactionRecord::load(dir)? {
        Some(record) => {
            info!(
                "Rolling forward interrupted compaction: {} inputs, {} outputs",
                record.inputs.len(),
                record.outputs.len()
            );
            record.apply(dir)?;
            true
        }
        None => false,
    };
    CompactionRecord::finish(dir)?;

    for level_dir in level_dirs {
        for entry in fs::read_dir(level_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == STAGING_EXTENSION) {
                warn!("Removing uncommitted compaction output {}", path.display());
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(replayed)
}

/// fsync a directory so that renames and creations inside it are durable
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
