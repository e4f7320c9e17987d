//! Local snapshot of imported runs.
//!
//! The snapshot is a single JSON document:
//!
//! ```json
//! { "runs": [ ... ], "version": 1, "meta": { "updated": "2015-03-01T12:00:00Z" } }
//! ```
//!
//! `meta.updated` is the sync watermark that drives the next incremental
//! import. Runs are always stored newest first.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Run;

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// When the snapshot was last written by a successful import
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

/// An ordered set of runs plus the sync watermark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub runs: Vec<Run>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub meta: SnapshotMeta,
}

impl Snapshot {
    /// Build a snapshot stamped with `updated`. Runs are sorted newest first.
    pub fn new(mut runs: Vec<Run>, updated: DateTime<Utc>) -> Self {
        sort_runs(&mut runs);
        Self {
            runs,
            version: SNAPSHOT_VERSION,
            meta: SnapshotMeta {
                updated: Some(updated),
            },
        }
    }

    /// The sync watermark, or `None` when absent or the zero time.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.meta.updated.filter(|t| t.year() > 1)
    }

    /// Read and parse a snapshot file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read a snapshot, falling back to an empty one.
    ///
    /// A missing or unparsable file is logged and treated as "no prior
    /// import".
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(snapshot) => {
                info!(
                    "[Snapshot] {} runs loaded from {} (current as of {})",
                    snapshot.runs.len(),
                    path.display(),
                    snapshot
                        .watermark()
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S %z").to_string())
                        .unwrap_or_else(|| "never".to_string())
                );
                snapshot
            }
            Err(crate::PegasusError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                info!("[Snapshot] No snapshot at {}, starting from scratch", path.display());
                Self::default()
            }
            Err(e) => {
                warn!(
                    "[Snapshot] Could not read {}, starting from scratch: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Write the snapshot to `path`.
    ///
    /// The document is fully serialized first, written to a `.tmp` sibling,
    /// synced, and renamed over the target. The previous file is untouched
    /// until the rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec(self)?;

        let temp_path = temp_path_for(path);
        if let Err(e) = write_synced(&temp_path, &bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        // Atomic rename
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        info!("[Snapshot] Wrote {} runs to {}", self.runs.len(), path.display());
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Merge freshly imported runs over prior ones.
///
/// Runs are keyed by ID and the last write wins: a fresh run replaces the
/// prior run entirely, trace included. Prior runs with no fresh counterpart
/// are kept. The result is sorted newest first.
pub fn merge_runs(prior: Vec<Run>, fresh: Vec<Run>) -> Vec<Run> {
    let mut by_id: HashMap<String, Run> = HashMap::with_capacity(prior.len() + fresh.len());
    for run in prior.into_iter().chain(fresh) {
        by_id.insert(run.id.clone(), run);
    }

    let mut runs: Vec<Run> = by_id.into_values().collect();
    sort_runs(&mut runs);
    runs
}

/// Sort by start time descending. Runs without a start time go last; ties
/// are broken by ID so the order is deterministic.
pub fn sort_runs(runs: &mut [Run]) {
    runs.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
}
