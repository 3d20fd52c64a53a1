use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::record::ExtractionStatus;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable collection progress. Owned by the orchestrator's committer;
/// everything else only reads it at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    /// Position in the ordered keyword queue.
    pub keyword_index: usize,
    /// Pagination cursor within the current keyword; None = first page.
    pub page_cursor: Option<String>,
    /// Identities committed so far.
    pub processed: BTreeSet<String>,
    pub total_processed: u64,
    pub total_success: u64,
    pub total_partial: u64,
    pub total_failed: u64,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    pub fn fresh() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            keyword_index: 0,
            page_cursor: None,
            processed: BTreeSet::new(),
            total_processed: 0,
            total_success: 0,
            total_partial: 0,
            total_failed: 0,
            updated_at: Utc::now(),
        }
    }

    /// Account a committed record.
    pub fn record_outcome(&mut self, identity: &str, status: ExtractionStatus) {
        self.processed.insert(identity.to_string());
        self.total_processed += 1;
        match status {
            ExtractionStatus::Success => self.total_success += 1,
            ExtractionStatus::Partial => self.total_partial += 1,
            ExtractionStatus::Failed => self.total_failed += 1,
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A checkpoint exists but cannot be parsed. The caller decides whether
    /// to abort or start fresh; this module never auto-resolves it.
    #[error("corrupt checkpoint at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("checkpoint I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reads and writes the checkpoint file with write-then-rename semantics:
/// a crash mid-save leaves either the old or the new state on disk, never a
/// torn one.
pub struct CheckpointManager {
    path: PathBuf,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".tmp");
        PathBuf::from(p)
    }

    /// None means no checkpoint exists (fresh start).
    pub fn load(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: CheckpointState =
            serde_json::from_str(&raw).map_err(|e| CheckpointError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if state.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Corrupt {
                path: self.path.clone(),
                reason: format!("unsupported version {}", state.version),
            });
        }
        Ok(Some(state))
    }

    pub fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Discard any persisted checkpoint (fresh-start policy).
    pub fn reset(&self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("checkpoint discarded: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, CheckpointManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("checkpoint.json"));
        (dir, mgr)
    }

    #[test]
    fn missing_file_is_fresh() {
        let (_dir, mgr) = manager();
        assert!(mgr.load().unwrap().is_none());
    }

    #[test]
    fn roundtrip() {
        let (_dir, mgr) = manager();
        let mut state = CheckpointState::fresh();
        state.keyword_index = 2;
        state.page_cursor = Some("201".into());
        state.record_outcome("123456789", ExtractionStatus::Partial);
        mgr.save(&state).unwrap();
        let loaded = mgr.load().unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn unparsable_file_is_corrupt_not_fresh() {
        let (_dir, mgr) = manager();
        fs::write(mgr.path(), b"{\"version\": 1, \"keyword_ind").unwrap();
        match mgr.load() {
            Err(CheckpointError::Corrupt { .. }) => {}
            other => panic!("expected Corrupt, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let (_dir, mgr) = manager();
        let mut state = CheckpointState::fresh();
        state.version = 99;
        mgr.save(&state).unwrap();
        assert!(matches!(mgr.load(), Err(CheckpointError::Corrupt { .. })));
    }

    #[test]
    fn crash_during_save_leaves_prior_state_readable() {
        let (_dir, mgr) = manager();
        let mut state = CheckpointState::fresh();
        state.keyword_index = 1;
        mgr.save(&state).unwrap();

        // Simulate a crash between the temp write and the rename: a torn
        // temp file sits next to a fully-written checkpoint.
        fs::write(mgr.tmp_path(), b"{\"version\": 1, \"keyw").unwrap();

        let loaded = mgr.load().unwrap().unwrap();
        assert_eq!(loaded.keyword_index, 1);
    }

    #[test]
    fn reset_then_fresh() {
        let (_dir, mgr) = manager();
        mgr.save(&CheckpointState::fresh()).unwrap();
        mgr.reset().unwrap();
        assert!(mgr.load().unwrap().is_none());
        // Resetting twice is fine.
        mgr.reset().unwrap();
    }
}
