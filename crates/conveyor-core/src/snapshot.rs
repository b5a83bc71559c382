//! Snapshots and their store
//!
//! A snapshot is the persisted, immutable result of one pipeline run over
//! one batch: the valid output items, every failed record with its reason,
//! the counters, and the timings. Snapshots are written as one
//! human-readable JSON document per (flow code, correlation id, batch id)
//! and double as the input for the next stage in a chain.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use conveyor_common::docfile;
use conveyor_common::{FlowError, Result};

use crate::engine::{EngineOutcome, ProcessError};
use crate::flow::validate_code;
use crate::pipeline::BatchContext;

/// The persisted result of one pipeline run over one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<TIn, TOut> {
    pub flow_code: String,
    pub correlation_id: Uuid,
    pub batch_id: u64,
    /// Number of input records consumed; always equals
    /// `valid_items.len() + errors.len()`
    pub processed_count: u64,
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub load_time_secs: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    pub valid_items: Vec<TOut>,
    pub errors: Vec<ProcessError<TIn>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<TIn, TOut> Snapshot<TIn, TOut> {
    /// Assemble a snapshot from an engine outcome and its batch context
    pub fn from_outcome(
        flow_code: &str,
        ctx: &BatchContext,
        outcome: EngineOutcome<TIn, TOut>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut warnings = outcome.warnings;
        warnings.extend(outcome.commit_stats.warnings);

        Self {
            flow_code: flow_code.to_string(),
            correlation_id: ctx.correlation_id,
            batch_id: ctx.batch_id,
            processed_count: outcome.processed_count,
            added: outcome.commit_stats.added,
            updated: outcome.commit_stats.updated,
            removed: outcome.commit_stats.removed,
            load_time_secs: outcome.load_time.as_secs_f64(),
            started_at,
            completed_at: Utc::now(),
            source_address: ctx.source_address.clone(),
            valid_items: outcome.valid_items,
            errors: outcome.errors,
            warnings,
        }
    }

    pub fn valid_count(&self) -> u64 {
        self.valid_items.len() as u64
    }

    pub fn error_count(&self) -> u64 {
        self.errors.len() as u64
    }

    pub fn is_fully_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Filesystem store of snapshot documents, one flat directory per stage
///
/// Canonical file name is `{code}.{correlation}.{batch:06}.json`. If the
/// canonical name is already taken, an incrementing numeric suffix is
/// appended (`.1`, `.2`, ...); retrieval resolves to the highest suffix.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical document name for one batch
    pub fn document_name(code: &str, correlation_id: &Uuid, batch_id: u64) -> String {
        format!("{code}.{correlation_id}.{batch_id:06}.json")
    }

    /// Persist a snapshot, returning the path it was written to
    pub fn save<TIn, TOut>(&self, snapshot: &Snapshot<TIn, TOut>) -> Result<PathBuf>
    where
        TIn: Serialize,
        TOut: Serialize,
    {
        validate_code(&snapshot.flow_code)?;
        fs::create_dir_all(&self.root)?;

        let base = self.root.join(Self::document_name(
            &snapshot.flow_code,
            &snapshot.correlation_id,
            snapshot.batch_id,
        ));
        let path = claim_available(&base)?;

        // Snapshots are immutable once persisted; write the claimed name
        // through a temp sibling so readers never see a torn document.
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = suffixed(&path, "tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        debug!(
            flow = %snapshot.flow_code,
            batch_id = snapshot.batch_id,
            path = %path.display(),
            "Snapshot saved"
        );
        Ok(path)
    }

    /// Load the snapshot for one batch, resolving collision suffixes to
    /// the most recent write
    pub fn load<TIn, TOut>(
        &self,
        code: &str,
        correlation_id: &Uuid,
        batch_id: u64,
    ) -> Result<Snapshot<TIn, TOut>>
    where
        TIn: DeserializeOwned,
        TOut: DeserializeOwned,
    {
        let path = self.resolve(code, correlation_id, batch_id)?;
        docfile::load_required(&path)
    }

    /// Resolve the on-disk path for one batch's snapshot
    pub fn resolve(&self, code: &str, correlation_id: &Uuid, batch_id: u64) -> Result<PathBuf> {
        let base = self.root.join(Self::document_name(code, correlation_id, batch_id));
        if !base.exists() {
            return Err(FlowError::DocumentNotFound(base.display().to_string()));
        }

        let mut latest = base.clone();
        let mut n = 1u32;
        loop {
            let candidate = suffixed(&base, &n.to_string());
            if !candidate.exists() {
                break;
            }
            latest = candidate;
            n += 1;
        }
        Ok(latest)
    }

    /// List every snapshot document for a flow code, sorted by file name
    pub fn list(&self, code: &str) -> Result<Vec<PathBuf>> {
        validate_code(code)?;
        let prefix = format!("{code}.");

        let mut paths = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(FlowError::Io(e)),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.contains(".json") && !name.ends_with(".tmp") {
                paths.push(entry.path());
            }
        }

        paths.sort();
        Ok(paths)
    }
}

/// Claim the first free path in the collision sequence with `create_new`
fn claim_available(base: &Path) -> Result<PathBuf> {
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            base.to_path_buf()
        } else {
            suffixed(base, &attempt.to_string())
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(FlowError::Io(e)),
        }
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
