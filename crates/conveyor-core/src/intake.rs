//! Intake log
//!
//! A per-(entity, flow) ledger of every source address a poller has already
//! picked up, keyed by the address and its last-modified stamp. The poller
//! consults it to skip work it has seen and records into it after every
//! attempt, success or failure, so a crashing batch is not retried forever.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use conveyor_common::docfile;
use conveyor_common::Result;

use crate::flow::{validate_code, FlowEntity};

/// One recorded pickup of a source address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeEntry {
    /// Where the records came from (file path, URL, queue name)
    pub address_id: String,
    /// Where the resulting snapshot went, when the run succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_address_id: Option<String>,
    pub batch_id: u64,
    /// Last-modified stamp of the source at pickup time; a changed stamp
    /// makes the same address new work again
    pub date_last_updated: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl IntakeEntry {
    pub fn new(
        address_id: impl Into<String>,
        batch_id: u64,
        date_last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            address_id: address_id.into(),
            target_address_id: None,
            batch_id,
            date_last_updated,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target_address_id: impl Into<String>) -> Self {
        self.target_address_id = Some(target_address_id.into());
        self
    }

    fn matches(&self, address_id: &str, date_last_updated: DateTime<Utc>) -> bool {
        self.address_id == address_id && self.date_last_updated == date_last_updated
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IntakeDocument {
    entity: FlowEntity,
    code: String,
    entries: Vec<IntakeEntry>,
}

/// Filesystem-backed intake ledger
///
/// One JSON document per (entity, flow code), named `{entity}.{code}.json`.
/// Writers within the process are serialized by a mutex; each write keeps
/// the previous document as a `.bak` sibling.
pub struct IntakeLog {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl IntakeLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the ledger document for one (entity, flow code) pair
    pub fn document_path(&self, entity: &FlowEntity, code: &str) -> Result<PathBuf> {
        validate_code(code)?;
        Ok(self.root.join(format!("{entity}.{code}.json")))
    }

    /// Whether any entry exists for the address, regardless of stamp
    pub fn contains(&self, entity: &FlowEntity, code: &str, address_id: &str) -> Result<bool> {
        let entries = self.entries(entity, code)?;
        Ok(entries.iter().any(|e| e.address_id == address_id))
    }

    /// Whether an entry exists for the exact (address, stamp) pair
    pub fn contains_entry(
        &self,
        entity: &FlowEntity,
        code: &str,
        address_id: &str,
        date_last_updated: DateTime<Utc>,
    ) -> Result<bool> {
        let entries = self.entries(entity, code)?;
        Ok(entries.iter().any(|e| e.matches(address_id, date_last_updated)))
    }

    /// Record a pickup; returns false when the (address, stamp) pair is
    /// already present and the ledger is left untouched
    pub fn add(&self, entity: &FlowEntity, code: &str, entry: IntakeEntry) -> Result<bool> {
        let path = self.document_path(entity, code)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut doc = match docfile::load_document::<IntakeDocument>(&path)? {
            Some(doc) => doc,
            None => IntakeDocument {
                entity: entity.clone(),
                code: code.to_string(),
                entries: Vec::new(),
            },
        };

        if doc
            .entries
            .iter()
            .any(|e| e.matches(&entry.address_id, entry.date_last_updated))
        {
            debug!(
                entity = %entity,
                flow = %code,
                address = %entry.address_id,
                "Intake entry already recorded; skipping"
            );
            return Ok(false);
        }

        debug!(
            entity = %entity,
            flow = %code,
            address = %entry.address_id,
            batch_id = entry.batch_id,
            "Recording intake entry"
        );
        doc.entries.push(entry);
        docfile::store_document(&path, &doc)?;
        Ok(true)
    }

    /// All recorded entries for one (entity, flow code), oldest first
    pub fn entries(&self, entity: &FlowEntity, code: &str) -> Result<Vec<IntakeEntry>> {
        let path = self.document_path(entity, code)?;
        let doc = docfile::load_document::<IntakeDocument>(&path)?;
        Ok(doc.map(|d| d.entries).unwrap_or_default())
    }
}
