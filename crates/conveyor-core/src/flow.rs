//! Flow identity and registry
//!
//! A flow is one configured movement of data, identified by a short code
//! that appears in every document name the flow produces. The registry
//! keeps one small JSON document per flow holding its creation date and
//! the last batch id it handed out.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use conveyor_common::docfile;
use conveyor_common::{FlowError, Result};

/// Check that a flow code is safe to embed in document names
///
/// Codes are restricted to ASCII letters, digits, `_` and `-` so they can
/// never escape the store directory or collide with name separators.
pub fn validate_code(code: &str) -> Result<()> {
    let ok = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(FlowError::InvalidCode(code.to_string()))
    }
}

/// Kind of business record a flow carries, e.g. `orders` or `customers`
///
/// Shares the flow-code character set since it is embedded in ledger
/// document names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowEntity(String);

impl FlowEntity {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_code(&name).map_err(|_| FlowError::InvalidEntity(name.clone()))?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FlowEntity {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Identity of a registered flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowId {
    pub code: String,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FlowDocument {
    code: String,
    created_date: DateTime<Utc>,
    last_batch_id: u64,
}

/// Filesystem-backed registry of flows and their batch counters
///
/// One `{code}.flow.json` document per flow. Batch ids are persisted
/// before they are returned, so a crash mid-batch burns an id instead of
/// reusing one.
pub struct FlowRegistry {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FlowRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, code: &str) -> Result<PathBuf> {
        validate_code(code)?;
        Ok(self.root.join(format!("{code}.flow.json")))
    }

    /// Return the flow's identity, registering it on first sight
    pub fn ensure_flow(&self, code: &str) -> Result<FlowId> {
        let path = self.document_path(code)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(doc) = docfile::load_document::<FlowDocument>(&path)? {
            return Ok(FlowId {
                code: doc.code,
                created_date: doc.created_date,
            });
        }

        let doc = FlowDocument {
            code: code.to_string(),
            created_date: Utc::now(),
            last_batch_id: 0,
        };
        docfile::store_document(&path, &doc)?;
        info!(flow = %code, "Registered new flow");

        Ok(FlowId {
            code: doc.code,
            created_date: doc.created_date,
        })
    }

    /// Hand out the next batch id for a flow, persisting the counter first
    pub fn next_batch_id(&self, code: &str) -> Result<u64> {
        let path = self.document_path(code)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut doc = match docfile::load_document::<FlowDocument>(&path)? {
            Some(doc) => doc,
            None => FlowDocument {
                code: code.to_string(),
                created_date: Utc::now(),
                last_batch_id: 0,
            },
        };

        doc.last_batch_id += 1;
        docfile::store_document(&path, &doc)?;
        Ok(doc.last_batch_id)
    }

    /// Look up a flow without registering it
    pub fn flow(&self, code: &str) -> Result<Option<FlowId>> {
        let path = self.document_path(code)?;
        let doc = docfile::load_document::<FlowDocument>(&path)?;
        Ok(doc.map(|d| FlowId {
            code: d.code,
            created_date: d.created_date,
        }))
    }
}
