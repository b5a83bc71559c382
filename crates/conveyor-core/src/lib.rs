//! Conveyor Core Library
//!
//! Batch pipelines that move records between systems with exhaustive
//! accounting: every input record ends a run as either a valid output
//! item or an error with a reason, and the two always sum to the input.
//!
//! # Overview
//!
//! - **Rules**: named validation predicates over single records or whole
//!   collections
//! - **Readers**: finite, restartable record sources (delimited files,
//!   prior snapshots, memory)
//! - **Engine**: map, validate, partition, and commit in bounded windows
//! - **Pipeline**: a configured engine bound to a flow code, producing
//!   [`snapshot::Snapshot`] documents
//! - **Intake ledger**: records every source address a poller picked up,
//!   so nothing is processed twice
//! - **Poller**: feeds new files from a directory through a pipeline on
//!   a timer, oldest first
//!
//! # Example
//!
//! ```no_run
//! use conveyor_core::pipeline::{BatchContext, Pipeline};
//! use conveyor_core::rules::rule;
//!
//! #[derive(Clone, serde::Serialize, serde::Deserialize)]
//! struct Order {
//!     key: String,
//!     amount: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::<Order, Order>::builder("orders")
//!         .map_from()
//!         .rule(rule("amount-not-negative", |o: &Order| {
//!             (o.amount < 0).then(|| "amount is negative".to_string())
//!         }))
//!         .build()?;
//!
//!     let order = Order { key: "a-1".to_string(), amount: 10 };
//!     let snapshot = pipeline.process(vec![order], &BatchContext::new(1)).await;
//!     println!("valid: {} errors: {}", snapshot.valid_count(), snapshot.error_count());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod config;
pub mod engine;
pub mod flow;
pub mod intake;
pub mod pipeline;
pub mod poller;
pub mod reader;
pub mod rules;
pub mod snapshot;

// Re-export commonly used types
pub use config::PollerConfig;
pub use engine::{BatchEngine, CommitStats, Committer, EngineOutcome, ProcessError};
pub use flow::{FlowEntity, FlowId, FlowRegistry};
pub use intake::{IntakeEntry, IntakeLog};
pub use pipeline::{BatchContext, Pipeline, PipelineBuilder};
pub use poller::{FlowFileProcessed, FlowPoller};
pub use reader::{DelimitedFileReader, MemoryReader, RecordReader, SnapshotReader, TextRecord};
pub use rules::{rule, unique_by, Rule, RuleSet, RuleViolation};
pub use snapshot::{Snapshot, SnapshotStore};
