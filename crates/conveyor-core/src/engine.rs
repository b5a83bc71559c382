//! Batch processing engine
//!
//! The engine consumes one batch of input records and produces a total
//! accounting: every record ends up either in the valid output or in the
//! error list, never silently dropped. Within one run:
//!
//! 1. Each record is mapped to a candidate output and checked against the
//!    record-level rules; failures are captured per record.
//! 2. The surviving candidates are checked against the collection-level
//!    rules; any violation rejects the whole window before commit.
//! 3. The committer receives the valid set exactly once per window. A
//!    commit failure demotes the whole window to errors.
//!
//! Large inputs are chunked into fixed-size windows (default 10,000) so
//! memory stays bounded and each window commits independently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::rules::{BatchRule, Rule, RuleSet, RuleViolation};

/// Default window size for chunked processing
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Boxed mapping function from input to candidate output
pub type MapFn<TIn, TOut> = Box<dyn Fn(&TIn) -> Result<TOut> + Send + Sync>;

/// Boxed per-item hook run after mapping, before rule evaluation
pub type ItemHookFn<TIn, TOut> = Box<dyn Fn(&TIn, &mut TOut) -> Result<()> + Send + Sync>;

/// Why a record landed in the error set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessErrorKind {
    /// One or more record-level rules failed
    Validation,
    /// A collection-level rule rejected the whole window
    CollectionRule,
    /// Mapping or hook execution failed for this record
    Unexpected,
    /// The committer failed; the whole window was demoted
    CommitFailed,
}

impl ProcessErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessErrorKind::Validation => "validation",
            ProcessErrorKind::CollectionRule => "collection_rule",
            ProcessErrorKind::Unexpected => "unexpected",
            ProcessErrorKind::CommitFailed => "commit_failed",
        }
    }
}

impl std::fmt::Display for ProcessErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error detail attached to a failed record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ProcessErrorKind,
    pub message: String,
}

/// A record that failed processing, with the reason and the record itself
///
/// The summary `error.message` carries the first violation; `violations`
/// retains all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessError<T> {
    pub error: ErrorDetail,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<RuleViolation>,
    pub item: T,
}

impl<T> ProcessError<T> {
    pub fn validation(item: T, violations: Vec<RuleViolation>) -> Self {
        let message = violations
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| "validation failed".to_string());
        Self {
            error: ErrorDetail {
                kind: ProcessErrorKind::Validation,
                message,
            },
            violations,
            item,
        }
    }

    pub fn collection(item: T, violations: Vec<RuleViolation>) -> Self {
        let message = violations
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| "collection rule failed".to_string());
        Self {
            error: ErrorDetail {
                kind: ProcessErrorKind::CollectionRule,
                message,
            },
            violations,
            item,
        }
    }

    pub fn unexpected(item: T, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                kind: ProcessErrorKind::Unexpected,
                message: message.into(),
            },
            violations: Vec::new(),
            item,
        }
    }

    pub fn commit_failed(item: T, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                kind: ProcessErrorKind::CommitFailed,
                message: message.into(),
            },
            violations: Vec::new(),
            item,
        }
    }
}

/// Counters returned by a committer for one window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitStats {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CommitStats {
    /// Stats for a commit that only added records
    pub fn added(count: u64) -> Self {
        Self {
            added: count,
            ..Default::default()
        }
    }

    /// Fold another window's stats into this one
    pub fn merge(&mut self, other: CommitStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
        self.warnings.extend(other.warnings);
    }
}

/// Receives the valid records of one window, exactly once per window
///
/// The batch is mutable so a committer can back-fill generated identifiers
/// onto the records before they are persisted in the snapshot. A returned
/// error demotes the whole window to [`ProcessErrorKind::CommitFailed`];
/// side effects the committer already performed are not rolled back, so
/// implementations should be idempotent.
#[async_trait]
pub trait Committer<T>: Send + Sync {
    async fn commit(&self, batch: &mut [T]) -> Result<CommitStats>;
}

/// Committer that accepts everything and does nothing (dry runs, tests)
pub struct NoopCommitter;

#[async_trait]
impl<T> Committer<T> for NoopCommitter
where
    T: Send + Sync,
{
    async fn commit(&self, _batch: &mut [T]) -> Result<CommitStats> {
        Ok(CommitStats::default())
    }
}

/// Closure-backed committer for synchronous commit actions
pub struct FnCommitter<F> {
    commit_fn: F,
}

impl<F> FnCommitter<F> {
    pub fn new(commit_fn: F) -> Self {
        Self { commit_fn }
    }
}

#[async_trait]
impl<T, F> Committer<T> for FnCommitter<F>
where
    T: Send + Sync,
    F: Fn(&mut [T]) -> Result<CommitStats> + Send + Sync,
{
    async fn commit(&self, batch: &mut [T]) -> Result<CommitStats> {
        (self.commit_fn)(batch)
    }
}

/// Complete accounting of one engine run
#[derive(Debug)]
pub struct EngineOutcome<TIn, TOut> {
    /// Records that passed every rule and were committed
    pub valid_items: Vec<TOut>,
    /// Records that failed, with reasons
    pub errors: Vec<ProcessError<TIn>>,
    /// Number of input records consumed
    pub processed_count: u64,
    /// Accumulated committer counters across windows
    pub commit_stats: CommitStats,
    /// Non-fatal observations (empty input, skipped commits)
    pub warnings: Vec<String>,
    /// Wall-clock time from first record to final commit
    pub load_time: Duration,
}

impl<TIn, TOut> EngineOutcome<TIn, TOut> {
    pub fn valid_count(&self) -> u64 {
        self.valid_items.len() as u64
    }

    pub fn error_count(&self) -> u64 {
        self.errors.len() as u64
    }

    /// Every input record must be accounted for in exactly one bucket
    pub fn is_exhaustive(&self) -> bool {
        self.valid_count() + self.error_count() == self.processed_count
    }
}

/// The batch processing engine
///
/// Owns the mapping function, the rule sets, and the committer for one
/// pipeline stage. Construction is usually done through
/// [`PipelineBuilder`](crate::pipeline::PipelineBuilder).
pub struct BatchEngine<TIn, TOut> {
    mapper: MapFn<TIn, TOut>,
    before_item: Option<ItemHookFn<TIn, TOut>>,
    rules: RuleSet<TOut>,
    batch_rules: Vec<Box<dyn BatchRule<TOut>>>,
    committer: Arc<dyn Committer<TOut>>,
    chunk_size: usize,
}

impl<TIn, TOut> BatchEngine<TIn, TOut>
where
    TIn: Send + Sync + 'static,
    TOut: Send + Sync + 'static,
{
    pub fn new(
        mapper: impl Fn(&TIn) -> Result<TOut> + Send + Sync + 'static,
        committer: Arc<dyn Committer<TOut>>,
    ) -> Self {
        Self {
            mapper: Box::new(mapper),
            before_item: None,
            rules: RuleSet::new(),
            batch_rules: Vec::new(),
            committer,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_before_item(
        mut self,
        hook: impl Fn(&TIn, &mut TOut) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_item = Some(Box::new(hook));
        self
    }

    pub fn with_rule(mut self, rule: impl Rule<TOut> + 'static) -> Self {
        self.rules.add(rule);
        self
    }

    pub fn with_rules(mut self, rules: RuleSet<TOut>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_batch_rule(mut self, rule: impl BatchRule<TOut> + 'static) -> Self {
        self.batch_rules.push(Box::new(rule));
        self
    }

    pub fn with_batch_rules(mut self, rules: Vec<Box<dyn BatchRule<TOut>>>) -> Self {
        self.batch_rules = rules;
        self
    }

    /// Override the window size; values below 1 are clamped to 1
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Process one batch of records to a total outcome
    ///
    /// Never returns an error: per-record and per-window failures are
    /// captured in the outcome so every input record is accounted for.
    pub async fn process(&self, records: Vec<TIn>) -> EngineOutcome<TIn, TOut> {
        let started = Instant::now();
        let total = records.len();

        let mut valid_items = Vec::new();
        let mut errors = Vec::new();
        let mut commit_stats = CommitStats::default();
        let mut warnings = Vec::new();

        if records.is_empty() {
            warnings.push("no input records".to_string());
        }

        let mut remaining = records.into_iter();
        loop {
            let window: Vec<TIn> = remaining.by_ref().take(self.chunk_size).collect();
            if window.is_empty() {
                break;
            }
            self.process_window(
                window,
                &mut valid_items,
                &mut errors,
                &mut commit_stats,
                &mut warnings,
            )
            .await;
        }

        let outcome = EngineOutcome {
            valid_items,
            errors,
            processed_count: total as u64,
            commit_stats,
            warnings,
            load_time: started.elapsed(),
        };

        debug!(
            processed = outcome.processed_count,
            valid = outcome.valid_count(),
            errors = outcome.error_count(),
            load_time_ms = outcome.load_time.as_millis() as u64,
            "Engine run finished"
        );

        outcome
    }

    async fn process_window(
        &self,
        window: Vec<TIn>,
        out_valid: &mut Vec<TOut>,
        out_errors: &mut Vec<ProcessError<TIn>>,
        commit_stats: &mut CommitStats,
        warnings: &mut Vec<String>,
    ) {
        let window_len = window.len();

        // pending_in[i] pairs with pending_out[i] so a window-level failure
        // can demote every record with its original input attached
        let mut pending_in: Vec<TIn> = Vec::with_capacity(window_len);
        let mut pending_out: Vec<TOut> = Vec::with_capacity(window_len);

        for record in window {
            let mut candidate = match (self.mapper)(&record) {
                Ok(candidate) => candidate,
                Err(e) => {
                    out_errors.push(ProcessError::unexpected(record, format!("{e:#}")));
                    continue;
                },
            };

            if let Some(hook) = &self.before_item {
                if let Err(e) = hook(&record, &mut candidate) {
                    out_errors.push(ProcessError::unexpected(record, format!("{e:#}")));
                    continue;
                }
            }

            let violations = self.rules.evaluate(&candidate);
            if violations.is_empty() {
                pending_in.push(record);
                pending_out.push(candidate);
            } else {
                out_errors.push(ProcessError::validation(record, violations));
            }
        }

        // Collection rules see the window's surviving candidates as a whole;
        // any violation rejects the window before the committer runs.
        let mut batch_violations = Vec::new();
        for rule in &self.batch_rules {
            batch_violations.extend(rule.evaluate(&pending_out));
        }
        if !batch_violations.is_empty() {
            warn!(
                violations = batch_violations.len(),
                window_size = window_len,
                "Collection rules rejected window; nothing committed"
            );
            for record in pending_in {
                out_errors.push(ProcessError::collection(record, batch_violations.clone()));
            }
            return;
        }

        if pending_out.is_empty() {
            warnings.push(format!(
                "window of {window_len} records produced no valid items; commit skipped"
            ));
            return;
        }

        match self.committer.commit(&mut pending_out).await {
            Ok(stats) => {
                commit_stats.merge(stats);
                out_valid.append(&mut pending_out);
            },
            Err(e) => {
                error!(
                    error = %e,
                    pending = pending_out.len(),
                    "Commit failed; demoting window to errors"
                );
                let message = format!("failed to commit: {e:#}");
                for record in pending_in {
                    out_errors.push(ProcessError::commit_failed(record, message.clone()));
                }
            },
        }
    }
}
