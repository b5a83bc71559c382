//! Typed pipeline stages
//!
//! A [`Pipeline`] wraps a [`BatchEngine`] with a declared input/output type
//! pair, the stage's flow code, and the hooks a stage needs: mapping,
//! per-item enrichment, and commit actions. Processing one batch yields a
//! [`Snapshot`], the persisted unit of resumability.
//!
//! Stages chain: one stage's `Snapshot.valid_items` is a legal input
//! sequence for the next stage's reader.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::engine::{
    BatchEngine, CommitStats, Committer, ItemHookFn, MapFn, NoopCommitter, DEFAULT_CHUNK_SIZE,
};
use crate::reader::RecordReader;
use crate::rules::{BatchRule, Rule, RuleSet};
use crate::snapshot::Snapshot;

/// Identity of one batch run: who asked, which batch, from where
#[derive(Debug, Clone)]
pub struct BatchContext {
    /// Identity of the process run that produced the batch
    pub correlation_id: Uuid,
    /// Monotonic sequence number within the pipeline's flow code
    pub batch_id: u64,
    /// Source the batch was read from, when there is one
    pub source_address: Option<String>,
}

impl BatchContext {
    pub fn new(batch_id: u64) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            batch_id,
            source_address: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_source(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }
}

/// One ETL stage mapping `TIn` records to `TOut` records
pub struct Pipeline<TIn, TOut> {
    code: String,
    engine: BatchEngine<TIn, TOut>,
}

impl<TIn, TOut> Pipeline<TIn, TOut>
where
    TIn: Send + Sync + 'static,
    TOut: Send + Sync + 'static,
{
    /// Start building a pipeline for the given flow code
    pub fn builder(code: impl Into<String>) -> PipelineBuilder<TIn, TOut> {
        PipelineBuilder::new(code)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Process one batch of records to a snapshot
    ///
    /// Like the engine underneath, this is total: record and commit
    /// failures land inside the snapshot, never in a return error.
    pub async fn process(&self, records: Vec<TIn>, ctx: &BatchContext) -> Snapshot<TIn, TOut> {
        let started_at = Utc::now();
        info!(
            flow = %self.code,
            batch_id = ctx.batch_id,
            correlation_id = %ctx.correlation_id,
            records = records.len(),
            "Processing batch"
        );

        let outcome = self.engine.process(records).await;
        let snapshot = Snapshot::from_outcome(&self.code, ctx, outcome, started_at);

        info!(
            flow = %self.code,
            batch_id = ctx.batch_id,
            valid = snapshot.valid_count(),
            errors = snapshot.error_count(),
            load_time_secs = snapshot.load_time_secs,
            "Batch processed"
        );

        snapshot
    }

    /// Read a full sequence from `reader` and process it
    ///
    /// Reader failures are infrastructure errors and propagate; they are
    /// not part of the snapshot accounting.
    pub async fn process_reader(
        &self,
        reader: &dyn RecordReader<TIn>,
        ctx: &BatchContext,
    ) -> Result<Snapshot<TIn, TOut>> {
        let records = reader
            .read()
            .await
            .context("Failed to read input records")?;
        Ok(self.process(records, ctx).await)
    }
}

/// Builder for [`Pipeline`]
///
/// A mapping is mandatory: either [`map_with`](Self::map_with) for an
/// explicit function or [`map_from`](Self::map_from) for a `From`
/// conversion. Everything else is optional.
pub struct PipelineBuilder<TIn, TOut> {
    code: String,
    mapper: Option<MapFn<TIn, TOut>>,
    before_item: Option<ItemHookFn<TIn, TOut>>,
    rules: RuleSet<TOut>,
    batch_rules: Vec<Box<dyn BatchRule<TOut>>>,
    on_committing: Vec<Arc<dyn Committer<TOut>>>,
    committer: Option<Arc<dyn Committer<TOut>>>,
    chunk_size: usize,
}

impl<TIn, TOut> PipelineBuilder<TIn, TOut>
where
    TIn: Send + Sync + 'static,
    TOut: Send + Sync + 'static,
{
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            mapper: None,
            before_item: None,
            rules: RuleSet::new(),
            batch_rules: Vec::new(),
            on_committing: Vec::new(),
            committer: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Map each input record with an explicit function
    pub fn map_with(
        mut self,
        mapper: impl Fn(&TIn) -> Result<TOut> + Send + Sync + 'static,
    ) -> Self {
        self.mapper = Some(Box::new(mapper));
        self
    }

    /// Map each input record through its `From` conversion
    ///
    /// This is the default structural mapping: explicit and statically
    /// checked, with no field-name guessing at runtime.
    pub fn map_from(mut self) -> Self
    where
        TIn: Clone,
        TOut: From<TIn>,
    {
        self.mapper = Some(Box::new(|record: &TIn| Ok(TOut::from(record.clone()))));
        self
    }

    /// Add a record-level rule
    pub fn rule(mut self, rule: impl Rule<TOut> + 'static) -> Self {
        self.rules.add(rule);
        self
    }

    /// Add a collection-level rule over each window's valid set
    pub fn batch_rule(mut self, rule: impl BatchRule<TOut> + 'static) -> Self {
        self.batch_rules.push(Box::new(rule));
        self
    }

    /// Hook run per record after mapping, before rule evaluation
    pub fn before_item(
        mut self,
        hook: impl Fn(&TIn, &mut TOut) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_item = Some(Box::new(hook));
        self
    }

    /// Add a commit action run immediately before the final committer
    ///
    /// Actions run in registration order; a failure in any of them
    /// triggers the engine's whole-window commit-failure policy.
    pub fn on_committing(mut self, action: impl Committer<TOut> + 'static) -> Self {
        self.on_committing.push(Arc::new(action));
        self
    }

    /// Set the final committer; defaults to [`NoopCommitter`]
    pub fn commit(mut self, committer: impl Committer<TOut> + 'static) -> Self {
        self.committer = Some(Arc::new(committer));
        self
    }

    /// Set the final committer from an existing shared handle
    pub fn commit_shared(mut self, committer: Arc<dyn Committer<TOut>>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Override the engine's window size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Build the pipeline, failing if no mapping was configured
    pub fn build(self) -> Result<Pipeline<TIn, TOut>> {
        let mapper = self.mapper.ok_or_else(|| {
            anyhow::anyhow!(
                "pipeline '{}' has no mapping; call map_with() or map_from()",
                self.code
            )
        })?;

        let last = self
            .committer
            .unwrap_or_else(|| Arc::new(NoopCommitter) as Arc<dyn Committer<TOut>>);

        let committer: Arc<dyn Committer<TOut>> = if self.on_committing.is_empty() {
            last
        } else {
            let mut stages = self.on_committing;
            stages.push(last);
            Arc::new(CommitChain { stages })
        };

        let mut engine = BatchEngine::new(mapper, committer)
            .with_rules(self.rules)
            .with_batch_rules(self.batch_rules)
            .with_chunk_size(self.chunk_size);
        if let Some(hook) = self.before_item {
            engine = engine.with_before_item(hook);
        }

        Ok(Pipeline {
            code: self.code,
            engine,
        })
    }
}

/// Runs a sequence of commit actions as one committer
struct CommitChain<T> {
    stages: Vec<Arc<dyn Committer<T>>>,
}

#[async_trait]
impl<T> Committer<T> for CommitChain<T>
where
    T: Send + Sync,
{
    async fn commit(&self, batch: &mut [T]) -> Result<CommitStats> {
        let mut stats = CommitStats::default();
        for stage in &self.stages {
            stats.merge(stage.commit(batch).await?);
        }
        Ok(stats)
    }
}
