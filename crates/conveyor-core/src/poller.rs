//! Polling controller
//!
//! Watches an input directory on a fixed interval and feeds unseen flow
//! files through a pipeline, oldest first, one file per tick. Every
//! attempt is recorded in the intake ledger whatever the outcome, so a
//! file that keeps failing is picked up once and then left alone until
//! its modification stamp changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::flow::{FlowEntity, FlowId, FlowRegistry};
use crate::intake::{IntakeEntry, IntakeLog};
use crate::pipeline::{BatchContext, Pipeline};
use crate::reader::RecordReader;
use crate::snapshot::SnapshotStore;

/// Builds a reader for a picked-up source address
pub type OpenSourceFn<TIn> = Box<dyn Fn(&Path) -> Box<dyn RecordReader<TIn>> + Send + Sync>;

/// Broadcast after every attempted flow file, success or failure
#[derive(Debug, Clone)]
pub struct FlowFileProcessed {
    pub flow_code: String,
    pub address: String,
    pub batch_id: u64,
    pub succeeded: bool,
    pub valid_count: u64,
    pub error_count: u64,
}

/// A file waiting in the input directory
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    /// Dedup stamp recorded in the intake ledger
    modified: DateTime<Utc>,
    /// Age used for pickup order
    created: DateTime<Utc>,
}

#[derive(Default)]
struct PollerState {
    running: bool,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// Polls a directory and runs each new flow file through a pipeline
///
/// One poller owns one pipeline and one flow code. Per tick it:
/// 1. Lists the input directory oldest-first
/// 2. Skips every file the intake ledger already records at its current
///    modification stamp
/// 3. Processes the first remaining file and stores its snapshot
/// 4. Records the intake entry and broadcasts a [`FlowFileProcessed`]
pub struct FlowPoller<TIn, TOut> {
    flow: FlowId,
    entity: FlowEntity,
    pipeline: Pipeline<TIn, TOut>,
    open_source: OpenSourceFn<TIn>,
    input_dir: PathBuf,
    interval: Duration,
    intake: IntakeLog,
    registry: FlowRegistry,
    snapshots: SnapshotStore,
    state: Mutex<PollerState>,
    events: broadcast::Sender<FlowFileProcessed>,
}

struct SavedRun {
    snapshot_path: PathBuf,
    valid_count: u64,
    error_count: u64,
}

impl<TIn, TOut> FlowPoller<TIn, TOut>
where
    TIn: Serialize + Send + Sync + 'static,
    TOut: Serialize + Send + Sync + 'static,
{
    /// Create a poller, registering the pipeline's flow code on first use
    pub fn new(
        entity: FlowEntity,
        pipeline: Pipeline<TIn, TOut>,
        open_source: OpenSourceFn<TIn>,
        config: &PollerConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let registry = FlowRegistry::new(&config.state_dir);
        let flow = registry.ensure_flow(pipeline.code())?;
        let (events, _) = broadcast::channel(16);

        Ok(Arc::new(Self {
            flow,
            entity,
            pipeline,
            open_source,
            input_dir: config.input_dir.clone(),
            interval: config.interval(),
            intake: IntakeLog::new(&config.state_dir),
            registry,
            snapshots: SnapshotStore::new(&config.output_dir),
            state: Mutex::new(PollerState::default()),
            events,
        }))
    }

    pub fn flow(&self) -> &FlowId {
        &self.flow
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Subscribe to per-file processing notifications
    pub fn subscribe(&self) -> broadcast::Receiver<FlowFileProcessed> {
        self.events.subscribe()
    }

    /// Start the polling loop in a background task
    ///
    /// The first poll runs immediately, then one per interval. Ticks that
    /// land while a previous poll is still working are dropped, not
    /// queued. Fails if the poller is already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.lock_state();
        if state.running {
            bail!("poller for flow '{}' is already running", self.flow.code);
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(
                flow = %poller.flow.code,
                input_dir = %poller.input_dir.display(),
                interval_secs = poller.interval.as_secs(),
                "Poller started"
            );

            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = poller.poll_once().await {
                            error!(flow = %poller.flow.code, "Poll failed: {e:#}");
                        }
                    }
                }
            }

            info!(flow = %poller.flow.code, "Poller stopped");
        });

        state.running = true;
        state.shutdown = Some(shutdown_tx);
        state.handle = Some(handle);
        Ok(())
    }

    /// Stop the polling loop and wait for the task to exit
    ///
    /// A no-op when the poller is not running.
    pub async fn stop(&self) {
        let (shutdown, handle) = {
            let mut state = self.lock_state();
            state.running = false;
            (state.shutdown.take(), state.handle.take())
        };

        let Some(shutdown) = shutdown else { return };
        let _ = shutdown.send(true);

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(flow = %self.flow.code, "Poller task ended abnormally: {e}");
            }
        }
    }

    /// Run a single poll outside the timer loop
    pub async fn poll_once(&self) -> Result<()> {
        let Some(candidate) = self.next_candidate()? else {
            debug!(flow = %self.flow.code, "No new flow files");
            return Ok(());
        };
        self.process_file(&candidate).await
    }

    /// Oldest file in the input directory the ledger does not know yet
    fn next_candidate(&self) -> Result<Option<Candidate>> {
        let files = list_files_oldest_first(&self.input_dir).with_context(|| {
            format!("Failed to list input directory {}", self.input_dir.display())
        })?;

        for candidate in files {
            let address = candidate.path.display().to_string();
            let seen = self.intake.contains_entry(
                &self.entity,
                &self.flow.code,
                &address,
                candidate.modified,
            )?;
            if !seen {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn process_file(&self, candidate: &Candidate) -> Result<()> {
        let address = candidate.path.display().to_string();
        let batch_id = self.registry.next_batch_id(&self.flow.code)?;
        let ctx = BatchContext::new(batch_id).with_source(address.clone());

        info!(
            flow = %self.flow.code,
            address = %address,
            batch_id = batch_id,
            "Processing flow file"
        );

        let run = self.run_pipeline(candidate, &ctx).await;

        // Recorded whatever the outcome; only a changed modification
        // stamp makes this address new work again.
        let mut entry = IntakeEntry::new(&address, batch_id, candidate.modified);
        let event = match &run {
            Ok(saved) => {
                entry = entry.with_target(saved.snapshot_path.display().to_string());
                info!(
                    flow = %self.flow.code,
                    batch_id = batch_id,
                    valid = saved.valid_count,
                    errors = saved.error_count,
                    "Flow file processed"
                );
                FlowFileProcessed {
                    flow_code: self.flow.code.clone(),
                    address: address.clone(),
                    batch_id,
                    succeeded: true,
                    valid_count: saved.valid_count,
                    error_count: saved.error_count,
                }
            }
            Err(e) => {
                error!(
                    flow = %self.flow.code,
                    address = %address,
                    batch_id = batch_id,
                    "Flow file failed, recording intake entry anyway: {e:#}"
                );
                FlowFileProcessed {
                    flow_code: self.flow.code.clone(),
                    address: address.clone(),
                    batch_id,
                    succeeded: false,
                    valid_count: 0,
                    error_count: 0,
                }
            }
        };

        self.intake.add(&self.entity, &self.flow.code, entry)?;
        let _ = self.events.send(event);

        run.map(|_| ())
    }

    async fn run_pipeline(&self, candidate: &Candidate, ctx: &BatchContext) -> Result<SavedRun> {
        let reader = (self.open_source)(&candidate.path);
        let snapshot = self.pipeline.process_reader(reader.as_ref(), ctx).await?;
        let snapshot_path = self
            .snapshots
            .save(&snapshot)
            .with_context(|| format!("Failed to save snapshot for batch {}", ctx.batch_id))?;

        Ok(SavedRun {
            snapshot_path,
            valid_count: snapshot.valid_count(),
            error_count: snapshot.error_count(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PollerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// List regular files oldest first by creation stamp, with the
/// modification stamp standing in where the filesystem has none and the
/// path as the tie-breaker; in-flight `.tmp` and `.bak` siblings are
/// skipped
fn list_files_oldest_first(dir: &Path) -> Result<Vec<Candidate>> {
    let mut files = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if !metadata.is_file() || has_transient_extension(&path) {
            continue;
        }

        let mtime = metadata.modified().or_else(|_| metadata.created())?;
        let modified = DateTime::<Utc>::from(mtime);
        // Not every filesystem reports a creation stamp.
        let created = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);
        files.push(Candidate { path, modified, created });
    }

    files.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

fn has_transient_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("tmp") | Some("bak")
    )
}
