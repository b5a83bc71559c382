//! Pipeline accounting tests
//!
//! Tests that a pipeline run:
//! 1. Lands every input record in exactly one of valid_items or errors
//! 2. Rejects a whole window when a collection rule or commit fails
//! 3. Produces snapshots a later stage can consume as input

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::tempdir;
use tracing::info;

use conveyor_core::engine::{CommitStats, FnCommitter, ProcessErrorKind};
use conveyor_core::pipeline::{BatchContext, Pipeline};
use conveyor_core::reader::{DelimitedFileReader, SnapshotReader, TextRecord};
use conveyor_core::rules::{rule, unique_by};
use conveyor_core::snapshot::SnapshotStore;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,conveyor_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawOrder {
    key: String,
    amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    key: String,
    amount_cents: i64,
}

impl From<RawOrder> for Order {
    fn from(raw: RawOrder) -> Self {
        Self {
            key: raw.key,
            amount_cents: raw.amount * 100,
        }
    }
}

fn raw(key: &str, amount: i64) -> RawOrder {
    RawOrder {
        key: key.to_string(),
        amount,
    }
}

fn counted_committer(calls: Arc<AtomicUsize>) -> FnCommitter<impl Fn(&mut [Order]) -> Result<CommitStats>> {
    FnCommitter::new(move |batch: &mut [Order]| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommitStats::added(batch.len() as u64))
    })
}

#[tokio::test]
async fn test_every_record_lands_exactly_once() -> Result<()> {
    init_tracing();
    info!("🧪 Testing exhaustive accounting over a mixed batch");

    let pipeline = Pipeline::<RawOrder, Order>::builder("orders")
        .map_from()
        .rule(rule("amount-not-negative", |o: &Order| {
            (o.amount_cents < 0).then(|| format!("amount {} is negative", o.amount_cents))
        }))
        .commit(FnCommitter::new(|batch: &mut [Order]| {
            Ok(CommitStats::added(batch.len() as u64))
        }))
        .build()?;

    // ten records, the fifth fails validation
    let records: Vec<_> = (1..=10)
        .map(|i| raw(&format!("k{i}"), if i == 5 { -5 } else { i * 10 }))
        .collect();

    let snapshot = pipeline.process(records, &BatchContext::new(1)).await;

    assert_eq!(snapshot.processed_count, 10);
    assert_eq!(snapshot.valid_count(), 9);
    assert_eq!(snapshot.error_count(), 1);
    assert_eq!(snapshot.valid_count() + snapshot.error_count(), snapshot.processed_count);
    assert_eq!(snapshot.added, 9);
    assert!(!snapshot.is_fully_valid());

    let error = &snapshot.errors[0];
    assert_eq!(error.item.key, "k5");
    assert_eq!(error.error.kind, ProcessErrorKind::Validation);
    assert_eq!(error.violations[0].rule, "amount-not-negative");

    info!("✅ 9 valid, 1 error, all 10 accounted for");
    Ok(())
}

#[tokio::test]
async fn test_collection_rule_rejects_whole_window() -> Result<()> {
    init_tracing();
    info!("🧪 Testing all-or-nothing on duplicate keys");

    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::<RawOrder, Order>::builder("orders")
        .map_from()
        .batch_rule(unique_by("unique-key", |o: &Order| o.key.clone()))
        .commit(counted_committer(calls.clone()))
        .build()?;

    let snapshot = pipeline
        .process(vec![raw("a", 1), raw("b", 2), raw("a", 3)], &BatchContext::new(1))
        .await;

    // the clean record "b" is rejected along with the duplicates
    assert_eq!(snapshot.valid_count(), 0);
    assert_eq!(snapshot.error_count(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(snapshot
        .errors
        .iter()
        .all(|e| e.error.kind == ProcessErrorKind::CollectionRule));
    assert!(snapshot.errors[0].error.message.contains('a'));

    Ok(())
}

#[tokio::test]
async fn test_commit_failure_demotes_whole_window() -> Result<()> {
    init_tracing();
    info!("🧪 Testing commit failure accounting");

    let pipeline = Pipeline::<RawOrder, Order>::builder("orders")
        .map_from()
        .commit(FnCommitter::new(|_batch: &mut [Order]| -> Result<CommitStats> {
            anyhow::bail!("downstream store unavailable")
        }))
        .build()?;

    let snapshot = pipeline
        .process(vec![raw("a", 1), raw("b", 2)], &BatchContext::new(1))
        .await;

    assert_eq!(snapshot.valid_count(), 0);
    assert_eq!(snapshot.error_count(), 2);
    assert_eq!(snapshot.added, 0);
    for error in &snapshot.errors {
        assert_eq!(error.error.kind, ProcessErrorKind::CommitFailed);
        assert!(error.error.message.contains("downstream store unavailable"));
    }

    Ok(())
}

#[tokio::test]
async fn test_chunked_run_commits_every_window() -> Result<()> {
    init_tracing();

    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::<RawOrder, Order>::builder("orders")
        .map_from()
        .chunk_size(3)
        .commit(counted_committer(calls.clone()))
        .build()?;

    let records: Vec<_> = (1..=10).map(|i| raw(&format!("k{i}"), i)).collect();
    let snapshot = pipeline.process(records, &BatchContext::new(1)).await;

    // 10 records in windows of 3 is 4 commits
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(snapshot.valid_count(), 10);
    assert_eq!(snapshot.added, 10);

    Ok(())
}

#[tokio::test]
async fn test_snapshot_chains_into_next_stage() -> Result<()> {
    init_tracing();
    info!("🧪 Testing snapshot chaining between stages");

    let dir = tempdir()?;
    let store = SnapshotStore::new(dir.path().join("snapshots"));

    let csv_path = dir.path().join("orders.csv");
    std::fs::write(&csv_path, "key,amount\nk1,10\nk2,oops\nk3,30\n")?;

    // stage one parses raw text records into orders
    let parse_stage = Pipeline::<TextRecord, Order>::builder("orders-parse")
        .map_with(|rec: &TextRecord| {
            let key = rec.get("key").cloned().unwrap_or_default();
            let amount: i64 = rec
                .get("amount")
                .context("missing amount column")?
                .parse()
                .context("amount is not a number")?;
            Ok(Order {
                key,
                amount_cents: amount * 100,
            })
        })
        .build()?;

    let reader = DelimitedFileReader::new(&csv_path);
    let ctx = BatchContext::new(1).with_source(csv_path.display().to_string());
    let first = parse_stage.process_reader(&reader, &ctx).await?;
    let saved = store.save(&first)?;

    assert_eq!(first.valid_count(), 2);
    assert_eq!(first.error_count(), 1);

    // stage two consumes stage one's snapshot; only valid items flow on
    let total_stage = Pipeline::<Order, Order>::builder("orders-total")
        .map_from()
        .build()?;

    let chained = SnapshotReader::new(&saved);
    let ctx = BatchContext::new(1).with_source(saved.display().to_string());
    let second = total_stage.process_reader(&chained, &ctx).await?;

    assert_eq!(second.processed_count, 2);
    assert_eq!(second.valid_count(), 2);
    assert!(second.is_fully_valid());

    info!("✅ Stage two consumed exactly the valid items of stage one");
    Ok(())
}

#[tokio::test]
async fn test_enrichment_hook_runs_before_rules() -> Result<()> {
    init_tracing();

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tagged {
        key: String,
        tag: String,
    }

    let pipeline = Pipeline::<RawOrder, Tagged>::builder("orders")
        .map_with(|r: &RawOrder| {
            Ok(Tagged {
                key: r.key.clone(),
                tag: String::new(),
            })
        })
        .before_item(|raw: &RawOrder, tagged: &mut Tagged| {
            tagged.tag = format!("batch:{}", raw.amount);
            Ok(())
        })
        // passes only because the hook filled the tag first
        .rule(rule("tag-present", |t: &Tagged| {
            t.tag.is_empty().then(|| "tag missing".to_string())
        }))
        .build()?;

    let snapshot = pipeline.process(vec![raw("a", 7)], &BatchContext::new(1)).await;

    assert!(snapshot.is_fully_valid());
    assert_eq!(snapshot.valid_items[0].tag, "batch:7");

    Ok(())
}
