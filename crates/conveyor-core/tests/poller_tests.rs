//! Polling controller tests
//!
//! Tests that the poller:
//! 1. Picks up flow files oldest first, one per poll
//! 2. Records intake entries for failures as well as successes
//! 3. Treats a file with a changed modification stamp as new work
//! 4. Starts and stops cleanly

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serial_test::serial;
use tempfile::tempdir;
use tracing::info;

use conveyor_core::config::PollerConfig;
use conveyor_core::flow::FlowEntity;
use conveyor_core::intake::IntakeLog;
use conveyor_core::pipeline::Pipeline;
use conveyor_core::poller::FlowPoller;
use conveyor_core::reader::{DelimitedFileReader, RecordReader, SnapshotReader, TextRecord};

const FLOW_CODE: &str = "orders-inbound";

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

struct Fixture {
    poller: Arc<FlowPoller<TextRecord, TextRecord>>,
    input_dir: PathBuf,
    output_dir: PathBuf,
    intake: IntakeLog,
    entity: FlowEntity,
}

fn fixture(root: &Path) -> Result<Fixture> {
    let config = PollerConfig {
        input_dir: root.join("in"),
        output_dir: root.join("out"),
        state_dir: root.join("state"),
        interval_secs: 1,
    };
    fs::create_dir_all(&config.input_dir)?;

    let pipeline = Pipeline::<TextRecord, TextRecord>::builder(FLOW_CODE)
        .map_from()
        .build()?;
    let entity = FlowEntity::new("orders")?;
    let poller = FlowPoller::new(
        entity.clone(),
        pipeline,
        Box::new(|path| Box::new(DelimitedFileReader::new(path)) as Box<dyn RecordReader<TextRecord>>),
        &config,
    )?;

    Ok(Fixture {
        poller,
        input_dir: config.input_dir.clone(),
        output_dir: config.output_dir.clone(),
        intake: IntakeLog::new(&config.state_dir),
        entity,
    })
}

#[tokio::test]
async fn test_oldest_file_processed_first() -> Result<()> {
    init_tracing();
    info!("🧪 Testing oldest-first pickup order");

    let dir = tempdir()?;
    let fx = fixture(dir.path())?;
    let mut events = fx.poller.subscribe();

    // b.txt lands before a.txt; age wins over name order
    fs::write(fx.input_dir.join("b.txt"), "name,qty\nwidget,2\n")?;
    std::thread::sleep(Duration::from_millis(25));
    fs::write(fx.input_dir.join("a.txt"), "name,qty\nbolt,5\n")?;

    fx.poller.poll_once().await?;
    let first = events.try_recv()?;
    assert!(first.address.ends_with("b.txt"));
    assert_eq!(first.batch_id, 1);
    assert!(first.succeeded);

    fx.poller.poll_once().await?;
    let second = events.try_recv()?;
    assert!(second.address.ends_with("a.txt"));
    assert_eq!(second.batch_id, 2);

    // a third poll finds nothing new
    fx.poller.poll_once().await?;
    assert!(events.try_recv().is_err());
    assert_eq!(fx.intake.entries(&fx.entity, FLOW_CODE)?.len(), 2);

    info!("✅ Files picked up oldest first, exactly once each");
    Ok(())
}

#[tokio::test]
async fn test_failed_file_still_recorded() -> Result<()> {
    init_tracing();
    info!("🧪 Testing intake recording on failure");

    let dir = tempdir()?;
    let fx = fixture(dir.path())?;
    let mut events = fx.poller.subscribe();

    // ragged row makes the reader fail
    fs::write(fx.input_dir.join("bad.csv"), "name,qty\nwidget,2,extra\n")?;

    assert!(fx.poller.poll_once().await.is_err());

    let event = events.try_recv()?;
    assert!(!event.succeeded);

    let entries = fx.intake.entries(&fx.entity, FLOW_CODE)?;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].address_id.ends_with("bad.csv"));
    assert!(entries[0].target_address_id.is_none());

    // no snapshot was written for the failed file
    assert!(!fx.output_dir.exists() || fs::read_dir(&fx.output_dir)?.next().is_none());

    // the failing file is not retried
    fx.poller.poll_once().await?;
    assert_eq!(fx.intake.entries(&fx.entity, FLOW_CODE)?.len(), 1);

    info!("✅ Failure recorded once, never retried");
    Ok(())
}

#[tokio::test]
async fn test_touched_file_is_new_work() -> Result<()> {
    init_tracing();

    let dir = tempdir()?;
    let fx = fixture(dir.path())?;
    let path = fx.input_dir.join("orders.csv");

    fs::write(&path, "name,qty\nwidget,2\n")?;
    fx.poller.poll_once().await?;

    std::thread::sleep(Duration::from_millis(25));
    fs::write(&path, "name,qty\nwidget,3\n")?;
    fx.poller.poll_once().await?;

    let entries = fx.intake.entries(&fx.entity, FLOW_CODE)?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].address_id, entries[1].address_id);
    assert_ne!(entries[0].date_last_updated, entries[1].date_last_updated);
    assert_eq!(entries[1].batch_id, 2);

    Ok(())
}

#[tokio::test]
async fn test_snapshot_written_for_processed_file() -> Result<()> {
    init_tracing();

    let dir = tempdir()?;
    let fx = fixture(dir.path())?;

    fs::write(fx.input_dir.join("orders.csv"), "name,qty\nwidget,2\nbolt,5\n")?;
    fx.poller.poll_once().await?;

    let mut files: Vec<_> = fs::read_dir(&fx.output_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    files.sort();
    assert_eq!(files.len(), 1);

    let name = files[0].file_name().and_then(|n| n.to_str()).unwrap_or("");
    assert!(name.starts_with("orders-inbound."));
    assert!(name.ends_with(".000001.json"));

    // the snapshot is readable as the next stage's input
    let reader = SnapshotReader::new(&files[0]);
    let records: Vec<TextRecord> = reader.read().await?;
    assert_eq!(records.len(), 2);

    // and the ledger points at it
    let entries = fx.intake.entries(&fx.entity, FLOW_CODE)?;
    assert_eq!(
        entries[0].target_address_id.as_deref(),
        files[0].to_str()
    );

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_timer_loop_processes_and_stops() -> Result<()> {
    init_tracing();
    info!("🧪 Testing timer-driven processing and shutdown");

    let dir = tempdir()?;
    let fx = fixture(dir.path())?;
    let mut events = fx.poller.subscribe();

    fs::write(fx.input_dir.join("orders.csv"), "name,qty\nwidget,2\n")?;

    fx.poller.start()?;
    assert!(fx.poller.is_running());

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv()).await??;
    assert!(event.succeeded);
    assert!(event.address.ends_with("orders.csv"));

    fx.poller.stop().await;
    assert!(!fx.poller.is_running());

    // nothing is picked up after stop
    fs::write(fx.input_dir.join("late.csv"), "name,qty\nnut,1\n")?;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(fx.intake.entries(&fx.entity, FLOW_CODE)?.len(), 1);

    info!("✅ Poller processed on the timer and stopped cleanly");
    Ok(())
}
