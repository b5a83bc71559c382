//! Poller configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use conveyor_common::{FlowError, Result};

/// Settings for one polling controller
///
/// Defaults describe the common local layout: an inbox of flow files, a
/// snapshot directory, and a state directory for ledgers and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Directory watched for new flow files
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Directory snapshots are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory for the intake ledger and flow registry
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Seconds between polls
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./inbox")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./snapshots")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            state_dir: default_state_dir(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl PollerConfig {
    /// Build from `CONVEYOR_*` environment variables, with defaults for
    /// anything unset
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CONVEYOR_INPUT_DIR") {
            config.input_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CONVEYOR_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CONVEYOR_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("CONVEYOR_POLL_INTERVAL_SECS") {
            config.interval_secs = secs.parse().map_err(|_| {
                FlowError::Config(format!(
                    "CONVEYOR_POLL_INTERVAL_SECS must be a positive integer, got '{secs}'"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(FlowError::Config(
                "poll interval must be at least 1 second".to_string(),
            ));
        }
        if self.input_dir.as_os_str().is_empty() {
            return Err(FlowError::Config("input_dir must not be empty".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(FlowError::Config("output_dir must not be empty".to_string()));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(FlowError::Config("state_dir must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
