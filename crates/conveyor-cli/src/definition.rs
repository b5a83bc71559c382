//! Flow definition files
//!
//! A definition file declares the stages this host runs, one `[[stage]]`
//! TOML block per stage:
//!
//! ```toml
//! [[stage]]
//! code = "orders-inbound"
//! entity = "orders"
//! input_dir = "./inbox/orders"
//! output_dir = "./snapshots/orders"
//! state_dir = "./state"
//! interval_secs = 30
//! reader = "delimited"
//! delimiter = ","
//! required_fields = ["key", "amount"]
//! unique_by = "key"
//! ```
//!
//! Definition-driven stages work over untyped [`TextRecord`]s; typed
//! pipelines with custom mapping are built in code against
//! `conveyor_core` directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use conveyor_core::config::PollerConfig;
use conveyor_core::flow::{validate_code, FlowEntity};
use conveyor_core::pipeline::Pipeline;
use conveyor_core::poller::{FlowPoller, OpenSourceFn};
use conveyor_core::reader::{DelimitedFileReader, RecordReader, SnapshotReader, TextRecord};
use conveyor_core::rules::{rule, unique_by};

use crate::error::{CliError, Result};

/// How a stage reads its source files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderKind {
    /// Delimited text with a header row
    #[default]
    Delimited,
    /// A prior stage's snapshot document
    Snapshot,
}

/// One `[[stage]]` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Flow code; appears in every document the stage produces
    pub code: String,
    /// Kind of record the stage carries
    pub entity: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub reader: ReaderKind,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_true")]
    pub has_headers: bool,
    /// Fields every record must carry a non-empty value for
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Field that must be unique across a window
    #[serde(default)]
    pub unique_by: Option<String>,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

/// A parsed and validated definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(rename = "stage", default)]
    pub stages: Vec<StageDefinition>,
}

impl FlowDefinition {
    /// Load and validate a definition file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CliError::FileNotFound(path.display().to_string()),
            _ => CliError::Io(e),
        })?;

        let definition: Self = toml::from_str(&contents)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(CliError::invalid_definition(
                "no [[stage]] entries found",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !seen.insert(stage.code.as_str()) {
                return Err(CliError::invalid_definition(format!(
                    "stage code '{}' is declared twice",
                    stage.code
                )));
            }
        }
        Ok(())
    }

    /// Look up a stage by flow code
    pub fn stage(&self, code: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.code == code)
    }
}

impl StageDefinition {
    fn validate(&self) -> Result<()> {
        validate_code(&self.code).map_err(|_| {
            CliError::invalid_definition(format!(
                "stage code '{}' may only contain letters, digits, '_' and '-'",
                self.code
            ))
        })?;
        FlowEntity::new(&self.entity).map_err(|_| {
            CliError::invalid_definition(format!(
                "stage '{}': entity '{}' may only contain letters, digits, '_' and '-'",
                self.code, self.entity
            ))
        })?;

        if self.interval_secs == 0 {
            return Err(CliError::invalid_definition(format!(
                "stage '{}': interval_secs must be at least 1",
                self.code
            )));
        }
        if self.reader == ReaderKind::Delimited {
            self.delimiter_byte()?;
        }
        if self.required_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(CliError::invalid_definition(format!(
                "stage '{}': required_fields entries must not be blank",
                self.code
            )));
        }
        Ok(())
    }

    fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(CliError::invalid_definition(format!(
                "stage '{}': delimiter must be a single ASCII character, got '{}'",
                self.code, self.delimiter
            ))),
        }
    }

    /// Poller settings for this stage
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            state_dir: self.state_dir.clone(),
            interval_secs: self.interval_secs,
        }
    }

    /// Assemble the stage's poller over untyped text records
    pub fn build_poller(&self) -> Result<Arc<FlowPoller<TextRecord, TextRecord>>> {
        let mut builder = Pipeline::<TextRecord, TextRecord>::builder(&self.code).map_from();

        for field in &self.required_fields {
            let field = field.clone();
            builder = builder.rule(rule(
                format!("required-{field}"),
                move |rec: &TextRecord| match rec.get(&field) {
                    Some(value) if !value.trim().is_empty() => None,
                    _ => Some(format!("field '{field}' is missing or empty")),
                },
            ));
        }

        if let Some(field) = &self.unique_by {
            let field = field.clone();
            builder = builder.batch_rule(unique_by(
                format!("unique-{field}"),
                move |rec: &TextRecord| rec.get(&field).cloned().unwrap_or_default(),
            ));
        }

        let pipeline = builder.build()?;

        let open_source: OpenSourceFn<TextRecord> = match self.reader {
            ReaderKind::Delimited => {
                let delimiter = self.delimiter_byte()?;
                let has_headers = self.has_headers;
                Box::new(move |path: &Path| {
                    Box::new(
                        DelimitedFileReader::new(path)
                            .with_delimiter(delimiter)
                            .with_headers(has_headers),
                    ) as Box<dyn RecordReader<TextRecord>>
                })
            }
            ReaderKind::Snapshot => Box::new(|path: &Path| {
                Box::new(SnapshotReader::new(path)) as Box<dyn RecordReader<TextRecord>>
            }),
        };

        let entity = FlowEntity::new(&self.entity)?;
        let poller = FlowPoller::new(entity, pipeline, open_source, &self.poller_config())?;
        Ok(poller)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn minimal(code: &str) -> String {
        format!(
            r#"
[[stage]]
code = "{code}"
entity = "orders"
input_dir = "./in"
output_dir = "./out"
state_dir = "./state"
"#
        )
    }

    #[test]
    fn test_parse_minimal_stage_fills_defaults() {
        let definition: FlowDefinition = toml::from_str(&minimal("orders-inbound")).unwrap();
        definition.validate().unwrap();

        let stage = &definition.stages[0];
        assert_eq!(stage.interval_secs, 30);
        assert_eq!(stage.reader, ReaderKind::Delimited);
        assert_eq!(stage.delimiter, ",");
        assert!(stage.has_headers);
        assert!(stage.required_fields.is_empty());
        assert!(stage.unique_by.is_none());
    }

    #[test]
    fn test_parse_full_stage() {
        let toml_src = r#"
[[stage]]
code = "orders-chain"
entity = "orders"
input_dir = "./snapshots/orders"
output_dir = "./snapshots/totals"
state_dir = "./state"
interval_secs = 5
reader = "snapshot"
required_fields = ["key"]
unique_by = "key"
"#;
        let definition: FlowDefinition = toml::from_str(toml_src).unwrap();
        definition.validate().unwrap();

        let stage = definition.stage("orders-chain").unwrap();
        assert_eq!(stage.reader, ReaderKind::Snapshot);
        assert_eq!(stage.interval_secs, 5);
        assert_eq!(stage.unique_by.as_deref(), Some("key"));
    }

    #[test]
    fn test_empty_definition_rejected() {
        let definition: FlowDefinition = toml::from_str("").unwrap();
        assert!(matches!(
            definition.validate().unwrap_err(),
            CliError::InvalidDefinition(_)
        ));
    }

    #[test]
    fn test_duplicate_stage_codes_rejected() {
        let src = format!("{}{}", minimal("orders"), minimal("orders"));
        let definition: FlowDefinition = toml::from_str(&src).unwrap();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_bad_code_rejected() {
        let definition: FlowDefinition = toml::from_str(&minimal("has space")).unwrap();
        let err = definition.validate().unwrap_err();
        assert!(err.to_string().contains("has space"));
    }

    #[test]
    fn test_multibyte_delimiter_rejected() {
        let mut src = minimal("orders");
        src.push_str("delimiter = \"||\"\n");
        let definition: FlowDefinition = toml::from_str(&src).unwrap();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut src = minimal("orders");
        src.push_str("interval_secs = 0\n");
        let definition: FlowDefinition = toml::from_str(&src).unwrap();
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_unknown_reader_kind_fails_to_parse() {
        let mut src = minimal("orders");
        src.push_str("reader = \"carrier-pigeon\"\n");
        assert!(toml::from_str::<FlowDefinition>(&src).is_err());
    }

    #[test]
    fn test_stage_lookup() {
        let definition: FlowDefinition = toml::from_str(&minimal("orders")).unwrap();
        assert!(definition.stage("orders").is_some());
        assert!(definition.stage("invoices").is_none());
    }

    #[tokio::test]
    async fn test_build_poller_enforces_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let stage = StageDefinition {
            code: "orders".to_string(),
            entity: "orders".to_string(),
            input_dir: dir.path().join("in"),
            output_dir: dir.path().join("out"),
            state_dir: dir.path().join("state"),
            interval_secs: 30,
            reader: ReaderKind::Delimited,
            delimiter: ",".to_string(),
            has_headers: true,
            required_fields: vec!["key".to_string()],
            unique_by: None,
        };

        let poller = stage.build_poller().unwrap();

        std::fs::create_dir_all(dir.path().join("in")).unwrap();
        std::fs::write(dir.path().join("in/orders.csv"), "key,amount\nk1,10\n,20\n").unwrap();
        poller.poll_once().await.unwrap();

        let saved = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let contents = std::fs::read_to_string(saved.path()).unwrap();
        let snapshot: serde_json::Value = serde_json::from_str(&contents).unwrap();

        assert_eq!(snapshot["processed_count"], 2);
        assert_eq!(snapshot["valid_items"].as_array().unwrap().len(), 1);
        assert_eq!(snapshot["errors"].as_array().unwrap().len(), 1);
    }
}
