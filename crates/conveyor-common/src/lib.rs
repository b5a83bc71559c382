//! Conveyor Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared foundation for the Conveyor workspace members.
//!
//! # Overview
//!
//! This crate provides the functionality every Conveyor crate leans on:
//!
//! - **Error Handling**: the [`FlowError`] type and [`Result`] alias
//! - **Logging**: tracing subscriber setup with console/file sinks
//! - **Document Files**: backup-then-overwrite JSON document persistence
//!
//! # Example
//!
//! ```no_run
//! use conveyor_common::{docfile, Result};
//!
//! fn read_counter(path: &std::path::Path) -> Result<u64> {
//!     let value: Option<u64> = docfile::load_document(path)?;
//!     Ok(value.unwrap_or(0))
//! }
//! ```

pub mod docfile;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FlowError, Result};
