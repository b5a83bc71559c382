//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod check;
pub mod inspect;
pub mod intake;
pub mod run;
