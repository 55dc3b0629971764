//! Scenario runner for the GEMX host runtime.
//!
//! Each scenario drives a [`gemx_runtime::Coordinator`] end to end (send,
//! append, execute, retrieve) and checks every output against the host
//! reference. The `gemx-bench` binary wraps these in a CLI.

pub mod commands;
pub mod data;
pub mod exit;
pub mod report;

pub use commands::{BasicCommand, ChainCommand, ChainPerfCommand, PerfCommand, RunContext};
pub use data::MatrixGen;
pub use report::{Check, ScenarioReport};
