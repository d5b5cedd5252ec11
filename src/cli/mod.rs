//! Command-line interface for serverless-watchdog.
//!
//! Provides commands for running a watchdog invocation and for inspecting
//! and steering the fleet through the shared counter store.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
