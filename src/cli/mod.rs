//! CLI interface module (spec §6 "CLI surface"): argument parsing and the
//! `--interactive`/`--request` command handlers.

pub mod args;
pub mod commands;

pub use args::Cli;
