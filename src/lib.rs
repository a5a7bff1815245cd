//! Galaxy Task Constellation Orchestration Core — an event-driven DAG task
//! scheduler for distributed device agents.
//!
//! Laid out in the hexagonal style: `domain` (pure data + invariants),
//! `services` (stateful machinery above it), `infrastructure` (adapters
//! satisfying `domain::ports`), `cli` (the `--interactive`/`--request`
//! boundary surface).

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
