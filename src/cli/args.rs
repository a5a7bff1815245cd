//! CLI argument definitions (spec §6 "CLI surface"), following the
//! teacher's `cli/types.rs` conventions: a single `Cli` parsed with
//! `clap::Parser`, global flags shared across modes.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "constellation")]
#[command(about = "Galaxy Task Constellation Orchestration Core", long_about = None)]
#[command(version)]
#[command(group(clap::ArgGroup::new("mode").args(["interactive", "request"]).required(true)))]
pub struct Cli {
    /// Open an interactive prompt loop, running one round per line of input.
    #[arg(long)]
    pub interactive: bool,

    /// Run a single round against `<text>` and exit. Exit code reflects the
    /// round's terminal status (0 COMPLETED, 1 FAILED, 2 budget exhausted,
    /// 3 transport failure).
    #[arg(long, value_name = "TEXT")]
    pub request: Option<String>,

    /// Path to a `constellation.yaml` config file, overriding the default
    /// working-directory lookup.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to a JSON file of scripted planner turns, overriding
    /// `process.planner_script_path` from the config file. Required for
    /// `--request`/`--interactive` to get past the first planner turn —
    /// spec §9 runs the core under a stub, not a real LLM.
    #[arg(long, value_name = "PATH")]
    pub planner_script: Option<PathBuf>,

    /// Emit the round summary as JSON instead of a rendered table.
    #[arg(long, global = true)]
    pub json: bool,
}
