//! Command-line surface: a single optional config path. No subcommands —
//! the daemon's behavior is driven entirely by `mcvisor.json` and the chat
//! commands it exposes once running.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "mcvisor",
    version,
    about = "Supervisor daemon for a long-running Minecraft server process"
)]
pub struct Cli {
    /// Path to mcvisor.json. Defaults to ./mcvisor.json, then the
    /// directory containing this executable.
    pub config_file: Option<PathBuf>,
}
