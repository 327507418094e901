//! CLI entry points. All clap-derived types live here; dispatch lives in `main.rs`.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(
    name = "taskgraph",
    version = env!("CARGO_PKG_VERSION"),
    about = "A persistent task graph engine for coordinating AI coding agents over stdio.",
    disable_version_flag = true
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the JSON-RPC stdio server (the default long-running mode).
    Serve,
    /// Initialize the database file for the current project and exit.
    Init,
    /// Force a WAL checkpoint on the current database and exit.
    Checkpoint,
}
