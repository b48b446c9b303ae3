//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// corvusdb - sharded document database core
#[derive(Parser, Debug)]
#[command(name = "corvusdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server
    Server {
        /// Address to bind the HTTP server to
        #[arg(long, default_value = "127.0.0.1:8529")]
        bind: String,

        /// Data directory (write-ahead log lives here)
        #[arg(long, default_value = "./corvusdb-data")]
        data_dir: PathBuf,

        /// Server id reported in cluster metadata
        #[arg(long, default_value = "PRMR-0001")]
        server_id: String,
    },

    /// Run one phase of the crash/recovery acceptance protocol
    RecoveryTest {
        /// Which phase to run
        #[arg(value_enum)]
        phase: RecoveryPhase,

        /// Data directory shared between the phases
        #[arg(long)]
        data_dir: PathBuf,

        /// Documents the setup phase writes
        #[arg(long, default_value_t = 100)]
        documents: usize,
    },
}

/// The two-phase harness contract: setup performs operations and may be
/// killed at an armed crash point; verify reopens the same directory,
/// replays the log and checks invariants. Exit status is the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecoveryPhase {
    Setup,
    Verify,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
