//! Command-line interface.

mod args;
mod commands;

pub use args::{Cli, Command, RecoveryPhase};

/// Runs the parsed command, returning the process exit code.
pub fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Server {
            bind,
            data_dir,
            server_id,
        } => commands::run_server(&bind, &data_dir, &server_id),
        Command::RecoveryTest {
            phase,
            data_dir,
            documents,
        } => match phase {
            RecoveryPhase::Setup => commands::run_recovery_setup(&data_dir, documents),
            RecoveryPhase::Verify => commands::run_recovery_verify(&data_dir, documents),
        },
    }
}
