// Command handlers for the procpipe CLI

pub mod output;
pub mod run;
pub mod stop;

pub use output::OutputCommand;
pub use run::RunCommand;
pub use stop::StopCommand;

use std::sync::Arc;

use procpipe::RunContext;

use crate::error::CliResult;

/// Trait for command handlers
pub trait Command {
    /// Execute the command, returning the exit status for the CLI
    fn execute(&self, context: &Arc<RunContext>) -> CliResult<i32>;
}
