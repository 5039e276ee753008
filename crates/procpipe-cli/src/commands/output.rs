// Print the combined output of a command

use std::sync::Arc;

use procpipe::{Process, RunContext};

use super::Command;
use crate::error::CliResult;

/// Run a command to completion and print what it wrote
#[derive(Debug, Clone)]
pub struct OutputCommand {
    command: String,
    args: String,
}

impl OutputCommand {
    pub fn new(command: impl Into<String>, args: Option<String>) -> Self {
        Self {
            command: command.into(),
            args: args.unwrap_or_default(),
        }
    }
}

impl Command for OutputCommand {
    fn execute(&self, context: &Arc<RunContext>) -> CliResult<i32> {
        let output = Process::catch_output_in(Arc::clone(context), &self.command, &self.args)?;
        print!("{output}");
        Ok(0)
    }
}
