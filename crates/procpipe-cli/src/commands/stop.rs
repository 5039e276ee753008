// Stop a process started elsewhere

use std::path::PathBuf;
use std::sync::Arc;

use procpipe::{Process, RunContext};
use tracing::info;

use super::Command;
use crate::error::{CliError, CliResult};

/// What to stop
#[derive(Debug, Clone)]
pub enum StopTarget {
    Pid(u32),
    PidFile(PathBuf),
}

/// Attach to a pid and run the daemon shutdown sequence on it
#[derive(Debug, Clone)]
pub struct StopCommand {
    target: StopTarget,
}

impl StopCommand {
    pub fn new(target: StopTarget) -> Self {
        Self { target }
    }

    /// Build from the mutually exclusive `--pid` / `--pid-file` flags
    pub fn from_flags(pid: Option<u32>, pid_file: Option<PathBuf>) -> CliResult<Self> {
        let target = match (pid, pid_file) {
            (Some(pid), None) => StopTarget::Pid(pid),
            (None, Some(path)) => StopTarget::PidFile(path),
            _ => {
                return Err(CliError::InvalidArgument {
                    message: "exactly one of --pid or --pid-file is required".to_string(),
                })
            }
        };
        Ok(Self::new(target))
    }
}

impl Command for StopCommand {
    fn execute(&self, context: &Arc<RunContext>) -> CliResult<i32> {
        let mut process = Process::empty().with_context(Arc::clone(context));
        match &self.target {
            StopTarget::Pid(pid) => process.attach(*pid)?,
            StopTarget::PidFile(path) => process.attach_pid_file(path)?,
        }
        let pid = process.pid();
        if context.no_run() {
            info!(pid = ?pid, "Dry run, process left running");
            return Ok(0);
        }
        process.stop()?;
        if let StopTarget::PidFile(path) = &self.target {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Could not remove pid file");
            }
        }
        info!(pid = ?pid, "Process stopped");
        Ok(0)
    }
}
