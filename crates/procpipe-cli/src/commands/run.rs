// Run one external command

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use procpipe::{shared, Process, RunContext};
use tracing::info;

use super::Command;
use crate::error::{CliError, CliResult};

/// Run a command, streaming its output to stdout or a capture file
#[derive(Debug, Clone, Default)]
pub struct RunCommand {
    command: String,
    args: Option<String>,
    timeout: Option<Duration>,
    input: Option<PathBuf>,
    capture: Option<PathBuf>,
    daemon: bool,
    pid_file: Option<PathBuf>,
    user: Option<String>,
    echo: bool,
}

impl RunCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Option<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_input(mut self, input: Option<PathBuf>) -> Self {
        self.input = input;
        self
    }

    pub fn with_capture(mut self, capture: Option<PathBuf>) -> Self {
        self.capture = capture;
        self
    }

    /// Leave the child running and print its pid. Its output goes to the
    /// capture file, appended to, or is discarded.
    pub fn with_daemon(mut self, daemon: bool, pid_file: Option<PathBuf>) -> Self {
        self.daemon = daemon;
        self.pid_file = pid_file;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    fn build(&self, context: &Arc<RunContext>) -> CliResult<Process> {
        let mut process = Process::new(&self.command)?.with_context(Arc::clone(context));
        if let Some(args) = &self.args {
            process.set_args(args);
        }
        // a daemon outlives us, so it must not write into our pipes
        match (&self.capture, self.daemon) {
            (Some(path), true) => process.pipe_to_file(path),
            (None, true) => process.pipe_detached(),
            (Some(path), false) => process.pipe_to(shared(File::create(path)?)),
            (None, false) => process.pipe_default(),
        }
        if let Some(input) = &self.input {
            process.pipe_from(input);
        }
        process.set_echo(self.echo);
        process.set_daemon(self.daemon);
        if let Some(user) = &self.user {
            Self::apply_user(&mut process, user)?;
        }
        Ok(process)
    }

    #[cfg(unix)]
    fn apply_user(process: &mut Process, user: &str) -> CliResult<()> {
        process.set_owner(Some(procpipe::Owner::from_name(user)?));
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_user(_process: &mut Process, _user: &str) -> CliResult<()> {
        Err(CliError::InvalidArgument {
            message: "--user is only supported on unix".to_string(),
        })
    }
}

impl Command for RunCommand {
    fn execute(&self, context: &Arc<RunContext>) -> CliResult<i32> {
        if self.pid_file.is_some() && !self.daemon {
            return Err(CliError::InvalidArgument {
                message: "--pid-file requires --daemon".to_string(),
            });
        }
        let mut process = self.build(context)?;

        if self.daemon {
            process.start(None)?;
            let Some(pid) = process.pid() else {
                // dry run
                return Ok(0);
            };
            if let Some(path) = &self.pid_file {
                std::fs::write(path, format!("{pid}\n"))?;
            }
            info!(pid = %pid, command = %process, "Daemon started");
            println!("{pid}");
            return Ok(0);
        }

        let timeout = self.timeout.unwrap_or_else(|| context.default_timeout());
        let code = process.exec(timeout, None)?;
        Ok(code)
    }
}
