//! Error types for process management

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Invalid configuration, e.g. no command set before start
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// Executable could not be resolved as given or through `PATH`
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },

    /// One of the three stdio pipes could not be allocated
    #[error("Unable to create {channel} pipe: {source}")]
    PipeCreation {
        channel: &'static str,
        #[source]
        source: io::Error,
    },

    /// The OS refused to create the child process
    #[error("Failed to spawn process {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Unmatched quote in the argument string
    #[error("Argument syntax error: {0}")]
    ArgumentSyntax(String),

    /// Input file or channel read/write failure
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Process did not exit within the requested bound. The child is still running.
    #[error("Process {command} (PID: {pid}) timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        command: String,
        pid: u32,
        timeout: Duration,
    },

    /// The OS wait primitive failed
    #[error("Waiting for process {command} failed: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Process exited with a non-zero code while that is treated as failure
    #[error("Process '{command}' returned {code}{}", output_suffix(.output))]
    CommandFailed {
        command: String,
        code: i32,
        output: Option<String>,
    },

    /// Failed to terminate process
    #[error("Failed to terminate process (PID: {pid}): {reason}")]
    TerminationFailed { pid: u32, reason: String },

    /// Attach target is not a live process
    #[error("Process not found: {target}")]
    NotFound { target: String },
}

fn output_suffix(output: &Option<String>) -> String {
    match output {
        Some(text) if !text.is_empty() => format!(". Output: {}", text.trim_end()),
        _ => String::new(),
    }
}

impl ProcessError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn pid_file(path: &Path, reason: &str) -> Self {
        Self::NotFound {
            target: format!("pid file {} {}", path.display(), reason),
        }
    }

    /// True for [`ProcessError::Timeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Exit code carried by a [`ProcessError::CommandFailed`]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
