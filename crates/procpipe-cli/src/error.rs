// CLI error type and user-facing messages

use procpipe::ProcessError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl From<config::ConfigError> for CliError {
    fn from(err: config::ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl CliError {
    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            CliError::InvalidArgument { message } => {
                format!("Invalid argument: {}\n\nRun 'procpipe --help' for usage information.", message)
            }
            CliError::Io(e) => format!("File operation failed: {}", e),
            CliError::Config(msg) => format!(
                "Configuration error: {}\n\nCheck the --config file and PROCPIPE_* environment variables.",
                msg
            ),
            CliError::Process(ProcessError::CommandNotFound { command }) => format!(
                "Command '{}' not found.\n\nCheck the spelling or your PATH.",
                command
            ),
            CliError::Process(e @ ProcessError::Timeout { .. }) => {
                format!("{}\n\nRaise the limit with --timeout.", e)
            }
            CliError::Process(e @ ProcessError::ArgumentSyntax(_)) => {
                format!("{}\n\nQuote arguments with matching ' or \" characters.", e)
            }
            CliError::Process(e) => e.to_string(),
        }
    }

    /// Exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Process(ProcessError::CommandFailed { code, .. }) if *code != 0 => *code,
            CliError::InvalidArgument { .. } => 2,
            _ => 1,
        }
    }

    /// Get technical details for verbose mode
    pub fn technical_details(&self) -> String {
        format!("{:?}", self)
    }
}

pub type CliResult<T> = Result<T, CliError>;
