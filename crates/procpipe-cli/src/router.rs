// Command routing and dispatch

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use procpipe::{RunContext, RunSettings};
use tracing::debug;

use crate::commands::stop::StopCommand;
use crate::commands::{Command, OutputCommand, RunCommand};
use crate::error::CliResult;
use crate::settings::load_settings;

/// procpipe - run external commands with piped stdio and bounded waits
#[derive(Parser, Debug)]
#[command(name = "procpipe")]
#[command(bin_name = "procpipe")]
#[command(about = "Run external commands with piped stdio, timeouts and graceful termination")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log commands instead of running them
    #[arg(long, global = true)]
    pub no_run: bool,

    /// Treat a non-zero exit code as an error
    #[arg(long, global = true)]
    pub fail_on_nonzero: bool,

    /// TOML file with run settings
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More log output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a command and exit with its exit code
    Run {
        /// Executable name or path
        #[arg(value_name = "COMMAND")]
        command: String,

        /// Argument string, split with shell-like quoting
        #[arg(value_name = "ARGS", allow_hyphen_values = true)]
        args: Option<String>,

        /// Seconds to wait before giving up (default from settings)
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<f64>,

        /// File fed to the command's stdin
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Write stdout and stderr to this file instead of our stdout
        /// (a daemon appends to it directly, without it output is discarded)
        #[arg(short, long, value_name = "FILE")]
        capture: Option<PathBuf>,

        /// Start the command, print its pid and leave it running
        #[arg(short, long)]
        daemon: bool,

        /// With --daemon, also write the pid here
        #[arg(long, value_name = "FILE")]
        pid_file: Option<PathBuf>,

        /// Run as this user (unix)
        #[arg(short, long, value_name = "NAME")]
        user: Option<String>,

        /// Log the command line before it runs
        #[arg(short, long)]
        echo: bool,
    },

    /// Run a command and print its combined output
    Output {
        #[arg(value_name = "COMMAND")]
        command: String,

        #[arg(value_name = "ARGS", allow_hyphen_values = true)]
        args: Option<String>,
    },

    /// Stop a running process by pid or pid file
    Stop {
        #[arg(long, value_name = "PID", conflicts_with = "pid_file")]
        pid: Option<u32>,

        #[arg(long, value_name = "FILE")]
        pid_file: Option<PathBuf>,
    },
}

pub struct CommandRouter;

impl CommandRouter {
    /// Parse CLI arguments and route to the matching handler
    pub fn route() -> CliResult<i32> {
        let cli = Cli::parse();

        crate::logging::init_logging(cli.verbose, cli.quiet);

        Self::execute(&cli)
    }

    /// Settings from file and environment, with the global flags on top
    pub fn settings(cli: &Cli) -> CliResult<RunSettings> {
        let mut settings = load_settings(cli.config.as_deref())?;
        settings.no_run |= cli.no_run;
        settings.fail_on_nonzero |= cli.fail_on_nonzero;
        Ok(settings)
    }

    /// Execute a parsed command line
    pub fn execute(cli: &Cli) -> CliResult<i32> {
        let settings = Self::settings(cli)?;
        debug!(?settings, "Effective run settings");
        let context = Arc::new(RunContext::from_settings(&settings));

        match &cli.command {
            Commands::Run {
                command,
                args,
                timeout,
                input,
                capture,
                daemon,
                pid_file,
                user,
                echo,
            } => {
                let timeout = timeout.map(parse_timeout).transpose()?;
                let cmd = RunCommand::new(command.clone())
                    .with_args(args.clone())
                    .with_timeout(timeout)
                    .with_input(input.clone())
                    .with_capture(capture.clone())
                    .with_daemon(*daemon, pid_file.clone())
                    .with_user(user.clone())
                    .with_echo(*echo);
                cmd.execute(&context)
            }
            Commands::Output { command, args } => {
                OutputCommand::new(command.clone(), args.clone()).execute(&context)
            }
            Commands::Stop { pid, pid_file } => {
                StopCommand::from_flags(*pid, pid_file.clone())?.execute(&context)
            }
        }
    }
}

fn parse_timeout(secs: f64) -> CliResult<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| crate::error::CliError::InvalidArgument {
        message: format!("timeout must be a non-negative number of seconds, got {secs}"),
    })
}
