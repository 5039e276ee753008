//! # procpipe
//!
//! **Purpose**: Run external commands with piped stdio, bounded waits and
//! graceful termination
//!
//! ## Features
//!
//! - **Argument Tokenizing**: Shell-like quoting without a shell
//! - **Command Resolution**: Paths as given, otherwise a `PATH` search
//! - **Piped Stdio**: Input file or ad-hoc text in, stdout/stderr out to any sink
//! - **Bounded Waits**: Poll for exit while draining output, time out without killing
//! - **Graceful Shutdown**: SIGTERM→SIGKILL escalation, long form for daemons
//! - **Attach**: Take over an external pid or a pid file to stop it later
//! - **Run Context**: Dry-run, fail-on-nonzero and a global capture sink
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use procpipe::{CaptureBuffer, Process, RunContext};
//!
//! # fn main() -> procpipe::Result<()> {
//! let context = RunContext::new().shared();
//! context.set_fail_on_nonzero(true);
//!
//! let output = CaptureBuffer::new();
//! let mut grep = Process::with_sink("grep", "-c 'needle in'", output.sink())?
//!     .with_context(context);
//! grep.pipe_from("/tmp/haystack.txt");
//! grep.exec(Duration::from_secs(10), None)?;
//! println!("matches: {}", output.text().trim());
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod config;
pub mod error;
pub(crate) mod launcher;
#[cfg(unix)]
pub mod owner;
pub mod pipes;
pub mod process;
pub mod resolve;
pub mod sink;

pub use args::split_arguments;
pub use config::{RunContext, RunSettings};
pub use error::{ProcessError, Result};
#[cfg(unix)]
pub use owner::Owner;
pub use pipes::{ChannelCounters, ChannelPhase, ChannelSet, ReadOutcome};
pub use process::{Process, ProcessState};
pub use resolve::resolve_command;
pub use sink::{shared, CaptureBuffer, OutputTarget, SharedSink};
