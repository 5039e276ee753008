//! Process controller
//!
//! [`Process`] represents one external command across any number of runs:
//! resolve, spawn, feed input, drain output while polling for exit, then reap
//! or terminate. The API is synchronous; the only blocking call is
//! [`Process::wait_for_exit`], which polls at the context's interval so pipe
//! draining and liveness checks interleave.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::args::split_arguments;
use crate::config::RunContext;
use crate::error::{ProcessError, Result};
use crate::launcher::{LaunchRequest, Launcher, PlatformLauncher, Termination};
use crate::pipes::{ChannelCounters, ChannelSet};
use crate::resolve::resolve_command;
use crate::sink::{CaptureBuffer, OutputTarget, SharedSink};

#[cfg(unix)]
use crate::owner::Owner;

/// How long a terminated child gets before SIGKILL
const GRACE_PERIOD: Duration = Duration::from_millis(200);

/// Poll step while waiting out the grace period
const GRACE_POLL: Duration = Duration::from_millis(20);

/// Daemon shutdown: poll step, polls after the polite request (8s), polls after the forced one
const DAEMON_POLL: Duration = Duration::from_millis(400);
const DAEMON_POLITE_POLLS: u32 = 20;
const DAEMON_FORCED_POLLS: u32 = 10;

/// Passes of the last drain after exit
const FINAL_DRAIN_PASSES: usize = 64;

/// How long a run's end waits for the input writer to wind down
const INPUT_SETTLE: Duration = Duration::from_secs(1);

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No runtime handle
    Idle,
    /// A child spawned by this object is live or awaiting reap
    Running,
    /// Bound to an external pid through `attach`
    Attached,
}

enum Runtime {
    Spawned { child: Child, channels: ChannelSet },
    Attached { pid: u32 },
}

impl Runtime {
    fn pid(&self) -> u32 {
        match self {
            Runtime::Spawned { child, .. } => child.id(),
            Runtime::Attached { pid } => *pid,
        }
    }
}

/// One external command and, while it runs, its child process
pub struct Process {
    command: Option<PathBuf>,
    arguments: String,
    input: Option<PathBuf>,
    output: OutputTarget,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    daemon: bool,
    echo: bool,
    #[cfg(unix)]
    owner: Option<Owner>,
    context: Arc<RunContext>,
    launcher: PlatformLauncher,
    runtime: Option<Runtime>,
    last_exit_code: i32,
    last_counters: ChannelCounters,
}

impl Process {
    /// Process without a command; `set_command` must be called before `start`
    pub fn empty() -> Self {
        Self {
            command: None,
            arguments: String::new(),
            input: None,
            output: OutputTarget::Null,
            working_dir: None,
            env: Vec::new(),
            daemon: false,
            echo: false,
            #[cfg(unix)]
            owner: None,
            context: Arc::new(RunContext::new()),
            launcher: PlatformLauncher::default(),
            runtime: None,
            last_exit_code: 0,
            last_counters: ChannelCounters::default(),
        }
    }

    /// Create a process for `command`, resolving it immediately
    ///
    /// # Examples
    /// ```no_run
    /// use std::time::Duration;
    /// use procpipe::{CaptureBuffer, Process};
    ///
    /// # fn main() -> procpipe::Result<()> {
    /// let output = CaptureBuffer::new();
    /// let mut ls = Process::with_sink("ls", "-l /tmp", output.sink())?;
    /// let code = ls.exec(Duration::from_secs(5), None)?;
    /// println!("{code}: {}", output.text());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(command: &str) -> Result<Self> {
        let mut process = Self::empty();
        process.set_command(command)?;
        Ok(process)
    }

    /// Create a process with a stored argument string
    pub fn with_args(command: &str, args: &str) -> Result<Self> {
        let mut process = Self::new(command)?;
        process.set_args(args);
        Ok(process)
    }

    /// Create a process whose stdout and stderr go to `sink`
    pub fn with_sink(command: &str, args: &str, sink: SharedSink) -> Result<Self> {
        let mut process = Self::with_args(command, args)?;
        process.pipe_to(sink);
        Ok(process)
    }

    /// Use a shared run context instead of a private default one
    pub fn with_context(mut self, context: Arc<RunContext>) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    /// Resolve and store the executable to run
    pub fn set_command(&mut self, command: &str) -> Result<()> {
        self.command = None;
        self.command = Some(resolve_command(command)?);
        Ok(())
    }

    pub fn command(&self) -> Option<&Path> {
        self.command.as_deref()
    }

    /// Replace the argument string
    pub fn set_args(&mut self, args: &str) {
        self.arguments = args.to_string();
    }

    /// Replace the argument string with everything read from `reader`
    pub fn set_args_from(&mut self, mut reader: impl Read) -> Result<()> {
        let mut args = String::new();
        reader
            .read_to_string(&mut args)
            .map_err(|source| ProcessError::io("reading arguments", source))?;
        self.arguments = args.trim_end().to_string();
        Ok(())
    }

    /// Append one more argument, space separated
    pub fn append_arg(&mut self, arg: &str) {
        if !self.arguments.is_empty() {
            self.arguments.push(' ');
        }
        self.arguments.push_str(arg);
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    /// Feed this file to the child's stdin right after it starts
    pub fn pipe_from(&mut self, path: impl Into<PathBuf>) {
        self.input = Some(path.into());
    }

    /// Copy the child's stdout and stderr into `sink`
    pub fn pipe_to(&mut self, sink: SharedSink) {
        self.output = OutputTarget::Sink(sink);
    }

    /// Discard the child's output (it is still drained and counted)
    pub fn pipe_null(&mut self) {
        self.output = OutputTarget::Null;
    }

    /// Echo the child's output to our own stdout
    pub fn pipe_default(&mut self) {
        self.output = OutputTarget::Stdout;
    }

    /// Let the child write its stdout and stderr straight into `path`.
    ///
    /// The file is created if needed and appended to. Output is not drained or
    /// counted, and a global capture sink does not see it.
    pub fn pipe_to_file(&mut self, path: impl Into<PathBuf>) {
        self.output = OutputTarget::File(path.into());
    }

    /// Point the child's stdout and stderr at the null device
    pub fn pipe_detached(&mut self) {
        self.output = OutputTarget::Detached;
    }

    /// Write text to the running child's stdin, keeping it open
    pub fn pipe_send(&mut self, text: &str) -> Result<()> {
        self.running_channels()?.send(text)?;
        Ok(())
    }

    /// Close the running child's stdin
    pub fn pipe_send_close(&mut self) -> Result<()> {
        self.running_channels()?.close_input()
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Add an environment variable for the child
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.push((key.into(), value.into()));
    }

    /// In daemon mode the child is not terminated when this object is dropped,
    /// and `stop` uses the long polite-then-forced escalation.
    ///
    /// Piped output ends with this object: once it is dropped, a child still
    /// writing to stdout or stderr gets SIGPIPE. A daemon meant to outlive it
    /// should write to a file ([`Process::pipe_to_file`]) or to nothing
    /// ([`Process::pipe_detached`]).
    pub fn set_daemon(&mut self, enabled: bool) {
        self.daemon = enabled;
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Log the command line at info level before each start
    pub fn set_echo(&mut self, enabled: bool) {
        self.echo = enabled;
    }

    /// Run the child under another user's credentials
    #[cfg(unix)]
    pub fn set_owner(&mut self, owner: Option<Owner>) {
        self.owner = owner;
    }

    /// Pid of the running or attached process
    pub fn pid(&self) -> Option<u32> {
        self.runtime.as_ref().map(Runtime::pid)
    }

    pub fn state(&self) -> ProcessState {
        match self.runtime {
            None => ProcessState::Idle,
            Some(Runtime::Spawned { .. }) => ProcessState::Running,
            Some(Runtime::Attached { .. }) => ProcessState::Attached,
        }
    }

    /// Exit code of the last run, kept until the next start
    pub fn last_return_value(&self) -> i32 {
        self.last_exit_code
    }

    /// Channel byte counters of the current run, or of the last one when idle
    pub fn counters(&self) -> ChannelCounters {
        match &self.runtime {
            Some(Runtime::Spawned { channels, .. }) => channels.counters(),
            _ => self.last_counters,
        }
    }

    /// Spawn the child.
    ///
    /// `args`, when given, replaces the stored argument string. A process that
    /// is still running is stopped first. In dry-run mode nothing is spawned
    /// and the exit code is 0.
    pub fn start(&mut self, args: Option<&str>) -> Result<()> {
        let program = self.command.clone().ok_or_else(|| {
            ProcessError::InvalidConfig("unable to start process, no command specified".to_string())
        })?;
        if self.runtime.is_some() {
            self.stop()?;
        }
        if let Some(args) = args {
            self.set_args(args);
        }
        let argv = split_arguments(&self.arguments)?;
        self.last_exit_code = 0;
        self.last_counters = ChannelCounters::default();

        if self.echo || self.context.echo() {
            info!(command = %program.display(), args = %self.arguments, "Starting process");
        } else {
            debug!(command = %program.display(), args = ?argv, "Starting process");
        }

        if self.context.no_run() {
            info!(command = %program.display(), "Dry run, process not started");
            return Ok(());
        }

        let mut channels = ChannelSet::new()?;
        let mut stdio = channels.child_ends()?.into_stdio();
        let direct = self
            .output
            .direct_stdio()
            .map_err(|source| ProcessError::io("opening output target", source))?;
        if let Some((stdout, stderr)) = direct {
            stdio.stdout = stdout;
            stdio.stderr = stderr;
        }
        let request = LaunchRequest {
            program: &program,
            args: &argv,
            working_dir: self.working_dir.as_deref(),
            env: &self.env,
            #[cfg(unix)]
            owner: self.owner.as_ref(),
        };
        let child = self
            .launcher
            .spawn(&request, stdio)
            .map_err(|source| ProcessError::SpawnFailed {
                command: program.display().to_string(),
                source,
            })?;
        channels.parent_side();

        let pid = child.id();
        info!(pid = %pid, command = %program.display(), "Process spawned");
        self.runtime = Some(Runtime::Spawned { child, channels });

        if let Some(input) = self.input.clone() {
            self.running_channels()?.feed_file(&input)?;
            debug!(pid = %pid, input = %input.display(), "Feeding input file to child");
        }
        Ok(())
    }

    /// Wait until the child exits, draining its output meanwhile.
    ///
    /// On timeout the child keeps running and [`ProcessError::Timeout`] is
    /// returned; call [`Process::stop`] to get rid of it. An idle process
    /// returns the last exit code right away.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Result<i32> {
        let Some(pid) = self.pid() else {
            return Ok(self.last_exit_code);
        };
        let target = self.effective_target();
        let interval = self.context.poll_interval();
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(code) = self.poll_exit(&target)? {
                return self.finish(code, &target);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(pid = %pid, command = %self, "Process timed out");
                return Err(ProcessError::Timeout {
                    command: self.command_name(),
                    pid,
                    timeout,
                });
            }
            thread::sleep(interval.min(deadline - now));
        }
    }

    /// `start` followed by `wait_for_exit`
    pub fn exec(&mut self, timeout: Duration, args: Option<&str>) -> Result<i32> {
        self.start(args)?;
        self.wait_for_exit(timeout)
    }

    /// `exec` with the context's default timeout and stored arguments
    pub fn run(&mut self) -> Result<i32> {
        let timeout = self.context.default_timeout();
        self.exec(timeout, None)
    }

    /// Run once with `arg` appended, then restore the previous arguments
    pub fn execa(&mut self, arg: &str, timeout: Duration) -> Result<i32> {
        let saved = self.arguments.clone();
        self.append_arg(arg);
        let result = self
            .start(None)
            .and_then(|()| self.wait_for_exit(timeout));
        self.arguments = saved;
        result
    }

    /// Terminate the child if it is still running and release its pipes.
    ///
    /// Calling this on an idle process does nothing.
    pub fn stop(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        match runtime {
            Runtime::Spawned {
                mut child,
                mut channels,
            } => {
                let result = if self.daemon {
                    self.stop_daemon_child(&mut child)
                } else {
                    self.stop_child(&mut child)
                };
                if let Err(e) = channels.settle_input(INPUT_SETTLE) {
                    warn!(pid = %child.id(), error = %e, "Input writer failed");
                }
                self.last_counters = channels.counters();
                channels.close();
                if result.is_err() {
                    self.runtime = Some(Runtime::Spawned { child, channels });
                }
                result
            }
            Runtime::Attached { pid } => {
                let launcher = self.launcher;
                let result = self.shut_down_daemon(pid, || {
                    launcher.is_alive(pid).map_err(|e| termination_failed(pid, "probing", e))
                });
                if result.is_err() {
                    self.runtime = Some(Runtime::Attached { pid });
                }
                result
            }
        }
    }

    /// Non-blocking liveness check. A dead child is reaped and the process
    /// becomes idle; when the check itself fails the handle is kept and the
    /// process counts as running.
    pub fn is_running(&mut self) -> bool {
        let target = self.effective_target();
        let exited = match self.runtime.as_mut() {
            None => return false,
            Some(Runtime::Attached { pid }) => match self.launcher.is_alive(*pid) {
                Ok(true) => return true,
                Ok(false) => None,
                Err(e) => {
                    warn!(pid = %pid, error = %e, "Liveness probe failed");
                    return true;
                }
            },
            Some(Runtime::Spawned { child, channels }) => match child.try_wait() {
                Ok(None) => return true,
                Ok(Some(status)) => {
                    if let Err(e) = target.with_writer(|sink| channels.drain_all(sink)) {
                        warn!(pid = %child.id(), error = %e, "Final output drain failed");
                    }
                    Some(exit_code(status))
                }
                // the child is not known to be gone, keep the handle
                Err(e) => {
                    warn!(pid = %child.id(), error = %e, "Wait failed while probing");
                    return true;
                }
            },
        };

        if let Some(code) = exited {
            self.last_exit_code = code;
        }
        if let Some(Runtime::Spawned { channels, .. }) = self.runtime.as_mut() {
            if let Err(e) = channels.settle_input(INPUT_SETTLE) {
                warn!(error = %e, "Input writer failed");
            }
            self.last_counters = channels.counters();
        }
        self.runtime = None;
        false
    }

    /// Bind to an already running process so it can be stopped later.
    ///
    /// Attaching enables daemon mode. Does nothing if this object already has
    /// a running process.
    pub fn attach(&mut self, pid: u32) -> Result<()> {
        if self.runtime.is_some() {
            debug!(pid = %pid, "Already running, attach ignored");
            return Ok(());
        }
        let alive = pid != 0
            && self
                .launcher
                .is_alive(pid)
                .map_err(|source| ProcessError::io(format!("probing PID {pid}"), source))?;
        if !alive {
            return Err(ProcessError::NotFound {
                target: format!("PID {pid}"),
            });
        }

        info!(pid = %pid, "Attached to process");
        self.daemon = true;
        self.last_exit_code = 0;
        self.runtime = Some(Runtime::Attached { pid });
        Ok(())
    }

    /// Attach to the pid stored in `pid_file`
    pub fn attach_pid_file(&mut self, pid_file: impl AsRef<Path>) -> Result<()> {
        let path = pid_file.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|_| ProcessError::pid_file(path, "is missing or unreadable"))?;
        let pid = contents
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<u32>().ok())
            .filter(|pid| *pid != 0)
            .ok_or_else(|| ProcessError::pid_file(path, "does not contain a pid"))?;
        self.attach(pid)
    }

    /// Run `command` to completion and return its combined output.
    ///
    /// A non-zero exit is an error carrying the captured output.
    pub fn catch_output(command: &str, args: &str) -> Result<String> {
        Self::catch_output_in(Arc::new(RunContext::new()), command, args)
    }

    /// [`Process::catch_output`] under a given run context
    pub fn catch_output_in(context: Arc<RunContext>, command: &str, args: &str) -> Result<String> {
        let buffer = CaptureBuffer::new();
        let mut source = Process::with_sink(command, args, buffer.sink())?.with_context(context);
        let code = match source.run() {
            Ok(code) => code,
            Err(ProcessError::CommandFailed { code, .. }) => code,
            Err(e) => return Err(e),
        };
        if code != 0 {
            return Err(ProcessError::CommandFailed {
                command: source.to_string(),
                code,
                output: Some(buffer.text()),
            });
        }
        Ok(buffer.text())
    }

    /// Run `command` and append its output to `target`'s arguments
    pub fn append_from(command: &str, args: &str, target: &mut Process) -> Result<()> {
        let output = Self::catch_output_in(Arc::clone(&target.context), command, args)?;
        let output = output.trim_end();
        if !output.is_empty() {
            target.append_arg(output);
        }
        Ok(())
    }

    fn effective_target(&self) -> OutputTarget {
        self.context
            .global_sink()
            .map(OutputTarget::Sink)
            .unwrap_or_else(|| self.output.clone())
    }

    fn running_channels(&mut self) -> Result<&mut ChannelSet> {
        match self.runtime.as_mut() {
            Some(Runtime::Spawned { channels, .. }) => Ok(channels),
            _ => Err(ProcessError::InvalidConfig(
                "process has no running child".to_string(),
            )),
        }
    }

    /// One poll step: drain output, then check for exit without blocking
    fn poll_exit(&mut self, target: &OutputTarget) -> Result<Option<i32>> {
        let command = self.command_name();
        match self.runtime.as_mut() {
            None => Ok(Some(self.last_exit_code)),
            Some(Runtime::Spawned { child, channels }) => {
                target.with_writer(|sink| channels.drain_all(sink))?;
                match child.try_wait() {
                    Ok(Some(status)) => Ok(Some(exit_code(status))),
                    Ok(None) => Ok(None),
                    Err(source) => Err(ProcessError::Wait { command, source }),
                }
            }
            Some(Runtime::Attached { pid }) => {
                let alive = self
                    .launcher
                    .is_alive(*pid)
                    .map_err(|source| ProcessError::Wait { command, source })?;
                Ok(if alive { None } else { Some(0) })
            }
        }
    }

    /// Child has exited: final drain, record the code, release everything
    fn finish(&mut self, code: i32, target: &OutputTarget) -> Result<i32> {
        if let Some(Runtime::Spawned { child, channels }) = self.runtime.as_mut() {
            for _ in 0..FINAL_DRAIN_PASSES {
                if target.with_writer(|sink| channels.drain_all(sink))? == 0 {
                    break;
                }
            }
            if let Err(e) = channels.settle_input(INPUT_SETTLE) {
                warn!(pid = %child.id(), error = %e, "Input writer failed");
            }
            let counters = channels.counters();
            info!(
                pid = %child.id(),
                code,
                stdout_bytes = counters.stdout,
                stderr_bytes = counters.stderr,
                "Process exited"
            );
            self.last_counters = counters;
            channels.close();
        }
        self.runtime = None;
        self.last_exit_code = code;

        if code != 0 && self.context.fail_on_nonzero() {
            return Err(ProcessError::CommandFailed {
                command: self.to_string(),
                code,
                output: None,
            });
        }
        Ok(code)
    }

    /// SIGTERM, short grace period, then SIGKILL and reap
    fn stop_child(&mut self, child: &mut Child) -> Result<()> {
        let pid = child.id();
        if let Some(status) = self.try_reap(child)? {
            self.last_exit_code = exit_code(status);
            return Ok(());
        }

        debug!(pid = %pid, "Sending termination request");
        if let Err(e) = self.launcher.terminate(child) {
            if let Some(status) = self.try_reap(child)? {
                self.last_exit_code = exit_code(status);
                return Ok(());
            }
            return Err(termination_failed(pid, "sending termination request", e));
        }

        let deadline = Instant::now() + GRACE_PERIOD;
        while Instant::now() < deadline {
            thread::sleep(GRACE_POLL);
            if let Some(status) = self.try_reap(child)? {
                debug!(pid = %pid, "Process terminated gracefully");
                self.last_exit_code = exit_code(status);
                return Ok(());
            }
        }

        warn!(pid = %pid, "Process ignored termination request, killing");
        self.launcher
            .kill(child)
            .map_err(|e| termination_failed(pid, "killing", e))?;
        let status = child.wait().map_err(|source| ProcessError::Wait {
            command: self.command_name(),
            source,
        })?;
        self.last_exit_code = exit_code(status);
        Ok(())
    }

    fn stop_daemon_child(&mut self, child: &mut Child) -> Result<()> {
        let pid = child.id();
        let command = self.command_name();
        let mut status = None;
        let result = self.shut_down_daemon(pid, || match child.try_wait() {
            Ok(Some(exited)) => {
                status = Some(exited);
                Ok(false)
            }
            Ok(None) => Ok(true),
            Err(source) => Err(ProcessError::Wait {
                command: command.clone(),
                source,
            }),
        });
        if let Some(status) = status {
            self.last_exit_code = exit_code(status);
        }
        result
    }

    /// Polite request, up to 8 seconds of polling, forced kill, more polling
    fn shut_down_daemon(&self, pid: u32, mut is_alive: impl FnMut() -> Result<bool>) -> Result<()> {
        info!(pid = %pid, "Stopping daemon");
        if let Err(e) = self.launcher.signal_pid(pid, Termination::Polite) {
            if !is_alive()? {
                return Ok(());
            }
            return Err(termination_failed(pid, "sending termination request", e));
        }
        if wait_until_dead(&mut is_alive, DAEMON_POLITE_POLLS)? {
            debug!(pid = %pid, "Daemon stopped");
            return Ok(());
        }

        warn!(pid = %pid, "Daemon ignored termination request, killing");
        if let Err(e) = self.launcher.signal_pid(pid, Termination::Forced) {
            if !is_alive()? {
                return Ok(());
            }
            return Err(termination_failed(pid, "killing", e));
        }
        if wait_until_dead(&mut is_alive, DAEMON_FORCED_POLLS)? {
            return Ok(());
        }
        Err(ProcessError::TerminationFailed {
            pid,
            reason: "still running after forced kill".to_string(),
        })
    }

    fn try_reap(&self, child: &mut Child) -> Result<Option<ExitStatus>> {
        child.try_wait().map_err(|source| ProcessError::Wait {
            command: self.command_name(),
            source,
        })
    }

    fn command_name(&self) -> String {
        self.command
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.runtime.is_none() || self.daemon {
            return;
        }
        if let Err(e) = self.stop() {
            warn!(command = %self.command_name(), error = %e, "Failed to stop process on drop");
        }
    }
}

/// Command line: resolved command followed by the argument string
impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_name())?;
        if !self.arguments.is_empty() {
            write!(f, " {}", self.arguments)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("command", &self.command)
            .field("arguments", &self.arguments)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .field("daemon", &self.daemon)
            .field("echo", &self.echo)
            .field("output", &self.output)
            .field("last_exit_code", &self.last_exit_code)
            .finish()
    }
}

fn wait_until_dead(is_alive: &mut impl FnMut() -> Result<bool>, polls: u32) -> Result<bool> {
    for _ in 0..polls {
        thread::sleep(DAEMON_POLL);
        if !is_alive()? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn termination_failed(pid: u32, action: &str, error: std::io::Error) -> ProcessError {
    ProcessError::TerminationFailed {
        pid,
        reason: format!("{action}: {error}"),
    }
}

/// Exit code, or 128 + signal number for a child killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Process {
        let mut process = Process::new("sh").unwrap();
        process.set_args(&format!("-c '{script}'"));
        process
    }

    #[test]
    fn test_start_without_command_is_config_error() {
        let mut process = Process::empty();
        let err = process.start(None).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidConfig(_)));
        assert_eq!(process.state(), ProcessState::Idle);
    }

    #[test]
    fn test_unmatched_quote_fails_before_spawn() {
        let mut process = Process::with_args("echo", "'broken").unwrap();
        let err = process.start(None).unwrap_err();
        assert!(matches!(err, ProcessError::ArgumentSyntax(_)));
        assert!(process.pid().is_none());
    }

    #[test]
    fn test_exec_captures_output_and_goes_idle() {
        let buffer = CaptureBuffer::new();
        let mut process = Process::with_sink("echo", "hello world", buffer.sink()).unwrap();
        let code = process.exec(Duration::from_secs(5), None).unwrap();
        assert_eq!(code, 0);
        assert_eq!(buffer.text(), "hello world\n");
        assert_eq!(process.state(), ProcessState::Idle);
        assert_eq!(process.counters().stdout, 12);
    }

    #[test]
    fn test_explicit_args_replace_stored_ones() {
        let buffer = CaptureBuffer::new();
        let mut process = Process::with_sink("echo", "stored", buffer.sink()).unwrap();
        process.exec(Duration::from_secs(5), Some("given")).unwrap();
        assert_eq!(buffer.text(), "given\n");
        assert_eq!(process.arguments(), "given");
    }

    #[test]
    fn test_stderr_is_captured_too() {
        let buffer = CaptureBuffer::new();
        let mut process = sh("echo oops >&2");
        process.pipe_to(buffer.sink());
        process.exec(Duration::from_secs(5), None).unwrap();
        assert_eq!(buffer.text(), "oops\n");
        assert_eq!(process.counters().stderr, 5);
    }

    #[test]
    fn test_signal_exit_code() {
        let mut process = sh("kill -9 $$");
        let code = process.exec(Duration::from_secs(5), None).unwrap();
        assert_eq!(code, 128 + 9);
    }

    #[test]
    fn test_wait_on_idle_returns_last_code() {
        let mut process = sh("exit 4");
        assert_eq!(process.exec(Duration::from_secs(5), None).unwrap(), 4);
        assert_eq!(process.wait_for_exit(Duration::from_secs(1)).unwrap(), 4);
    }

    #[test]
    fn test_pipe_send_then_close() {
        let buffer = CaptureBuffer::new();
        let mut process = Process::new("cat").unwrap();
        process.pipe_to(buffer.sink());
        process.start(None).unwrap();
        process.pipe_send("first\n").unwrap();
        process.pipe_send("second\n").unwrap();
        process.pipe_send_close().unwrap();
        process.wait_for_exit(Duration::from_secs(5)).unwrap();
        assert_eq!(buffer.text(), "first\nsecond\n");
        assert_eq!(process.counters().stdin, 13);
    }

    #[test]
    fn test_pipe_send_requires_running_child() {
        let mut process = Process::new("cat").unwrap();
        assert!(process.pipe_send("x").is_err());
    }

    #[test]
    fn test_restart_stops_previous_run() {
        let mut process = Process::with_args("sleep", "30").unwrap();
        process.start(None).unwrap();
        let first = process.pid().unwrap();
        process.start(Some("0")).unwrap();
        let second = process.pid().unwrap();
        assert_ne!(first, second);
        assert_eq!(process.wait_for_exit(Duration::from_secs(5)).unwrap(), 0);
    }

    #[test]
    fn test_stop_running_child_records_signal_code() {
        let mut process = Process::with_args("sleep", "30").unwrap();
        process.start(None).unwrap();
        process.stop().unwrap();
        assert_eq!(process.state(), ProcessState::Idle);
        assert_eq!(process.last_return_value(), 128 + 15);
    }

    #[test]
    fn test_stop_escalates_to_kill() {
        let mut process = sh("trap \"\" TERM; sleep 30");
        process.start(None).unwrap();
        // let the shell install its trap
        thread::sleep(Duration::from_millis(200));
        process.stop().unwrap();
        assert!(!process.is_running());
        assert_eq!(process.last_return_value(), 128 + 9);
    }

    #[test]
    fn test_is_running_reaps_finished_child() {
        let mut process = Process::new("true").unwrap();
        process.start(None).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while process.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(process.state(), ProcessState::Idle);
        assert_eq!(process.last_return_value(), 0);
    }

    #[test]
    fn test_working_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = CaptureBuffer::new();
        let mut process = sh("pwd; echo $PROCPIPE_TEST_VALUE");
        process.pipe_to(buffer.sink());
        process.set_working_dir(dir.path());
        process.env("PROCPIPE_TEST_VALUE", "forty-two");
        process.exec(Duration::from_secs(5), None).unwrap();

        let text = buffer.text();
        let mut lines = text.lines();
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(lines.next(), Some("forty-two"));
    }

    #[test]
    fn test_set_args_from_reader() {
        let mut process = Process::new("echo").unwrap();
        process.set_args_from("-n  'from a stream'\n".as_bytes()).unwrap();
        assert_eq!(process.arguments(), "-n  'from a stream'");
        process.append_arg("tail");
        assert_eq!(process.arguments(), "-n  'from a stream' tail");
    }

    #[test]
    fn test_display_shows_command_line() {
        let process = Process::with_args("/bin/sh", "-c true").unwrap();
        assert_eq!(process.to_string(), "/bin/sh -c true");
        assert_eq!(Process::empty().to_string(), "");
    }

    #[test]
    fn test_attach_pid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = Process::empty();

        let missing = dir.path().join("missing.pid");
        let err = process.attach_pid_file(&missing).unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));

        let empty = dir.path().join("empty.pid");
        std::fs::write(&empty, "\n").unwrap();
        let err = process.attach_pid_file(&empty).unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
        assert_eq!(process.state(), ProcessState::Idle);
    }

    #[test]
    fn test_attach_to_self_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("self.pid");
        std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        let mut process = Process::empty();
        process.attach_pid_file(&path).unwrap();
        assert_eq!(process.state(), ProcessState::Attached);
        assert!(process.is_daemon());
        assert!(process.is_running());
        // detach without signalling ourselves
        process.runtime = None;
    }

    #[test]
    fn test_owner_credentials_reach_the_child() {
        use nix::unistd::{getgid, getuid};

        let (owner, expected) = if getuid().is_root() {
            (Owner::from_ids("nobody", 65534, 65534), 65534)
        } else {
            let uid = getuid().as_raw();
            (Owner::from_ids("self", uid, getgid().as_raw()), uid)
        };
        let buffer = CaptureBuffer::new();
        let mut process = Process::with_sink("id", "-u", buffer.sink()).unwrap();
        process.set_owner(Some(owner));

        assert_eq!(process.exec(Duration::from_secs(10), None).unwrap(), 0);
        assert_eq!(buffer.text().trim(), expected.to_string());
    }

    #[test]
    fn test_failed_privilege_drop_is_spawn_error() {
        // -1 is rejected by setgid/setuid whoever we are
        let mut process = Process::new("true").unwrap();
        process.set_owner(Some(Owner::from_ids("invalid", u32::MAX, u32::MAX)));

        let err = process.start(None).unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
        assert_eq!(process.state(), ProcessState::Idle);
    }

    #[test]
    fn test_daemon_stop_terminates_spawned_child() {
        let mut process = Process::with_args("sleep", "30").unwrap();
        process.set_daemon(true);
        process.start(None).unwrap();
        assert_eq!(process.state(), ProcessState::Running);

        process.stop().unwrap();
        assert_eq!(process.state(), ProcessState::Idle);
        assert_eq!(process.last_return_value(), 143);
    }

    #[test]
    fn test_is_running_keeps_child_when_wait_fails() {
        use nix::sys::signal::{kill, Signal};
        use nix::sys::wait::waitpid;
        use nix::unistd::Pid;

        let mut process = Process::with_args("sleep", "30").unwrap();
        process.start(None).unwrap();
        let pid = process.pid().unwrap();

        // reap behind the controller's back so its own wait fails
        let raw = Pid::from_raw(pid as i32);
        kill(raw, Signal::SIGKILL).unwrap();
        waitpid(raw, None).unwrap();

        assert!(process.is_running());
        assert_eq!(process.state(), ProcessState::Running);
        assert_eq!(process.pid(), Some(pid));
        assert!(matches!(process.stop(), Err(ProcessError::Wait { .. })));
        process.runtime = None;
    }

    #[test]
    fn test_exit_code_mapping() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }
}
