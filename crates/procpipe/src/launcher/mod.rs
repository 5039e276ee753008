//! Platform Process Launcher
//!
//! The process controller only talks to the [`Launcher`] trait: spawn a child
//! with redirected stdio, ask it to terminate, signal or probe an arbitrary
//! pid. Each target OS provides one implementation.

use std::io;
use std::path::Path;
use std::process::{Child, Command};

use crate::pipes::ChildStdio;

#[cfg(unix)]
use crate::owner::Owner;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixLauncher as PlatformLauncher;
#[cfg(windows)]
pub use windows::WindowsLauncher as PlatformLauncher;

/// Everything needed to start one child
#[derive(Debug)]
pub struct LaunchRequest<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    pub working_dir: Option<&'a Path>,
    pub env: &'a [(String, String)],
    #[cfg(unix)]
    pub owner: Option<&'a Owner>,
}

/// How insistent a termination request is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGTERM, or a plain `taskkill`
    Polite,
    /// SIGKILL, or `taskkill /f`
    Forced,
}

pub trait Launcher {
    /// Create the child with `stdio` installed as its standard streams
    fn spawn(&self, request: &LaunchRequest<'_>, stdio: ChildStdio) -> io::Result<Child>;

    /// Ask a child of ours to terminate
    fn terminate(&self, child: &mut Child) -> io::Result<()>;

    /// Terminate a child of ours without giving it a chance to clean up
    fn kill(&self, child: &mut Child) -> io::Result<()> {
        child.kill()
    }

    /// Send a termination request to any process
    fn signal_pid(&self, pid: u32, how: Termination) -> io::Result<()>;

    /// Whether `pid` names a live process
    fn is_alive(&self, pid: u32) -> io::Result<bool>;
}

/// Command with program, arguments, environment and stdio applied
fn base_command(request: &LaunchRequest<'_>, stdio: ChildStdio) -> Command {
    let mut command = Command::new(request.program);
    command
        .args(request.args)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr);
    if let Some(dir) = request.working_dir {
        command.current_dir(dir);
    }
    for (key, value) in request.env {
        command.env(key, value);
    }
    command
}

fn ensure_pid(pid: u32) -> io::Result<()> {
    if pid == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "pid must be non-zero",
        ));
    }
    Ok(())
}
