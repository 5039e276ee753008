//! fork/exec launcher for unix
//!
//! `std::process::Command` performs the fork, installs the pipe ends as fds
//! 0/1/2 in the child, drops to the owner's uid/gid and execs. A failure in the
//! child before exec is reported back as a spawn error.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Child;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

use super::{base_command, ensure_pid, LaunchRequest, Launcher, Termination};
use crate::pipes::ChildStdio;

#[derive(Debug, Clone, Copy, Default)]
pub struct UnixLauncher;

impl Launcher for UnixLauncher {
    fn spawn(&self, request: &LaunchRequest<'_>, stdio: ChildStdio) -> io::Result<Child> {
        let mut command = base_command(request, stdio);
        if let Some(owner) = request.owner {
            debug!(user = %owner.name(), uid = owner.uid(), gid = owner.gid(), "Spawning as owner");
            command.uid(owner.uid()).gid(owner.gid());
        }
        command.spawn()
    }

    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        send_signal(child.id(), Signal::SIGTERM)
    }

    fn signal_pid(&self, pid: u32, how: Termination) -> io::Result<()> {
        let signal = match how {
            Termination::Polite => Signal::SIGTERM,
            Termination::Forced => Signal::SIGKILL,
        };
        send_signal(pid, signal)
    }

    fn is_alive(&self, pid: u32) -> io::Result<bool> {
        let pid = to_pid(pid)?;
        match kill(pid, None) {
            Ok(()) => Ok(!is_zombie(pid)),
            Err(Errno::ESRCH) => Ok(false),
            // exists, owned by someone else
            Err(Errno::EPERM) => Ok(true),
            Err(errno) => Err(errno.into()),
        }
    }
}

fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    kill(to_pid(pid)?, signal).map_err(io::Error::from)
}

fn to_pid(pid: u32) -> io::Result<Pid> {
    ensure_pid(pid)?;
    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    Ok(Pid::from_raw(raw))
}

/// Exited but not yet reaped by its parent
#[cfg(target_os = "linux")]
fn is_zombie(pid: Pid) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: Pid) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_pid_is_alive() {
        assert!(UnixLauncher.is_alive(std::process::id()).unwrap());
    }

    #[test]
    fn test_pid_zero_rejected() {
        assert!(UnixLauncher.is_alive(0).is_err());
        assert!(UnixLauncher.signal_pid(0, Termination::Polite).is_err());
    }

    #[test]
    fn test_reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!UnixLauncher.is_alive(pid).unwrap());
    }
}
