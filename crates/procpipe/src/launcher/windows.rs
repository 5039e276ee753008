//! CreateProcess launcher for Windows

use std::io;
use std::os::windows::process::CommandExt;
use std::process::{Child, Command, Stdio};

use tracing::debug;

use super::{base_command, ensure_pid, LaunchRequest, Launcher, Termination};
use crate::pipes::ChildStdio;

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsLauncher;

impl Launcher for WindowsLauncher {
    fn spawn(&self, request: &LaunchRequest<'_>, stdio: ChildStdio) -> io::Result<Child> {
        let mut command = base_command(request, stdio);
        command.creation_flags(CREATE_NO_WINDOW);
        command.spawn()
    }

    fn terminate(&self, child: &mut Child) -> io::Result<()> {
        // no polite request exists for a windowless child
        child.kill()
    }

    fn signal_pid(&self, pid: u32, how: Termination) -> io::Result<()> {
        ensure_pid(pid)?;
        let pid_arg = pid.to_string();
        let mut args = vec!["/pid", pid_arg.as_str()];
        if how == Termination::Forced {
            args.push("/f");
        }
        let output = Command::new("taskkill")
            .args(&args)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "taskkill failed for pid {} (exit {:?})",
                pid,
                output.status.code()
            )));
        }
        debug!(pid = %pid, forced = how == Termination::Forced, "taskkill sent");
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> io::Result<bool> {
        ensure_pid(pid)?;
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
            .stdin(Stdio::null())
            .output()?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(listing.contains(&format!("\"{pid}\"")))
    }
}
