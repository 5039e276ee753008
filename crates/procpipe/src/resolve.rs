//! Executable resolution

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ProcessError, Result};

/// Resolve `command` to an executable path.
///
/// The command is first checked as given, which covers absolute paths and
/// paths relative to the current directory. Otherwise `PATH` is searched.
pub fn resolve_command(command: &str) -> Result<PathBuf> {
    let command = command.trim();
    if command.is_empty() {
        return Err(ProcessError::InvalidConfig("empty command".to_string()));
    }

    let given = Path::new(command);
    if is_executable(given) {
        debug!(command = %command, "Command resolved as given");
        return Ok(given.to_path_buf());
    }

    match which::which(command) {
        Ok(found) => {
            debug!(command = %command, path = %found.display(), "Command resolved from PATH");
            Ok(found)
        }
        Err(_) => Err(ProcessError::CommandNotFound {
            command: command.to_string(),
        }),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_config_error() {
        assert!(matches!(
            resolve_command("  "),
            Err(ProcessError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_command() {
        let err = resolve_command("procpipe-no-such-binary-here").unwrap_err();
        assert!(matches!(err, ProcessError::CommandNotFound { .. }));
        assert!(err.to_string().contains("procpipe-no-such-binary-here"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolves_from_path() {
        let path = resolve_command("sh").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("sh"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_path_kept() {
        let path = resolve_command("/bin/sh").unwrap();
        assert_eq!(path, PathBuf::from("/bin/sh"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_not_accepted_as_given() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "not a program").unwrap();
        let err = resolve_command(file.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ProcessError::CommandNotFound { .. }));
    }
}
