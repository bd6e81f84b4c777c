//! Shell command preparation and execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RikkiError};

/// A fully resolved command ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    pub command: String,
    pub cwd: PathBuf,
    pub shell: String,
    pub timeout: Duration,
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr),
        }
    }
}

/// Platform default: `/bin/sh`, or `cmd.exe` on Windows.
pub fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

pub fn resolve_shell(preferred: Option<&str>) -> String {
    preferred
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(default_shell)
}

pub fn is_powershell(shell: &str) -> bool {
    let lower = shell.to_lowercase();
    ["powershell", "powershell.exe", "pwsh", "pwsh.exe"]
        .iter()
        .any(|name| lower.ends_with(name))
}

fn is_cmd(shell: &str) -> bool {
    let lower = shell.to_lowercase();
    lower.ends_with("cmd.exe") || lower == "cmd"
}

/// Flatten a multi-line command into one line the shell runs in sequence.
pub fn prepare_command(command: &str, shell: &str) -> String {
    let normalized = command.replace("\r\n", "\n").replace('\r', "\n");
    let normalized = normalized.trim();
    if !normalized.contains('\n') {
        return normalized.to_string();
    }
    let separator = if is_powershell(shell) { "; " } else { " && " };
    normalized
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn shell_flags(shell: &str) -> &'static [&'static str] {
    if is_powershell(shell) {
        &["-NoProfile", "-NonInteractive", "-Command"]
    } else if is_cmd(shell) {
        &["/C"]
    } else {
        &["-c"]
    }
}

/// Run the invocation, honoring its timeout and the cancellation token.
pub async fn run(invocation: &ShellInvocation, cancel: &CancellationToken) -> Result<ShellOutput> {
    let mut command = tokio::process::Command::new(&invocation.shell);
    command
        .args(shell_flags(&invocation.shell))
        .arg(&invocation.command)
        .current_dir(&invocation.cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    tracing::debug!(
        shell = %invocation.shell,
        cwd = %invocation.cwd.display(),
        command = %invocation.command,
        "Running shell command"
    );

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(RikkiError::Cancelled),
        result = tokio::time::timeout(invocation.timeout, command.output()) => match result {
            Ok(output) => output?,
            Err(_) => return Err(RikkiError::Timeout(invocation.timeout.as_millis() as u64)),
        },
    };

    Ok(ShellOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_line_commands_are_chained() {
        assert_eq!(
            prepare_command("cd src\r\nls -la\n\n", "/bin/sh"),
            "cd src && ls -la"
        );
        assert_eq!(prepare_command("a\nb", "pwsh.exe"), "a; b");
        assert_eq!(prepare_command("  echo hi  ", "/bin/sh"), "echo hi");
    }

    #[test]
    fn blank_preferred_shell_falls_back_to_default() {
        assert_eq!(resolve_shell(Some("  ")), default_shell());
        assert_eq!(resolve_shell(Some("/bin/bash")), "/bin/bash");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_captures_exit_code_and_streams() {
        let dir = tempfile::TempDir::new().unwrap();
        let invocation = ShellInvocation {
            command: "echo out; echo err 1>&2; exit 3".to_string(),
            cwd: dir.path().to_path_buf(),
            shell: "/bin/sh".to_string(),
            timeout: Duration::from_secs(10),
        };
        let output = run(&invocation, &CancellationToken::new()).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let invocation = ShellInvocation {
            command: "sleep 5".to_string(),
            cwd: dir.path().to_path_buf(),
            shell: "/bin/sh".to_string(),
            timeout: Duration::from_millis(100),
        };
        let err = run(&invocation, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RikkiError::Timeout(100)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_stops_on_cancel() {
        let dir = tempfile::TempDir::new().unwrap();
        let invocation = ShellInvocation {
            command: "sleep 5".to_string(),
            cwd: dir.path().to_path_buf(),
            shell: "/bin/sh".to_string(),
            timeout: Duration::from_secs(10),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run(&invocation, &cancel).await.unwrap_err();
        assert!(matches!(err, RikkiError::Cancelled));
    }
}
