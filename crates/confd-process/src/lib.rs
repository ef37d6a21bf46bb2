//! Process execution for confd-rs's check_cmd/reload_cmd hooks.
//!
//! Both commands run through the platform shell (`sh -c` / `cmd /C`) so
//! operators can use the same shell-quoting and `{{.src}}`/`{{.dest}}`
//! substitution they'd use on a terminal, and both accept a deadline after
//! which confd-rs kills the child rather than blocking the resource thread
//! forever.
//!
//! # Example
//!
//! ```ignore
//! use confd_process::{run_shell_command, CommandResult};
//!
//! let result = run_shell_command("echo hello").expect("run");
//! assert!(result.success);
//! ```

use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn ok(&self) -> Result<&Self> {
        if self.success {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(
                "command failed with exit code {:?}: {}",
                self.exit_code,
                self.stderr
            ))
        }
    }

    pub fn from_output(output: &Output, duration: Duration) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Result of a command execution with timeout bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, or -1 when not available (e.g. killed on timeout).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

fn shell_command(line: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    cmd.arg(line);
    cmd
}

/// Run a shell command line, capturing output, with no timeout.
pub fn run_shell_command(line: &str) -> Result<CommandResult> {
    run_shell_command_in_dir(line, Path::new("."))
}

/// Run a shell command line in a working directory.
pub fn run_shell_command_in_dir(line: &str, dir: &Path) -> Result<CommandResult> {
    let start = Instant::now();
    let output = shell_command(line)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run command: {line}"))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a shell command line with an optional timeout, killing the child if
/// it's still running once the deadline passes. This is the primitive
/// `confd-commit` calls for `check_cmd` and `reload_cmd`.
pub fn run_shell_command_with_timeout(
    line: &str,
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let start = Instant::now();

    let Some(timeout_dur) = timeout else {
        let output = run_shell_command_in_dir(line, working_dir)?;
        return Ok(CommandOutput {
            exit_code: output.exit_code.unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
            duration: Duration::from_millis(output.duration_ms),
        });
    };

    let mut child = shell_command(line)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn command: {line}"))?;

    let deadline = Instant::now() + timeout_dur;
    loop {
        match child
            .try_wait()
            .with_context(|| format!("failed to poll command: {line}"))?
        {
            Some(status) => {
                return Ok(CommandOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: read_pipe(child.stdout.take()),
                    stderr: read_pipe(child.stderr.take()),
                    timed_out: false,
                    duration: start.elapsed(),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();

                    let mut stderr = read_pipe(child.stderr.take());
                    stderr.push_str(&format!(
                        "\ncommand timed out after {}",
                        humantime::format_duration(timeout_dur)
                    ));

                    return Ok(CommandOutput {
                        exit_code: -1,
                        stdout: read_pipe(child.stdout.take()),
                        stderr,
                        timed_out: true,
                        duration: start.elapsed(),
                    });
                }

                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}

/// Check if a command exists in PATH.
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Get the full path to a command.
pub fn which(program: &str) -> Option<std::path::PathBuf> {
    which::which(program).ok()
}
