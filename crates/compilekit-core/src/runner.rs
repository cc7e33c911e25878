//! External process execution with a tri-state result.
//!
//! Commands are shell strings run with stderr merged into stdout. The full
//! primitive reports an exit code; the output-only primitive (for hosts that
//! forbid the former) never does, so its outcome is always `Unknown`.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::Backend;

/// Which execution primitive the host allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerMode {
    /// Strongest primitive available (exit code + output)
    #[default]
    Auto,
    /// Output only, no exit code
    OutputOnly,
    /// No process execution at all
    Disabled,
}

impl RunnerMode {
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "output-only" | "output_only" | "shell" => Self::OutputOnly,
            "disabled" | "none" => Self::Disabled,
            _ => Self::Auto,
        }
    }
}

impl<'de> Deserialize<'de> for RunnerMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

/// Classification of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    /// The primitive could not report an exit code. Not a failure.
    Unknown,
}

/// Primitive that produced a [`RunResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMethod {
    Exec,
    OutputOnly,
    None,
}

/// Result of running one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    /// Combined stdout + stderr, trimmed
    pub output: String,
    pub method: ExecMethod,
    /// Backend the command belonged to, when a compile ran it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_used: Option<Backend>,
}

impl RunResult {
    fn refused(message: &str) -> Self {
        RunResult {
            outcome: RunOutcome::Failure,
            exit_code: Some(1),
            output: message.to_string(),
            method: ExecMethod::None,
            backend_used: None,
        }
    }

    /// Tag the result with the backend that produced it.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend_used = Some(backend);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == RunOutcome::Failure
    }

    /// Non-empty output lines joined with `sep`.
    pub fn joined_output(&self, sep: &str) -> String {
        self.output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(sep)
    }
}

/// Runs shell command strings
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    mode: RunnerMode,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(mode: RunnerMode) -> Self {
        ProcessRunner {
            mode,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn mode(&self) -> RunnerMode {
        self.mode
    }

    /// Cheap probe callers should check before resolving paths or backends.
    pub fn is_available(&self) -> bool {
        self.mode != RunnerMode::Disabled && shell_available()
    }

    /// Whether runs through this runner report exit codes.
    pub fn reports_exit_code(&self) -> bool {
        self.mode == RunnerMode::Auto
    }

    /// Run `command`, merging stderr into stdout.
    pub async fn run(&self, command: &str) -> RunResult {
        let command = command.trim();
        if command.is_empty() {
            return RunResult::refused("Empty command.");
        }
        if !self.is_available() {
            return RunResult::refused(
                "No process runner available (command execution is disabled on this host).",
            );
        }

        debug!("Running command: {}", command);
        if self.reports_exit_code() {
            self.run_with_status(command).await
        } else {
            self.run_output_only(command).await
        }
    }

    async fn run_with_status(&self, command: &str) -> RunResult {
        let output = match self.spawn_and_wait(command).await {
            Ok(output) => output,
            Err(message) => {
                warn!("Command failed to run: {}", message);
                return RunResult {
                    outcome: RunOutcome::Failure,
                    exit_code: None,
                    output: message,
                    method: ExecMethod::Exec,
                    backend_used: None,
                };
            }
        };

        let exit_code = exit_code_of(&output.status);
        RunResult {
            outcome: if exit_code == 0 {
                RunOutcome::Success
            } else {
                RunOutcome::Failure
            },
            exit_code: Some(exit_code),
            output: combined_output(&output),
            method: ExecMethod::Exec,
            backend_used: None,
        }
    }

    async fn run_output_only(&self, command: &str) -> RunResult {
        let output = match self.spawn_and_wait(command).await {
            Ok(output) => combined_output(&output),
            Err(message) => {
                warn!("Output-only command did not complete: {}", message);
                message
            }
        };

        RunResult {
            outcome: RunOutcome::Unknown,
            exit_code: None,
            output,
            method: ExecMethod::OutputOnly,
            backend_used: None,
        }
    }

    async fn spawn_and_wait(&self, command: &str) -> Result<std::process::Output, String> {
        let (shell, flag) = shell_invocation();
        let child = Command::new(shell)
            .arg(flag)
            .arg(format!("{command} 2>&1"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start process (pipe could not be established): {e}"))?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| format!("Command timed out after {} seconds", limit.as_secs_f32()))?
                .map_err(|e| format!("Failed to collect process output: {e}")),
            None => child
                .wait_with_output()
                .await
                .map_err(|e| format!("Failed to collect process output: {e}")),
        }
    }
}

fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }
    text
}

/// Shell-style exit code: signals map to 128 + signal number.
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
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

#[cfg(unix)]
fn shell_invocation() -> (String, &'static str) {
    ("/bin/sh".to_string(), "-c")
}

#[cfg(windows)]
fn shell_invocation() -> (String, &'static str) {
    let comspec = std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
    (comspec, "/C")
}

#[cfg(unix)]
fn shell_available() -> bool {
    std::path::Path::new("/bin/sh").exists()
}

#[cfg(windows)]
fn shell_available() -> bool {
    match std::env::var("COMSPEC") {
        Ok(path) => std::path::Path::new(&path).exists(),
        Err(_) => true,
    }
}

/// Quote `arg` as a single shell token for the host shell.
#[cfg(unix)]
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Quote `arg` as a single shell token for the host shell.
///
/// `cmd.exe` has no escape for `"`, `%` or `!` inside quotes, so those are
/// replaced with spaces.
#[cfg(windows)]
pub fn shell_quote(arg: &str) -> String {
    let cleaned: String = arg
        .chars()
        .map(|c| if matches!(c, '"' | '%' | '!') { ' ' } else { c })
        .collect();
    format!("\"{cleaned}\"")
}
