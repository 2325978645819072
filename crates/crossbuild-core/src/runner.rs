//! External command execution shared by the process-backed collaborators.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    pub args: Vec<String>,

    /// Working directory (inherits the current one when `None`).
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Render as a single shell-like line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, or the exit code when stderr is empty.
    pub fn failure_reason(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with code {}", self.exit_code))
    }
}

/// Spawns commands and captures their output.
pub struct CommandRunner;

impl CommandRunner {
    /// Run `spec` to completion.
    ///
    /// The child is killed if the returned future is dropped, so callers can
    /// wrap this in `tokio::time::timeout`.
    pub async fn run(spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        let start = Instant::now();
        debug!(command = %spec.display(), "Spawning command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let output = command.spawn()?.wait_with_output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_program_and_args() {
        let spec = CommandSpec::new("cargo", ["build", "--release"]);
        assert_eq!(spec.display(), "cargo build --release");
    }

    #[test]
    fn test_failure_reason_prefers_last_stderr_line() {
        let output = CommandOutput {
            exit_code: 101,
            stdout: String::new(),
            stderr: "warning: unused\nerror: could not compile `cs`\n\n".to_string(),
            duration_ms: 5,
        };
        assert_eq!(output.failure_reason(), "error: could not compile `cs`");

        let silent = CommandOutput {
            stderr: String::new(),
            ..output
        };
        assert_eq!(silent.failure_reason(), "exited with code 101");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_simple_command() {
        let spec = CommandSpec::new("echo", ["hello"]);
        let output = CommandRunner::run(&spec).await.expect("run failed");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_failing_command() {
        let spec = CommandSpec::new("false", Vec::<String>::new());
        let output = CommandRunner::run(&spec).await.expect("run failed");
        assert!(!output.success());
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_run_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("crossbuild-definitely-not-installed", Vec::<String>::new());
        assert!(CommandRunner::run(&spec).await.is_err());
    }
}
