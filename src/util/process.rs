use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};

/// A shell-agnostic command description. Install commands come from the
/// package-manager resolver as single strings, so `shell` is the common
/// constructor here.
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Run `command` through the platform shell, preserving quoting.
    pub fn shell(command: &str) -> Self {
        #[cfg(unix)]
        {
            let mut spec = Self::new("sh");
            spec.args = vec![OsString::from("-c"), OsString::from(command)];
            spec
        }
        #[cfg(windows)]
        {
            let mut spec = Self::new("cmd");
            spec.args = vec![OsString::from("/C"), OsString::from(command)];
            spec
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Last few lines of stderr, for phase-named error messages.
    pub fn stderr_tail(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let lines: Vec<&str> = text.lines().rev().take(5).collect();
        lines.into_iter().rev().collect::<Vec<_>>().join("\n")
    }
}

/// Spawn the command and capture its output without blocking the runtime.
/// Used by the concurrent install fan-out.
pub async fn run_captured(spec: CommandSpec) -> Result<CommandOutput> {
    let mut command = tokio::process::Command::new(&spec.program);
    command.args(&spec.args);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let output = command
        .output()
        .await
        .with_context(|| format!("failed to spawn `{}`", spec.program.to_string_lossy()))?;
    Ok(CommandOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
