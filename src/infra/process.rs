//! External process execution
//!
//! Every compiler, installer and inspector invocation goes through a
//! [`CommandRunner`], so the pipeline can be driven by a recording fake in
//! tests and by [`SystemRunner`] in production.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Process execution errors
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Program not found in PATH
    #[error("Program '{program}' not found in PATH")]
    NotFound { program: String },

    /// Program could not be started
    #[error("Failed to run '{program}': {error}")]
    SpawnFailed { program: String, error: String },
}

/// One external command: program, arguments, environment and directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Label used in logs (usually the stage name)
    pub label: String,
    /// Program to run
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Create an invocation of `program`
    pub fn new(label: &str, program: &str) -> Self {
        Self {
            label: label.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a `KEY=value` make/xcodebuild style variable
    #[must_use]
    pub fn var(self, key: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("{key}={value}"))
    }

    /// Set an environment variable
    #[must_use]
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Whether any argument equals `arg`
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Exit status and captured output of a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when terminated by a signal
    pub status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs external commands
pub trait CommandRunner {
    /// Run with inherited stdio, returning the exit code
    fn run(&self, invocation: &Invocation) -> Result<i32, ProcessError>;

    /// Run with captured stdio
    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError>;
}

/// Runner backed by [`std::process::Command`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> Result<Command, ProcessError> {
        let program = which::which(&invocation.program).map_err(|_| ProcessError::NotFound {
            program: invocation.program.clone(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    fn spawn_error(invocation: &Invocation, e: &std::io::Error) -> ProcessError {
        ProcessError::SpawnFailed {
            program: invocation.program.clone(),
            error: e.to_string(),
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<i32, ProcessError> {
        tracing::debug!("[{}] {invocation}", invocation.label);

        let status = Self::command(invocation)?
            .status()
            .map_err(|e| Self::spawn_error(invocation, &e))?;

        Ok(status.code().unwrap_or(-1))
    }

    fn capture(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        tracing::debug!("[{}] {invocation} (captured)", invocation.label);

        let output = Self::command(invocation)?
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_error(invocation, &e))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
