//! Subprocess invocation for the external CLIs the orchestrator drives.
//!
//! Every collaborator client builds a [`CommandSpec`] and hands it to a
//! [`CommandRunner`]. Production code uses [`SystemRunner`]; tests substitute
//! a scripted runner so client parsing can be exercised without the real
//! binaries.
//!
//! Secret material is only ever passed on stdin, never on argv, so the
//! debug log of each command line is safe to keep.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::error::{Result, RolloutError};
use crate::types::PhaseId;

// ---------------------------------------------------------------------------
// CommandSpec / CommandOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command line as an operator would type it.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Convert a non-zero exit into [`RolloutError::Command`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RolloutError::Command {
                command: spec.display(),
                status: self.status,
                stderr: self.stderr.trim().chars().take(500).collect(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

pub trait CommandRunner {
    /// Run to completion. A non-zero exit is returned as output, not as an
    /// error; callers decide what a given status means.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run and require a zero exit status.
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.run(spec)?.check(spec)
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %spec.display(), "exec");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if spec.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RolloutError::MissingTool(spec.program.clone()),
            _ => RolloutError::Io(e),
        })?;

        if let Some(input) = &spec.stdin {
            // Dropping the handle closes stdin so the child sees EOF.
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes())?;
            }
        }

        let output = child.wait_with_output()?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Prerequisite tooling
// ---------------------------------------------------------------------------

/// Tools needed by the phases that will actually run, deduplicated and in
/// first-use order.
pub fn tools_for(phases: &[PhaseId]) -> Vec<&'static str> {
    let mut tools = Vec::new();
    for phase in phases {
        for tool in phase.required_tools() {
            if !tools.contains(tool) {
                tools.push(*tool);
            }
        }
    }
    tools
}

/// Fail with [`RolloutError::MissingTool`] for the first tool not on PATH.
pub fn require_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        if which::which(tool).is_err() {
            return Err(RolloutError::MissingTool((*tool).to_string()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scripted runner (tests)
// ---------------------------------------------------------------------------
