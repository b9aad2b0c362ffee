use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ToolError;

/// Exit status and captured output of a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code:   Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool { self.code == Some(0) }

    /// Turn a non-zero exit into a [`ToolError`] carrying the captured output.
    pub fn check(self, program: &str) -> Result<Self, ToolError> {
        if self.success() {
            return Ok(self);
        }
        let status = match self.code {
            Some(code) => format!("status {code}"),
            None => "a signal".to_owned(),
        };
        let output = [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Err(ToolError::Failed {
            program: program.to_owned(),
            status,
            output,
        })
    }
}

/// Runs an external program to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// Runs programs as child processes. Dropping the returned future kills the child.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[OsString]) -> io::Result<CommandOutput> {
        debug!(program, ?args, "running tool");
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            code:   output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A program plus an argument template.
///
/// `{name}` placeholders in arguments are replaced by paths when the command
/// is expanded, e.g. `["x", "{archive}", "-o{dest}"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args:    Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args:    args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn expand(&self, vars: &[(&str, &Path)]) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                let mut expanded = arg.clone();
                for (name, path) in vars {
                    expanded = expanded.replace(&format!("{{{name}}}"), &path.to_string_lossy());
                }
                OsString::from(expanded)
            })
            .collect()
    }

    pub(crate) async fn run<R: CommandRunner>(&self, runner: &R, vars: &[(&str, &Path)]) -> Result<CommandOutput, ToolError> {
        let args = self.expand(vars);
        runner
            .run(&self.program, &args)
            .await
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?
            .check(&self.program)
    }
}
