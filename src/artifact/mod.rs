//! Archive-producing stages driven by external tools.
//!
//! - [`compile`] - resource compiler: manifest + resource tree -> unsigned archive
//! - [`align`] - alignment tool: 4-byte alignment of stored entries
//!
//! Both stages run their tool through a [`CommandRunner`] and judge the
//! result with [`ToolRun::require_artifact`]: the expected output file must
//! exist and be non-empty, and the exit status must be zero.

pub mod align;
pub mod compile;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{OverlayError, Result};
use crate::process::{Cmd, CommandOutput, CommandRunner};

/// Structured outcome of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub tool: String,
    pub command: String,
    pub output: CommandOutput,
    pub artifact: PathBuf,
    /// Size of the artifact after the run, `None` if it does not exist.
    pub artifact_len: Option<u64>,
}

impl ToolRun {
    /// Run `cmd`, expecting it to write `artifact`.
    pub fn execute(cmd: &Cmd, runner: &dyn CommandRunner, artifact: &Path) -> Result<Self> {
        let output = cmd.run_with(runner)?;
        let artifact_len = fs::metadata(artifact).ok().map(|meta| meta.len());
        debug!(
            tool = %cmd.tool_name(),
            status = ?output.status,
            stdout = %output.stdout.trim(),
            stderr = %output.stderr.trim(),
            "tool finished"
        );
        Ok(Self {
            tool: cmd.tool_name(),
            command: cmd.command_line(),
            output,
            artifact: artifact.to_path_buf(),
            artifact_len,
        })
    }

    /// Turn the run into an error unless it produced a usable artifact.
    pub fn require_artifact(self) -> Result<PathBuf> {
        let reason = match (self.artifact_len, self.output.success()) {
            (None, _) => format!("no output file at {}", self.artifact.display()),
            (Some(0), _) => format!("empty output file at {}", self.artifact.display()),
            (Some(_), false) => match self.output.status {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            },
            (Some(_), true) => {
                if !self.output.stderr.trim().is_empty() {
                    warn!(tool = %self.tool, stderr = %self.output.stderr.trim(), "tool reported diagnostics");
                }
                return Ok(self.artifact);
            }
        };
        Err(OverlayError::ToolInvocation {
            tool: self.tool,
            command: self.command,
            status: self.output.status,
            stdout: self.output.stdout,
            stderr: self.output.stderr,
            reason,
        })
    }
}

/// Remove a previous stage output so a stale file never passes as fresh.
pub(crate) fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OverlayError::write(path, e)),
    }
}
