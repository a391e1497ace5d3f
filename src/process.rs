//! External command execution.
//!
//! Every tool invocation goes through a [`CommandRunner`] so the pipeline
//! never parses free-form shell output ad hoc: a run yields a structured
//! [`CommandOutput`], and the caller decides success from the artifact it
//! expected the tool to produce.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{OverlayError, Result};

/// A command to run: program, arguments and a diagnostic hint.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    /// Hint attached to the failure when the tool cannot be started.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Short tool name for messages (`aapt` rather than `/cache/bin/aapt`).
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Full command line, shell-quoted, as it would be typed.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| shell_quote(&part.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run through `runner` and turn a spawn failure into a tool error.
    pub fn run_with(&self, runner: &dyn CommandRunner) -> Result<CommandOutput> {
        let command = self.command_line();
        debug!(%command, "running external tool");
        runner.run(self).map_err(|e| OverlayError::ToolInvocation {
            tool: self.tool_name(),
            command,
            status: None,
            stdout: String::new(),
            stderr: String::new(),
            reason: match &self.error_msg {
                Some(hint) => format!("{e} ({hint})"),
                None => e.to_string(),
            },
        })
    }
}

/// Captured result of one command run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Channel through which external commands are executed.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &Cmd) -> std::io::Result<CommandOutput>;
}

/// Runs commands directly as child processes of this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn run(&self, cmd: &Cmd) -> std::io::Result<CommandOutput> {
        let output = Command::new(&cmd.program).args(&cmd.args).output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs commands through a privilege wrapper such as `su -c`.
///
/// The wrapped command line is passed as a single shell-quoted argument,
/// matching what `su -c` and `sudo sh -c` expect.
#[derive(Debug, Clone)]
pub struct ElevatedRunner {
    prefix: Vec<String>,
}

impl ElevatedRunner {
    pub fn new(prefix: Vec<String>) -> Self {
        Self { prefix }
    }

    fn wrap(&self, cmd: &Cmd) -> Option<Command> {
        let (program, rest) = self.prefix.split_first()?;
        let mut command = Command::new(program);
        command.args(rest).arg(cmd.command_line());
        Some(command)
    }
}

impl CommandRunner for ElevatedRunner {
    fn run(&self, cmd: &Cmd) -> std::io::Result<CommandOutput> {
        let Some(mut command) = self.wrap(cmd) else {
            return LocalRunner.run(cmd);
        };
        let output = command.output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Quote one word for POSIX `sh`. Plain words are returned unchanged.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_quotes_only_when_needed() {
        let cmd = Cmd::new("/cache/bin/aapt")
            .arg("p")
            .args(["-M", "/tmp/my overlay/AndroidManifest.xml"])
            .arg("it's");

        assert_eq!(
            cmd.command_line(),
            "/cache/bin/aapt p -M '/tmp/my overlay/AndroidManifest.xml' 'it'\\''s'"
        );
        assert_eq!(cmd.tool_name(), "aapt");
    }

    #[test]
    fn test_local_runner_captures_output() {
        let output = Cmd::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .run_with(&LocalRunner)
            .unwrap();

        assert_eq!(output.status, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn test_missing_program_is_tool_error() {
        let err = Cmd::new("definitely_not_a_real_command_12345")
            .error_msg("install build-tools")
            .run_with(&LocalRunner)
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::ToolInvocation);
        assert!(err.to_string().contains("install build-tools"));
    }

    #[test]
    fn test_elevated_runner_wraps_single_argument() {
        let runner = ElevatedRunner::new(vec!["sh".into(), "-c".into()]);
        let output = runner
            .run(&Cmd::new("echo").arg("two words"))
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "two words");
    }
}
