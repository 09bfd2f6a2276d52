//! Command builder for [`Shell`](crate::Shell).

use std::time::Duration;

use dockhand_shared::constants::exec::DEFAULT_KILL_AFTER;
use dockhand_shared::errors::{DockhandError, DockhandResult};
use serde::{Deserialize, Serialize};

use super::quote::Dialect;

/// How a command line is expressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandLine {
    /// Program and arguments, quoted for the interpreter before running.
    Args(Vec<String>),
    /// A line passed to the interpreter verbatim.
    Raw(String),
}

/// Deadline for a process: SIGTERM at `time_limit`, SIGKILL `kill_after`
/// later if it is still around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub time_limit: Duration,
    pub kill_after: Option<Duration>,
}

impl TimeoutPolicy {
    /// Terminate at `time_limit`, kill one second later.
    pub fn new(time_limit: Duration) -> Self {
        Self {
            time_limit,
            kill_after: Some(DEFAULT_KILL_AFTER),
        }
    }

    /// Only send SIGTERM. A process that ignores it keeps running.
    pub fn without_kill(time_limit: Duration) -> Self {
        Self {
            time_limit,
            kill_after: None,
        }
    }

    pub fn with_kill_after(mut self, kill_after: Duration) -> Self {
        self.kill_after = Some(kill_after);
        self
    }
}

/// Text encodings for decoding process output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
    Latin1,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin-1",
        }
    }

    /// Decode `bytes` strictly.
    pub fn decode(&self, bytes: &[u8]) -> DockhandResult<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| self.error(e)),
            Encoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(at) => Err(self.error(format!(
                    "byte 0x{:02x} at offset {} is not ascii",
                    bytes[at], at
                ))),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    fn error(&self, reason: impl std::fmt::Display) -> DockhandError {
        DockhandError::Decode {
            encoding: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A command to run through a [`Shell`](crate::Shell).
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use dockhand::{ShellCommand, TimeoutPolicy};
///
/// let cmd = ShellCommand::new("grep")
///     .args(["-r", "needle", "/srv/data"])
///     .cwd("/srv")
///     .env("LC_ALL", "C")
///     .timeout(TimeoutPolicy::new(Duration::from_secs(30)))
///     .text();
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellCommand {
    pub(crate) line: CommandLine,
    /// Arguments appended to a raw line, quoted at render time.
    pub(crate) trailing: Vec<String>,
    pub(crate) cwd: Option<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) timeout: Option<TimeoutPolicy>,
    pub(crate) encoding: Option<Encoding>,
}

impl ShellCommand {
    /// Start a command from a program name.
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_line(CommandLine::Args(vec![program.into()]))
    }

    /// Build a command from an argument list.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_line(CommandLine::Args(args.into_iter().map(Into::into).collect()))
    }

    /// Run `line` through the interpreter without quoting.
    pub fn raw(line: impl Into<String>) -> Self {
        Self::with_line(CommandLine::Raw(line.into()))
    }

    fn with_line(line: CommandLine) -> Self {
        Self {
            line,
            trailing: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            encoding: None,
        }
    }

    /// Add an argument.
    ///
    /// On a raw command the argument is quoted and appended to the line.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        match &mut self.line {
            CommandLine::Args(args) => args.push(arg.into()),
            CommandLine::Raw(_) => self.trailing.push(arg.into()),
        }
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Working directory, overriding the shell's.
    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable on top of the shell's snapshot.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.env.push((key.into(), value.into()));
        }
        self
    }

    pub fn timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    /// Decode output with `encoding`.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Decode output as UTF-8.
    pub fn text(self) -> Self {
        self.encoding(Encoding::Utf8)
    }

    pub fn command_line(&self) -> &CommandLine {
        &self.line
    }

    pub fn timeout_policy(&self) -> Option<TimeoutPolicy> {
        self.timeout
    }

    pub fn output_encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Render the line the interpreter will receive.
    pub(crate) fn render(&self, dialect: Dialect) -> DockhandResult<String> {
        match &self.line {
            CommandLine::Args(args) if args.is_empty() => Err(DockhandError::InvalidInput(
                "command has no program".to_string(),
            )),
            CommandLine::Args(args) => Ok(dialect.join(args)),
            CommandLine::Raw(line) if line.trim().is_empty() => Err(
                DockhandError::InvalidInput("command line is empty".to_string()),
            ),
            CommandLine::Raw(line) if self.trailing.is_empty() => Ok(line.clone()),
            CommandLine::Raw(line) => Ok(format!("{} {}", line, dialect.join(&self.trailing))),
        }
    }
}

impl From<&str> for ShellCommand {
    fn from(line: &str) -> Self {
        ShellCommand::raw(line)
    }
}

impl From<String> for ShellCommand {
    fn from(line: String) -> Self {
        ShellCommand::raw(line)
    }
}

impl From<Vec<String>> for ShellCommand {
    fn from(args: Vec<String>) -> Self {
        ShellCommand::from_args(args)
    }
}

impl From<&[&str]> for ShellCommand {
    fn from(args: &[&str]) -> Self {
        ShellCommand::from_args(args.iter().copied())
    }
}
