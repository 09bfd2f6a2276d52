//! Command execution inside a container.
//!
//! A [`Shell`] binds an exec backend, a container, an interpreter and an
//! environment snapshot. The snapshot is captured once at construction by
//! running the interpreter (after sourcing any configured files) and dumping
//! its environment; every later command runs with exactly that environment
//! plus per-command additions.

mod command;
mod quote;
mod result;

pub use command::{CommandLine, Encoding, ShellCommand, TimeoutPolicy};
pub use quote::Dialect;
pub use result::{ExecResult, Output};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dockhand_shared::constants::shell::{DEFAULT_PATH, DEFAULT_WORKDIR};
use dockhand_shared::constants::signals::{SIGKILL, SIGTERM};
use dockhand_shared::errors::{DockhandError, DockhandResult};
use serde::{Deserialize, Serialize};

use crate::backend::{ArchiveStream, ContainerRef, ExecBackend, ExecRequest};
use crate::files::FileSystem;
use crate::process::Process;
use crate::util::process::{PidMatcher, correlate_host_pid};

/// Options for [`Shell::new`].
///
/// # Example
///
/// ```rust
/// use dockhand::ShellOptions;
///
/// let options = ShellOptions {
///     sources: vec!["/opt/ros/humble/setup.sh".to_string()],
///     ..Default::default()
/// };
/// assert_eq!(options.path, "/bin/sh");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOptions {
    /// Interpreter inside the container.
    #[serde(default = "default_path")]
    pub path: String,
    /// Quoting dialect. Derived from `path` when unset.
    #[serde(default)]
    pub dialect: Option<Dialect>,
    /// Default working directory for commands.
    #[serde(default = "default_workdir")]
    pub working_dir: String,
    /// Files sourced, in order, before capturing the environment.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Environment the capture itself runs with.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_workdir() -> String {
    DEFAULT_WORKDIR.to_string()
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            path: default_path(),
            dialect: None,
            working_dir: default_workdir(),
            sources: Vec::new(),
            environment: BTreeMap::new(),
        }
    }
}

struct ShellInner {
    backend: Arc<dyn ExecBackend>,
    container: ContainerRef,
    path: String,
    dialect: Dialect,
    working_dir: String,
    environment: Arc<BTreeMap<String, String>>,
}

/// Executes commands inside one container.
///
/// Cheap to clone. Clones share the backend and the environment snapshot.
#[derive(Clone)]
pub struct Shell {
    inner: Arc<ShellInner>,
}

impl Shell {
    /// Bind a shell to `container` and capture its environment.
    ///
    /// Fails with [`DockhandError::ContainerFileNotFound`] if a source file
    /// does not exist, and with [`DockhandError::NonZeroExit`] if sourcing
    /// fails.
    pub async fn new(
        backend: Arc<dyn ExecBackend>,
        container: impl Into<ContainerRef>,
        options: ShellOptions,
    ) -> DockhandResult<Self> {
        let container = container.into();
        let dialect = options
            .dialect
            .unwrap_or_else(|| Dialect::for_interpreter(&options.path));

        let seed = Shell {
            inner: Arc::new(ShellInner {
                backend,
                container,
                path: options.path,
                dialect,
                working_dir: options.working_dir,
                environment: Arc::new(options.environment),
            }),
        };

        let files = seed.filesystem();
        for source in &options.sources {
            if !files.isfile(source).await? {
                return Err(DockhandError::not_found(source.as_str()));
            }
        }

        let capture = dialect.capture_env_command(&options.sources);
        let dump = seed.execute(ShellCommand::raw(capture)).await?.check()?;
        let environment = parse_environment(&String::from_utf8_lossy(&dump.stdout), dialect);

        tracing::debug!(
            container = %seed.inner.container,
            interpreter = %seed.inner.path,
            sources = ?options.sources,
            variables = environment.len(),
            "Captured container environment"
        );
        Ok(seed.derive(environment))
    }

    fn derive(&self, environment: BTreeMap<String, String>) -> Self {
        Shell {
            inner: Arc::new(ShellInner {
                backend: self.inner.backend.clone(),
                container: self.inner.container.clone(),
                path: self.inner.path.clone(),
                dialect: self.inner.dialect,
                working_dir: self.inner.working_dir.clone(),
                environment: Arc::new(environment),
            }),
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ExecBackend> {
        &self.inner.backend
    }

    pub fn container(&self) -> &ContainerRef {
        &self.inner.container
    }

    /// Interpreter path.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn working_dir(&self) -> &str {
        &self.inner.working_dir
    }

    /// The environment snapshot commands run with.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.inner.environment
    }

    /// A new shell whose snapshot is this one's plus `vars`.
    ///
    /// This shell is left unchanged.
    pub fn with_environment<I, K, V>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut environment = (*self.inner.environment).clone();
        environment.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self.derive(environment)
    }

    /// Start a command and return a handle to it.
    pub async fn run(&self, command: impl Into<ShellCommand>) -> DockhandResult<Process> {
        let command = command.into();
        let line = command.render(self.inner.dialect)?;
        let cwd = command
            .cwd
            .clone()
            .unwrap_or_else(|| self.inner.working_dir.clone());

        let mut env = (*self.inner.environment).clone();
        env.extend(command.env.iter().cloned());

        tracing::debug!(
            container = %self.inner.container,
            command = %line,
            cwd = %cwd,
            timeout = ?command.timeout,
            "Starting process"
        );

        let request = ExecRequest {
            argv: self.inner.dialect.wrap(&self.inner.path, &line),
            env: env.into_iter().collect(),
            working_dir: Some(cwd.clone()),
            user: None,
        };
        let session = self
            .inner
            .backend
            .start_exec(&self.inner.container, request)
            .await?;

        Ok(Process::spawn(
            self.clone(),
            session,
            line,
            cwd,
            command.timeout,
            command.encoding,
        ))
    }

    /// Run a command to completion.
    ///
    /// Non-zero exits are not errors here; a timeout is.
    pub async fn execute(&self, command: impl Into<ShellCommand>) -> DockhandResult<ExecResult> {
        self.run(command).await?.output().await
    }

    /// Run a command and return its stdout, failing on a non-zero exit.
    ///
    /// With an encoding set, stdout is decoded and trailing line breaks are
    /// stripped.
    pub async fn check_output(&self, command: impl Into<ShellCommand>) -> DockhandResult<Output> {
        let result = self.execute(command).await?.check()?;
        match result.encoding {
            Some(encoding) => {
                let text = encoding.decode(&result.stdout)?;
                Ok(Output::Text(
                    text.trim_end_matches(['\r', '\n']).to_string(),
                ))
            }
            None => Ok(Output::Bytes(result.stdout)),
        }
    }

    /// Run a command, discard its output and fail on a non-zero exit.
    pub async fn check_call(&self, command: impl Into<ShellCommand>) -> DockhandResult<i32> {
        let result = self.execute(command).await?;
        if result.success() {
            Ok(result.exit_code)
        } else {
            Err(DockhandError::NonZeroExit {
                command: result.command,
                code: result.exit_code,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    /// Value of an environment variable, as the container sees it.
    ///
    /// Returns `None` when the variable is unset or `name` is not a valid
    /// variable name.
    pub async fn environ(&self, name: &str) -> DockhandResult<Option<String>> {
        let dialect = self.inner.dialect;
        if !dialect.is_valid_env_name(name) {
            return Ok(None);
        }
        let result = self
            .execute(ShellCommand::raw(dialect.printenv_command(name)))
            .await?;
        match result.exit_code {
            0 => {
                let value = Encoding::Utf8.decode(&result.stdout)?;
                let value = match value.strip_suffix(dialect.newline()) {
                    Some(stripped) => stripped.to_string(),
                    None => value,
                };
                Ok(Some(value))
            }
            1 => Ok(None),
            _ => Err(result.into_error()),
        }
    }

    /// Deliver `signal` to the container-local process `pid`.
    pub async fn send_signal(&self, pid: u32, signal: i32) -> DockhandResult<()> {
        tracing::debug!(container = %self.inner.container, pid, signal, "Sending signal");
        self.inner
            .backend
            .send_signal(&self.inner.container, pid, signal)
            .await
    }

    pub async fn terminate(&self, pid: u32) -> DockhandResult<()> {
        self.send_signal(pid, SIGTERM).await
    }

    pub async fn kill(&self, pid: u32) -> DockhandResult<()> {
        self.send_signal(pid, SIGKILL).await
    }

    /// Host pid of the container process `pid`, if it maps to exactly one.
    pub async fn local_to_host_pid(&self, pid: u32) -> Option<u32> {
        self.local_to_host_pid_matching(pid, None, None).await
    }

    /// Like [`local_to_host_pid`](Self::local_to_host_pid), narrowed by a
    /// command line substring and a start time.
    pub async fn local_to_host_pid_matching(
        &self,
        pid: u32,
        signature: Option<&str>,
        started_after: Option<DateTime<Utc>>,
    ) -> Option<u32> {
        let matcher = PidMatcher {
            signature: signature.map(str::to_string),
            started_after,
        };
        let roots = match self
            .inner
            .backend
            .container_host_pids(&self.inner.container)
            .await
        {
            Ok(roots) => roots,
            Err(e) => {
                tracing::warn!(pid, error = %e, "Cannot list container process roots");
                return None;
            }
        };
        match tokio::task::spawn_blocking(move || correlate_host_pid(pid, &roots, &matcher)).await {
            Ok(host_pid) => host_pid,
            Err(e) => {
                tracing::warn!(pid, error = %e, "Host pid lookup task failed");
                None
            }
        }
    }

    /// Quote one argument for this shell's interpreter.
    pub fn quote(&self, arg: &str) -> String {
        self.inner.dialect.quote(arg)
    }

    /// Join arguments into a command line for this shell's interpreter.
    pub fn join<I, S>(&self, args: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.dialect.join(args)
    }

    /// Extract a tar stream into directory `dir` of the container.
    pub async fn upload_archive(&self, dir: &str, archive: ArchiveStream) -> DockhandResult<()> {
        tracing::debug!(container = %self.inner.container, dir, "Uploading archive");
        self.inner
            .backend
            .upload_archive(&self.inner.container, dir, archive)
            .await
    }

    /// Download `path` from the container as a tar stream.
    pub async fn download_archive(&self, path: &str) -> DockhandResult<ArchiveStream> {
        tracing::debug!(container = %self.inner.container, path, "Downloading archive");
        self.inner
            .backend
            .download_archive(&self.inner.container, path)
            .await
    }

    /// Filesystem view of the container through this shell.
    pub fn filesystem(&self) -> FileSystem {
        FileSystem::new(self.clone())
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("container", &self.inner.container)
            .field("path", &self.inner.path)
            .field("dialect", &self.inner.dialect)
            .field("working_dir", &self.inner.working_dir)
            .finish()
    }
}

/// Parse `env`/`set` output. Lines that don't start a new variable continue
/// the previous value.
fn parse_environment(dump: &str, dialect: Dialect) -> BTreeMap<String, String> {
    let dump = dump.replace("\r\n", "\n");
    let mut environment = BTreeMap::new();
    let mut last: Option<String> = None;

    for line in dump.strip_suffix('\n').unwrap_or(&dump).split('\n') {
        match line.split_once('=') {
            Some((name, value)) if dialect.is_valid_env_name(name) => {
                environment.insert(name.to_string(), value.to_string());
                last = Some(name.to_string());
            }
            _ => {
                if let Some(value) = last.as_ref().and_then(|name| environment.get_mut(name)) {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }

    // The interpreter's own working directory, not part of the container's
    // environment.
    environment.remove("PWD");
    environment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment() {
        let dump = "PATH=/usr/bin:/bin\nHOME=/root\nPWD=/\nEMPTY=\n";
        let env = parse_environment(dump, Dialect::Posix);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin:/bin"));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/root"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
        assert!(!env.contains_key("PWD"));
    }

    #[test]
    fn test_parse_environment_multiline_values() {
        let dump = "GREETING=hello\nworld\nnot a=var\nNEXT=a=b\n";
        let env = parse_environment(dump, Dialect::Posix);
        assert_eq!(
            env.get("GREETING").map(String::as_str),
            Some("hello\nworld\nnot a=var")
        );
        assert_eq!(env.get("NEXT").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn test_parse_environment_windows() {
        let dump = "=C:=C:\\\r\nPath=C:\\Windows\r\nPROMPT=$P$G\r\n";
        let env = parse_environment(dump, Dialect::Windows);
        assert_eq!(env.get("Path").map(String::as_str), Some("C:\\Windows"));
        assert_eq!(env.get("PROMPT").map(String::as_str), Some("$P$G"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_options_defaults_from_serde() {
        let options: ShellOptions =
            serde_json::from_str(r#"{"sources": ["/etc/profile"]}"#).unwrap();
        assert_eq!(options.path, "/bin/sh");
        assert_eq!(options.working_dir, "/");
        assert_eq!(options.dialect, None);
        assert_eq!(options.sources, vec!["/etc/profile"]);
    }
}
