//! dockhand - run processes and move files inside running containers
//!
//! A [`Shell`] binds an [`ExecBackend`] (the container engine client) to one
//! container. From it you get [`Process`] handles for commands, and a
//! [`FileSystem`] for inspecting and changing the container's files.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "docker")]
//! # async fn example() -> dockhand::DockhandResult<()> {
//! use std::sync::Arc;
//! use dockhand::{Shell, ShellCommand, ShellOptions};
//! use dockhand::backend::docker::DockerBackend;
//!
//! let backend = Arc::new(DockerBackend::from_env()?);
//! let shell = Shell::new(backend, "my-container", ShellOptions::default()).await?;
//!
//! let kernel = shell.check_output(ShellCommand::new("uname").arg("-r").text()).await?;
//! shell.filesystem().write("/tmp/hello.txt", b"hello\n").await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backend;
pub mod files;
pub mod process;
pub mod shell;
pub mod util;

pub use archive::CopyDescriptor;
pub use backend::{
    ArchiveStream, ContainerRef, ExecBackend, ExecInspection, ExecOutput, ExecRequest,
    ExecSession, OutputStream,
};
pub use dockhand_shared::{DaemonEndpoint, DockhandError, DockhandResult, TransferDirection};
pub use dockhand_shared::constants::signals;
pub use files::{AccessMode, FileSystem, MktempOptions, TempFile};
pub use process::{Process, ProcessState, ProcessStderr, ProcessStdout};
pub use shell::{
    CommandLine, Dialect, Encoding, ExecResult, Output, Shell, ShellCommand, ShellOptions,
    TimeoutPolicy,
};
