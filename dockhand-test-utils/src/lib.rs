//! Test support for dockhand.
//!
//! [`LocalBackend`] implements the exec capabilities against the local host,
//! so the shell, process and filesystem layers can be exercised without a
//! container engine. [`TestShell`] wires it up with an isolated scratch
//! directory. [`ShapedBackend`] slows down or breaks a backend's output and
//! signal delivery.

mod local;
mod shaped;

pub use local::LocalBackend;
pub use shaped::{ShapedBackend, Shaping};

use std::sync::{Arc, OnceLock};

use dockhand::{Shell, ShellOptions};
use tempfile::TempDir;

static LOG_GUARD: OnceLock<dockhand::util::WorkerGuard> = OnceLock::new();

/// Install the dockhand tracing subscriber once per test binary.
pub fn init_logging() {
    LOG_GUARD.get_or_init(dockhand::util::init_tracing);
}

/// A shell over [`LocalBackend`] plus a scratch directory, removed on drop.
pub struct TestShell {
    pub shell: Shell,
    pub backend: Arc<LocalBackend>,
    scratch: TempDir,
}

impl TestShell {
    pub async fn new() -> Self {
        Self::with_options(ShellOptions::default()).await
    }

    pub async fn with_options(options: ShellOptions) -> Self {
        init_logging();
        let scratch = TempDir::new().expect("Failed to create scratch dir");
        let backend = Arc::new(LocalBackend::new());
        let shell = Shell::new(backend.clone(), "local", options)
            .await
            .expect("Failed to create shell");
        Self {
            shell,
            backend,
            scratch,
        }
    }

    /// A shell whose backend is shaped by `shaping` once the shell is up.
    pub async fn shaped(shaping: Shaping) -> Self {
        init_logging();
        let scratch = TempDir::new().expect("Failed to create scratch dir");
        let backend = Arc::new(LocalBackend::new());
        let shaped = Arc::new(ShapedBackend::new(backend.clone()));
        let shell = Shell::new(shaped.clone(), "local", ShellOptions::default())
            .await
            .expect("Failed to create shell");
        shaped.set_shaping(shaping);
        Self {
            shell,
            backend,
            scratch,
        }
    }

    /// Absolute path of `relative` inside the scratch directory.
    pub fn path(&self, relative: &str) -> String {
        self.scratch
            .path()
            .join(relative)
            .to_string_lossy()
            .into_owned()
    }

    pub fn scratch(&self) -> &std::path::Path {
        self.scratch.path()
    }
}
