use serde::{Deserialize, Serialize};

use super::FileSystem;

/// Options for [`FileSystem::mktemp`] and [`FileSystem::tempfile`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MktempOptions {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    /// Parent directory. Defaults to `$TMPDIR` (`%TEMP%` on Windows), then
    /// the system temporary directory.
    #[serde(default)]
    pub dir: Option<String>,
    /// Create a directory instead of a file.
    #[serde(default)]
    pub directory: bool,
}

fn default_prefix() -> String {
    "tmp.".to_string()
}

impl Default for MktempOptions {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            suffix: String::new(),
            dir: None,
            directory: false,
        }
    }
}

impl MktempOptions {
    pub fn directory() -> Self {
        Self {
            directory: true,
            ..Default::default()
        }
    }
}

/// A temporary file or directory inside the container.
///
/// Call [`close`](Self::close) to remove it and observe errors. Dropping the
/// guard removes it in the background on a best-effort basis.
pub struct TempFile {
    path: String,
    is_dir: bool,
    files: FileSystem,
    closed: bool,
}

impl TempFile {
    pub(crate) fn new(files: FileSystem, path: String, is_dir: bool) -> Self {
        Self {
            path,
            is_dir,
            files,
            closed: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Remove the temporary path.
    pub async fn close(mut self) -> dockhand_shared::errors::DockhandResult<()> {
        self.closed = true;
        if self.is_dir {
            self.files.rmtree(&self.path).await
        } else {
            self.files.remove(&self.path).await
        }
    }

    /// Keep the path around and return it.
    pub fn keep(mut self) -> String {
        self.closed = true;
        std::mem::take(&mut self.path)
    }
}

impl std::fmt::Debug for TempFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempFile")
            .field("path", &self.path)
            .field("is_dir", &self.is_dir)
            .finish()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(path = %path, "No runtime to clean up temporary path, leaking it");
            return;
        };
        let files = self.files.clone();
        let is_dir = self.is_dir;
        handle.spawn(async move {
            let result = if is_dir {
                files.rmtree(&path).await
            } else {
                files.remove(&path).await
            };
            if let Err(e) = result {
                tracing::debug!(path = %path, error = %e, "Failed to clean up temporary path");
            }
        });
    }
}
