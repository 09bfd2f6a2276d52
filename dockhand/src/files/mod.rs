//! Filesystem access to a container.
//!
//! Queries and mutations run as commands through the bound [`Shell`].
//! Content and tree transfers move tar archives through the exec backend,
//! so they are byte-exact and keep symlinks as links.

mod commands;
mod temp;

pub use temp::{MktempOptions, TempFile};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dockhand_shared::constants::archive::DEFAULT_FILE_MODE;
use dockhand_shared::errors::{DockhandError, DockhandResult, TransferDirection};

use crate::archive::{
    self, CopyDescriptor, Placement, SingleEntry, pack_file_bytes, pack_path, stream_bytes,
};
use crate::backend::ArchiveStream;
use crate::shell::{Dialect, Encoding, ExecResult, Shell, ShellCommand};
use commands::{FsCommands, PathTest};

/// Symlinks followed by `read` before giving up.
const MAX_SYMLINK_DEPTH: usize = 16;

/// Attempts at picking an unused temporary name on Windows.
const MKTEMP_ATTEMPTS: usize = 16;

static MKTEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Access checks for [`FileSystem::access`]. The default only checks
/// existence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessMode {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl AccessMode {
    pub const EXISTS: AccessMode = AccessMode {
        read: false,
        write: false,
        execute: false,
    };
    pub const READ: AccessMode = AccessMode {
        read: true,
        write: false,
        execute: false,
    };
    pub const WRITE: AccessMode = AccessMode {
        read: false,
        write: true,
        execute: false,
    };
    pub const EXECUTE: AccessMode = AccessMode {
        read: false,
        write: false,
        execute: true,
    };
}

impl std::ops::BitOr for AccessMode {
    type Output = AccessMode;

    fn bitor(self, rhs: AccessMode) -> AccessMode {
        AccessMode {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
            execute: self.execute || rhs.execute,
        }
    }
}

/// Filesystem of the container a [`Shell`] is bound to.
///
/// Relative paths are resolved against the shell's working directory.
#[derive(Clone, Debug)]
pub struct FileSystem {
    shell: Shell,
}

impl FileSystem {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    fn commands(&self) -> FsCommands {
        FsCommands::new(self.shell.dialect())
    }

    fn separators(&self) -> &'static [char] {
        match self.shell.dialect() {
            Dialect::Posix => &['/'],
            Dialect::Windows => &['/', '\\'],
        }
    }

    /// Absolute form of `path`.
    pub fn resolve(&self, path: &str) -> String {
        let absolute = match self.shell.dialect() {
            Dialect::Posix => path.starts_with('/'),
            Dialect::Windows => {
                path.starts_with("\\\\")
                    || path
                        .as_bytes()
                        .get(1..3)
                        .is_some_and(|rest| rest[0] == b':' && (rest[1] == b'\\' || rest[1] == b'/'))
            }
        };
        if absolute {
            return path.to_string();
        }
        let sep = match self.shell.dialect() {
            Dialect::Posix => '/',
            Dialect::Windows => '\\',
        };
        let base = self.shell.working_dir().trim_end_matches(self.separators());
        format!("{}{}{}", base, sep, path)
    }

    /// Split an absolute path into parent directory and final name.
    fn split(&self, path: &str) -> DockhandResult<(String, String)> {
        let seps = self.separators();
        let trimmed = path.trim_end_matches(seps);
        let invalid = || DockhandError::InvalidInput(format!("{} has no parent directory", path));
        let idx = trimmed.rfind(seps).ok_or_else(invalid)?;
        let name = &trimmed[idx + 1..];
        if name.is_empty() || name == "." || name == ".." {
            return Err(invalid());
        }
        // Keep the separator for roots: "/" and "C:\".
        let parent = if idx == 0 || trimmed[..idx].ends_with(':') {
            &trimmed[..=idx]
        } else {
            &trimmed[..idx]
        };
        Ok((parent.to_string(), name.to_string()))
    }

    async fn run(&self, line: String) -> DockhandResult<ExecResult> {
        self.shell.execute(ShellCommand::raw(line)).await
    }

    async fn probe(&self, tests: &[PathTest], path: &str) -> DockhandResult<bool> {
        let result = self.run(self.commands().test(tests, &self.resolve(path))).await?;
        match result.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(result.into_error()),
        }
    }

    /// Turn a failed command on `path` into the matching error kind.
    async fn diagnose(&self, path: &str, operation: &str, result: ExecResult) -> DockhandError {
        match self.exists(path).await {
            Ok(false) => return DockhandError::not_found(path),
            Err(e) => return e,
            Ok(true) => {}
        }
        let stderr = String::from_utf8_lossy(&result.stderr).to_ascii_lowercase();
        if stderr.contains("permission denied")
            || stderr.contains("access is denied")
            || stderr.contains("operation not permitted")
        {
            DockhandError::PermissionDenied {
                path: path.to_string(),
                operation: operation.to_string(),
            }
        } else {
            result.into_error()
        }
    }

    fn lines(&self, stdout: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(stdout)
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub async fn exists(&self, path: &str) -> DockhandResult<bool> {
        self.probe(&[PathTest::Exists], path).await
    }

    pub async fn isfile(&self, path: &str) -> DockhandResult<bool> {
        self.probe(&[PathTest::File], path).await
    }

    pub async fn isdir(&self, path: &str) -> DockhandResult<bool> {
        self.probe(&[PathTest::Dir], path).await
    }

    pub async fn islink(&self, path: &str) -> DockhandResult<bool> {
        self.probe(&[PathTest::Link], path).await
    }

    /// Whether the container's user may access `path` with `mode`.
    pub async fn access(&self, path: &str, mode: AccessMode) -> DockhandResult<bool> {
        let mut tests = vec![PathTest::Exists];
        if mode.read {
            tests.push(PathTest::Readable);
        }
        if mode.write {
            tests.push(PathTest::Writable);
        }
        if mode.execute {
            tests.push(PathTest::Executable);
        }
        self.probe(&tests, path).await
    }

    /// Names of the entries in directory `path`, hidden ones included.
    pub async fn listdir(&self, path: &str) -> DockhandResult<Vec<String>> {
        let path = self.resolve(path);
        let result = self.run(self.commands().listdir(&path)).await?;
        if !result.success() {
            return Err(self.diagnose(&path, "list", result).await);
        }
        let mut names = self.lines(&result.stdout);
        names.sort();
        Ok(names)
    }

    /// Paths under `root` whose name matches the glob `pattern`.
    ///
    /// Unreadable subdirectories are skipped.
    pub async fn find(&self, root: &str, pattern: &str) -> DockhandResult<Vec<String>> {
        let root = self.resolve(root);
        let result = self.run(self.commands().find(&root, pattern)).await?;
        if !result.success() {
            if !self.exists(&root).await? {
                return Err(DockhandError::not_found(root));
            }
            tracing::debug!(
                root = %root,
                exit_code = result.exit_code,
                "find reported errors, returning partial results"
            );
        }
        Ok(self.lines(&result.stdout))
    }

    /// Size of file `path` in bytes.
    pub async fn size(&self, path: &str) -> DockhandResult<u64> {
        let path = self.resolve(path);
        let result = self.run(self.commands().size(&path)).await?;
        if !result.success() {
            return Err(self.diagnose(&path, "stat", result).await);
        }
        let text = String::from_utf8_lossy(&result.stdout);
        text.trim().parse::<u64>().map_err(|e| {
            DockhandError::Exec(format!("unexpected size output for {}: {:?} ({})", path, text.trim(), e))
        })
    }

    /// Create directory `path`. Its parent must exist.
    pub async fn mkdir(&self, path: &str, exist_ok: bool) -> DockhandResult<()> {
        let path = self.resolve(path);
        let result = self.run(self.commands().mkdir(&path, false)).await?;
        if result.success() {
            return Ok(());
        }
        if self.exists(&path).await? {
            return if exist_ok && self.isdir(&path).await? {
                Ok(())
            } else {
                Err(DockhandError::InvalidInput(format!("{} already exists", path)))
            };
        }
        let (parent, _) = self.split(&path)?;
        if !self.exists(&parent).await? {
            return Err(DockhandError::not_found(parent));
        }
        Err(self.diagnose(&path, "mkdir", result).await)
    }

    /// Create directory `path` and any missing parents.
    pub async fn makedirs(&self, path: &str, exist_ok: bool) -> DockhandResult<()> {
        let path = self.resolve(path);
        if !exist_ok && self.exists(&path).await? {
            return Err(DockhandError::InvalidInput(format!("{} already exists", path)));
        }
        let result = self.run(self.commands().mkdir(&path, true)).await?;
        if result.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&result.stderr).to_ascii_lowercase();
        if stderr.contains("permission denied") || stderr.contains("access is denied") {
            return Err(DockhandError::PermissionDenied {
                path,
                operation: "mkdir".to_string(),
            });
        }
        Err(result.into_error())
    }

    /// Remove the empty directory `path`.
    pub async fn rmdir(&self, path: &str) -> DockhandResult<()> {
        let path = self.resolve(path);
        let result = self.run(self.commands().rmdir(&path)).await?;
        if result.success() {
            Ok(())
        } else {
            Err(self.diagnose(&path, "rmdir", result).await)
        }
    }

    /// Remove `path` and everything below it.
    pub async fn rmtree(&self, path: &str) -> DockhandResult<()> {
        let path = self.resolve(path);
        if !self.exists(&path).await? && !self.islink(&path).await? {
            return Err(DockhandError::not_found(path));
        }
        let result = self.run(self.commands().rmtree(&path)).await?;
        if result.success() {
            Ok(())
        } else {
            Err(self.diagnose(&path, "remove", result).await)
        }
    }

    /// Remove the file or link `path`.
    pub async fn remove(&self, path: &str) -> DockhandResult<()> {
        let path = self.resolve(path);
        let result = self.run(self.commands().remove(&path)).await?;
        if result.success() {
            Ok(())
        } else {
            Err(self.diagnose(&path, "remove", result).await)
        }
    }

    /// Copy a file or directory tree within the container.
    pub async fn copy(&self, src: &str, dst: &str) -> DockhandResult<()> {
        let src = self.resolve(src);
        let dst = self.resolve(dst);
        let is_dir = self.isdir(&src).await?;
        let result = self.run(self.commands().copy(&src, &dst, is_dir)).await?;
        if result.success() {
            Ok(())
        } else {
            Err(self.diagnose(&src, "copy", result).await)
        }
    }

    /// Move `src` to `dst` within the container.
    pub async fn rename(&self, src: &str, dst: &str) -> DockhandResult<()> {
        let src = self.resolve(src);
        let dst = self.resolve(dst);
        let result = self.run(self.commands().rename(&src, &dst)).await?;
        if result.success() {
            Ok(())
        } else {
            Err(self.diagnose(&src, "move", result).await)
        }
    }

    /// Create a uniquely named file or directory and return its path.
    pub async fn mktemp(&self, options: &MktempOptions) -> DockhandResult<String> {
        let seps = self.separators();
        if options.prefix.contains(seps) || options.suffix.contains(seps) {
            return Err(DockhandError::InvalidInput(
                "temporary name prefix and suffix must not contain separators".to_string(),
            ));
        }

        match self.shell.dialect() {
            Dialect::Posix => {
                let dir = options
                    .dir
                    .clone()
                    .or_else(|| self.shell.environment().get("TMPDIR").cloned())
                    .unwrap_or_else(|| "/tmp".to_string());
                let template = format!(
                    "{}/{}XXXXXX",
                    self.resolve(&dir).trim_end_matches('/'),
                    options.prefix
                );
                let line = self
                    .commands()
                    .mktemp(&template, &options.suffix, options.directory);
                let path = self
                    .shell
                    .check_output(ShellCommand::raw(line).text())
                    .await?
                    .into_text()?;
                Ok(path)
            }
            Dialect::Windows => {
                let dir = options
                    .dir
                    .clone()
                    .or_else(|| self.shell.environment().get("TEMP").cloned())
                    .unwrap_or_else(|| r"C:\Windows\Temp".to_string());
                let dir = self.resolve(&dir);
                for _ in 0..MKTEMP_ATTEMPTS {
                    let path = format!(
                        "{}\\{}{}{}",
                        dir.trim_end_matches(seps),
                        options.prefix,
                        unique_token(),
                        options.suffix
                    );
                    let line = self.commands().create_exclusive(&path, options.directory);
                    if self.run(line).await?.success() {
                        return Ok(path);
                    }
                }
                Err(DockhandError::Exec(format!(
                    "could not create a temporary path in {}",
                    dir
                )))
            }
        }
    }

    /// Create a temporary path removed when the guard is closed or dropped.
    pub async fn tempfile(&self, options: &MktempOptions) -> DockhandResult<TempFile> {
        let path = self.mktemp(options).await?;
        Ok(TempFile::new(self.clone(), path, options.directory))
    }

    /// Read file `path`, following symlinks.
    pub async fn read(&self, path: &str) -> DockhandResult<Vec<u8>> {
        let mut path = self.resolve(path);
        for _ in 0..MAX_SYMLINK_DEPTH {
            let stream = self.shell.download_archive(&path).await?;
            match archive::read_single_entry(stream).await? {
                SingleEntry::File(content) => return Ok(content),
                SingleEntry::Symlink(target) => {
                    let target = target.to_string_lossy().into_owned();
                    let (parent, _) = self.split(&path)?;
                    path = if self.is_absolute(&target) {
                        target
                    } else {
                        format!("{}/{}", parent.trim_end_matches(self.separators()), target)
                    };
                }
                SingleEntry::Directory => {
                    return Err(DockhandError::InvalidInput(format!("{} is a directory", path)));
                }
                SingleEntry::Other(kind) => {
                    return Err(DockhandError::InvalidInput(format!(
                        "{} is not a regular file ({})",
                        path, kind
                    )));
                }
                SingleEntry::Empty => return Err(DockhandError::not_found(path)),
            }
        }
        Err(DockhandError::InvalidInput(format!(
            "too many levels of symbolic links at {}",
            path
        )))
    }

    /// Read file `path` and decode it.
    pub async fn read_text(&self, path: &str, encoding: Encoding) -> DockhandResult<String> {
        encoding.decode(&self.read(path).await?)
    }

    /// Read file `path` as UTF-8.
    pub async fn read_to_string(&self, path: &str) -> DockhandResult<String> {
        self.read_text(path, Encoding::Utf8).await
    }

    /// Write `content` to file `path`, replacing it. The parent directory
    /// must exist.
    pub async fn write(&self, path: &str, content: impl AsRef<[u8]>) -> DockhandResult<()> {
        self.write_with_mode(path, content, DEFAULT_FILE_MODE).await
    }

    pub async fn write_with_mode(
        &self,
        path: &str,
        content: impl AsRef<[u8]>,
        mode: u32,
    ) -> DockhandResult<()> {
        let path = self.resolve(path);
        let (parent, name) = self.split(&path)?;
        let archive = pack_file_bytes(&name, content.as_ref(), mode)?;
        self.shell.upload_archive(&parent, stream_bytes(archive)).await?;

        if !self.isfile(&path).await? {
            return Err(DockhandError::upload(format!(
                "{} is not a file after upload",
                path
            )));
        }
        tracing::debug!(path = %path, len = content.as_ref().len(), "Wrote file");
        Ok(())
    }

    /// Copy a container file or tree to `host_path` on the host.
    pub async fn copy_to_host(
        &self,
        container_path: &str,
        host_path: impl AsRef<Path>,
    ) -> DockhandResult<CopyDescriptor> {
        let container_path = self.resolve(container_path);
        let host_path = host_path.as_ref().to_path_buf();
        let stream = self.shell.download_archive(&container_path).await?;
        let entries = archive::unpack(
            stream,
            Placement::As(host_path.clone()),
            TransferDirection::ContainerToHost,
        )
        .await?;

        let is_dir = std::fs::symlink_metadata(&host_path)
            .map(|m| m.is_dir())
            .map_err(|e| DockhandError::download(format!("{}: {}", host_path.display(), e)))?;
        tracing::debug!(
            source = %container_path,
            destination = %host_path.display(),
            entries,
            "Copied from container"
        );
        Ok(CopyDescriptor {
            source: container_path,
            destination: host_path.to_string_lossy().into_owned(),
            direction: TransferDirection::ContainerToHost,
            is_dir,
        })
    }

    /// Copy a host file or tree to `container_path`. The container parent
    /// directory must exist.
    pub async fn copy_from_host(
        &self,
        host_path: impl AsRef<Path>,
        container_path: &str,
    ) -> DockhandResult<CopyDescriptor> {
        let host_path = host_path.as_ref().to_path_buf();
        let is_dir = host_is_dir(&host_path)?;
        let container_path = self.resolve(container_path);
        let (parent, name) = self.split(&container_path)?;

        let stream = pack_path(host_path.clone(), name, TransferDirection::HostToContainer);
        self.shell.upload_archive(&parent, stream).await?;
        tracing::debug!(
            source = %host_path.display(),
            destination = %container_path,
            "Copied into container"
        );
        Ok(CopyDescriptor {
            source: host_path.to_string_lossy().into_owned(),
            destination: container_path,
            direction: TransferDirection::HostToContainer,
            is_dir,
        })
    }

    /// Copy a host file or tree into the existing container directory
    /// `container_dir`, keeping its name.
    pub async fn put(
        &self,
        host_path: impl AsRef<Path>,
        container_dir: &str,
    ) -> DockhandResult<CopyDescriptor> {
        let host_path = host_path.as_ref().to_path_buf();
        let name = host_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DockhandError::InvalidInput(format!("{} has no file name", host_path.display()))
            })?;
        let container_dir = self.resolve(container_dir);
        if !self.isdir(&container_dir).await? {
            return Err(DockhandError::not_found(container_dir));
        }
        let sep = match self.shell.dialect() {
            Dialect::Posix => "/",
            Dialect::Windows => "\\",
        };
        let destination = format!("{}{}{}", container_dir.trim_end_matches(self.separators()), sep, name);
        self.copy_from_host(host_path, &destination).await
    }

    /// Upload a raw tar stream into directory `dir`.
    pub async fn put_archive(&self, dir: &str, archive: ArchiveStream) -> DockhandResult<()> {
        self.shell.upload_archive(&self.resolve(dir), archive).await
    }

    /// Download `path` as a raw tar stream.
    pub async fn get_archive(&self, path: &str) -> DockhandResult<ArchiveStream> {
        self.shell.download_archive(&self.resolve(path)).await
    }

    fn is_absolute(&self, path: &str) -> bool {
        self.resolve(path) == path
    }
}

fn host_is_dir(path: &Path) -> DockhandResult<bool> {
    std::fs::symlink_metadata(path)
        .map(|m| m.is_dir())
        .map_err(|e| DockhandError::upload(format!("{}: {}", path.display(), e)))
}

fn unique_token() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    let count = MKTEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}", nanos ^ count.rotate_left(32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_combines() {
        let mode = AccessMode::READ | AccessMode::EXECUTE;
        assert!(mode.read && mode.execute && !mode.write);
        assert_eq!(AccessMode::default(), AccessMode::EXISTS);
    }

    #[test]
    fn test_unique_tokens_differ() {
        assert_ne!(unique_token(), unique_token());
    }
}
