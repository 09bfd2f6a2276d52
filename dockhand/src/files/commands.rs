//! Command lines behind the filesystem operations, per dialect.

use crate::shell::Dialect;

/// A single path predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PathTest {
    Exists,
    File,
    Dir,
    Link,
    Readable,
    Writable,
    Executable,
}

pub(crate) struct FsCommands {
    dialect: Dialect,
}

impl FsCommands {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn q(&self, path: &str) -> String {
        self.dialect.quote(path)
    }

    /// Exit 0 when every test holds, 1 otherwise.
    pub(crate) fn test(&self, tests: &[PathTest], path: &str) -> String {
        let path = self.q(path);
        match self.dialect {
            Dialect::Posix => tests
                .iter()
                .map(|test| {
                    let flag = match test {
                        PathTest::Exists => "-e",
                        PathTest::File => "-f",
                        PathTest::Dir => "-d",
                        PathTest::Link => "-L",
                        PathTest::Readable => "-r",
                        PathTest::Writable => "-w",
                        PathTest::Executable => "-x",
                    };
                    format!("test {} {}", flag, path)
                })
                .collect::<Vec<_>>()
                .join(" && "),
            // cmd has no permission tests; existence stands in for them.
            Dialect::Windows => tests
                .iter()
                .map(|test| match test {
                    PathTest::Dir => format!("if exist {}\\* (ver>NUL) else (exit /b 1)", path),
                    PathTest::File => format!(
                        "if exist {0}\\* (exit /b 1) else if exist {0} (ver>NUL) else (exit /b 1)",
                        path
                    ),
                    PathTest::Link => format!("fsutil reparsepoint query {} >NUL 2>NUL", path),
                    _ => format!("if exist {} (ver>NUL) else (exit /b 1)", path),
                })
                .collect::<Vec<_>>()
                .join(" && "),
        }
    }

    /// One entry name per line, hidden entries included.
    pub(crate) fn listdir(&self, path: &str) -> String {
        match self.dialect {
            Dialect::Posix => format!("ls -A1 {}", self.q(path)),
            Dialect::Windows => format!("dir /b /a {}", self.q(path)),
        }
    }

    /// Paths under `root` whose name matches the glob `pattern`.
    pub(crate) fn find(&self, root: &str, pattern: &str) -> String {
        match self.dialect {
            Dialect::Posix => format!("find {} -name {}", self.q(root), self.q(pattern)),
            Dialect::Windows => format!("dir /s /b {}", self.q(&format!("{}\\{}", root, pattern))),
        }
    }

    pub(crate) fn size(&self, path: &str) -> String {
        match self.dialect {
            Dialect::Posix => format!("wc -c < {}", self.q(path)),
            Dialect::Windows => format!("for %I in ({}) do @echo %~zI", self.q(path)),
        }
    }

    pub(crate) fn mkdir(&self, path: &str, parents: bool) -> String {
        match (self.dialect, parents) {
            (Dialect::Posix, false) => format!("mkdir {}", self.q(path)),
            (Dialect::Posix, true) => format!("mkdir -p {}", self.q(path)),
            (Dialect::Windows, false) => format!("mkdir {}", self.q(path)),
            (Dialect::Windows, true) => {
                format!("if not exist {0} mkdir {0}", self.q(path))
            }
        }
    }

    pub(crate) fn rmdir(&self, path: &str) -> String {
        format!("rmdir {}", self.q(path))
    }

    pub(crate) fn rmtree(&self, path: &str) -> String {
        match self.dialect {
            Dialect::Posix => format!("rm -rf {}", self.q(path)),
            Dialect::Windows => format!("rmdir /s /q {}", self.q(path)),
        }
    }

    pub(crate) fn remove(&self, path: &str) -> String {
        match self.dialect {
            Dialect::Posix => format!("rm {}", self.q(path)),
            Dialect::Windows => format!("del /f /q {}", self.q(path)),
        }
    }

    /// Copy a file or, recursively, a directory. Links are copied as links.
    pub(crate) fn copy(&self, src: &str, dst: &str, is_dir: bool) -> String {
        match (self.dialect, is_dir) {
            (Dialect::Posix, _) => format!("cp -RP {} {}", self.q(src), self.q(dst)),
            (Dialect::Windows, false) => format!("copy /y {} {}", self.q(src), self.q(dst)),
            (Dialect::Windows, true) => {
                format!("xcopy /e /i /h /y {} {}", self.q(src), self.q(dst))
            }
        }
    }

    pub(crate) fn rename(&self, src: &str, dst: &str) -> String {
        match self.dialect {
            Dialect::Posix => format!("mv {} {}", self.q(src), self.q(dst)),
            Dialect::Windows => format!("move /y {} {}", self.q(src), self.q(dst)),
        }
    }

    /// Create a unique file or directory from `template` and print its path.
    ///
    /// `template` ends in `XXXXXX`; `suffix` is appended afterwards because
    /// not every `mktemp` supports suffixes. The suffixed name is created
    /// exclusively and the command fails if it already exists.
    pub(crate) fn mktemp(&self, template: &str, suffix: &str, directory: bool) -> String {
        let flag = if directory { "-d " } else { "" };
        if suffix.is_empty() {
            return format!("mktemp {}{}", flag, self.q(template));
        }
        let suffix = self.q(suffix);
        let (create, remove) = if directory {
            (format!("mkdir \"$f\"{}", suffix), "rmdir \"$f\"")
        } else {
            (format!("(set -C && : > \"$f\"{})", suffix), "rm -f \"$f\"")
        };
        format!(
            "f=$(mktemp {}{}) && if {}; then {} && printf '%s\\n' \"$f\"{}; else {}; false; fi",
            flag,
            self.q(template),
            create,
            remove,
            suffix,
            remove
        )
    }

    /// Create `path` exclusively, failing if it exists.
    pub(crate) fn create_exclusive(&self, path: &str, directory: bool) -> String {
        match (self.dialect, directory) {
            (Dialect::Posix, true) => format!("mkdir {}", self.q(path)),
            (Dialect::Posix, false) => format!("set -C && : > {}", self.q(path)),
            (Dialect::Windows, true) => format!("mkdir {}", self.q(path)),
            (Dialect::Windows, false) => {
                format!("if exist {0} (exit /b 1) else (type NUL > {0})", self.q(path))
            }
        }
    }
}
