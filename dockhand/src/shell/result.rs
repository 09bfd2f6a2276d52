use std::time::Duration;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use super::command::Encoding;

/// Outcome of a process that ran to completion.
///
/// `exit_code` is the process's exit code, or a negative signal number when
/// the handle killed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    /// Encoding requested for the command, if any.
    pub encoding: Option<Encoding>,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> DockhandResult<String> {
        self.encoding.unwrap_or_default().decode(&self.stdout)
    }

    pub fn stderr_text(&self) -> DockhandResult<String> {
        self.encoding.unwrap_or_default().decode(&self.stderr)
    }

    /// Turn a non-zero exit into [`DockhandError::NonZeroExit`].
    pub fn check(self) -> DockhandResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub(crate) fn into_error(self) -> DockhandError {
        DockhandError::NonZeroExit {
            command: self.command,
            code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Stdout of a checked command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Text(String),
    Bytes(Vec<u8>),
}

impl Output {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Output::Text(text) => text.as_bytes(),
            Output::Bytes(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(text) => Some(text),
            Output::Bytes(_) => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Output::Text(text) => text.into_bytes(),
            Output::Bytes(bytes) => bytes,
        }
    }

    /// Text output, decoding raw bytes as UTF-8 if needed.
    pub fn into_text(self) -> DockhandResult<String> {
        match self {
            Output::Text(text) => Ok(text),
            Output::Bytes(bytes) => Encoding::Utf8.decode(&bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32) -> ExecResult {
        ExecResult {
            command: "false".to_string(),
            exit_code,
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
            duration: Duration::from_millis(3),
            encoding: None,
        }
    }

    #[test]
    fn test_check_success() {
        assert!(result(0).check().is_ok());
    }

    #[test]
    fn test_check_failure_carries_output() {
        match result(1).check() {
            Err(DockhandError::NonZeroExit {
                command,
                code,
                stdout,
                stderr,
            }) => {
                assert_eq!(command, "false");
                assert_eq!(code, 1);
                assert_eq!(stdout, b"out");
                assert_eq!(stderr, b"err");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_output_accessors() {
        let text = Output::Text("hi".to_string());
        assert_eq!(text.as_bytes(), b"hi");
        assert_eq!(text.as_text(), Some("hi"));
        let bytes = Output::Bytes(vec![0, 1, 2]);
        assert_eq!(bytes.as_text(), None);
        assert_eq!(bytes.into_bytes(), vec![0, 1, 2]);
        assert!(Output::Bytes(vec![0xff]).into_text().is_err());
    }
}
