//! Command-line quoting dialects.
//!
//! An argument list handed to [`Shell::run`](crate::Shell::run) is joined
//! into a single command line for the bound interpreter. Each dialect quotes
//! so that the interpreter hands every argument to the program literally.

use serde::{Deserialize, Serialize};

/// Characters `cmd.exe` interprets even inside a quoted argument.
const CMD_METACHARACTERS: &[char] = &['(', ')', '%', '!', '^', '"', '<', '>', '&', '|'];

/// Quoting rules of the interpreter bound to a shell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// POSIX `sh` and compatibles.
    #[default]
    Posix,
    /// Windows `cmd.exe`.
    Windows,
}

impl Dialect {
    /// Pick the dialect for an interpreter path.
    pub fn for_interpreter(path: &str) -> Self {
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path)
            .to_ascii_lowercase();
        match name.as_str() {
            "cmd" | "cmd.exe" => Dialect::Windows,
            _ => Dialect::Posix,
        }
    }

    /// Quote a single argument.
    pub fn quote(&self, arg: &str) -> String {
        match self {
            Dialect::Posix => posix_quote(arg),
            Dialect::Windows => windows_quote(arg),
        }
    }

    /// Join arguments into one command line.
    pub fn join<I, S>(&self, args: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter()
            .map(|arg| self.quote(arg.as_ref()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the exec argv that runs `line` through `interpreter`.
    pub(crate) fn wrap(&self, interpreter: &str, line: &str) -> Vec<String> {
        match self {
            Dialect::Posix => vec![interpreter.to_string(), "-c".to_string(), line.to_string()],
            Dialect::Windows => vec![
                interpreter.to_string(),
                "/S".to_string(),
                "/C".to_string(),
                line.to_string(),
            ],
        }
    }

    /// Whether `name` can be an environment variable name in this dialect.
    pub(crate) fn is_valid_env_name(&self, name: &str) -> bool {
        match self {
            Dialect::Posix => {
                let mut chars = name.chars();
                matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
                    && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
            }
            Dialect::Windows => {
                !name.is_empty()
                    && !name.contains('=')
                    && !name.chars().any(|c| c.is_whitespace() || CMD_METACHARACTERS.contains(&c))
            }
        }
    }

    /// Command that prints the environment, after sourcing `sources`.
    pub(crate) fn capture_env_command(&self, sources: &[String]) -> String {
        let (source, dump) = match self {
            Dialect::Posix => (". {} > /dev/null 2> /dev/null", "env"),
            Dialect::Windows => ("call {} >NUL 2>NUL", "set"),
        };
        let mut steps: Vec<String> = sources
            .iter()
            .map(|src| source.replace("{}", &self.quote(src)))
            .collect();
        steps.push(dump.to_string());
        steps.join(" && ")
    }

    /// Command that prints one environment variable, exit 1 when unset.
    ///
    /// `name` must already have passed `is_valid_env_name`.
    pub(crate) fn printenv_command(&self, name: &str) -> String {
        match self {
            Dialect::Posix => format!("printenv {}", name),
            Dialect::Windows => format!("if defined {0} (echo(%{0}%) else (exit /b 1)", name),
        }
    }

    /// Line terminator the interpreter's tools print.
    pub(crate) fn newline(&self) -> &'static str {
        match self {
            Dialect::Posix => "\n",
            Dialect::Windows => "\r\n",
        }
    }
}

fn posix_quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let safe = arg.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-' | '_')
    });
    if safe {
        return arg.to_string();
    }
    // Close the quote, emit a double-quoted single quote, reopen.
    format!("'{}'", arg.replace('\'', r#"'"'"'"#))
}

fn windows_quote(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '\x0b' | '"'));

    let argv = if needs_quotes {
        // CommandLineToArgvW rules: backslashes are literal unless they
        // precede a quote.
        let mut quoted = String::with_capacity(arg.len() + 2);
        quoted.push('"');
        let mut backslashes = 0usize;
        for c in arg.chars() {
            match c {
                '\\' => backslashes += 1,
                '"' => {
                    quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                    quoted.push('"');
                    backslashes = 0;
                }
                _ => {
                    quoted.push_str(&"\\".repeat(backslashes));
                    quoted.push(c);
                    backslashes = 0;
                }
            }
        }
        quoted.push_str(&"\\".repeat(backslashes * 2));
        quoted.push('"');
        quoted
    } else {
        arg.to_string()
    };

    let mut escaped = String::with_capacity(argv.len());
    for c in argv.chars() {
        if CMD_METACHARACTERS.contains(&c) {
            escaped.push('^');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_for_interpreter() {
        assert_eq!(Dialect::for_interpreter("/bin/sh"), Dialect::Posix);
        assert_eq!(Dialect::for_interpreter("/bin/bash"), Dialect::Posix);
        assert_eq!(Dialect::for_interpreter("cmd.exe"), Dialect::Windows);
        assert_eq!(
            Dialect::for_interpreter(r"C:\Windows\System32\CMD.EXE"),
            Dialect::Windows
        );
    }

    #[test]
    fn test_posix_quote_safe_passthrough() {
        assert_eq!(posix_quote("/usr/bin/env"), "/usr/bin/env");
        assert_eq!(posix_quote("a=b,c:d@e%f+g"), "a=b,c:d@e%f+g");
    }

    #[test]
    fn test_posix_quote_special() {
        assert_eq!(posix_quote(""), "''");
        assert_eq!(posix_quote("a b"), "'a b'");
        assert_eq!(posix_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(posix_quote(r#"x "y";z"#), r#"'x "y";z'"#);
        assert_eq!(posix_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_windows_quote_plain() {
        assert_eq!(windows_quote("dir"), "dir");
        assert_eq!(windows_quote(r"C:\temp\file.txt"), r"C:\temp\file.txt");
    }

    #[test]
    fn test_windows_quote_spaces_and_quotes() {
        assert_eq!(windows_quote("a b"), r#"^"a b^""#);
        assert_eq!(windows_quote(""), r#"^"^""#);
        assert_eq!(windows_quote(r#"say "hi""#), r#"^"say \^"hi\^"^""#);
        // Trailing backslashes are doubled so they don't escape the closing quote.
        assert_eq!(windows_quote(r"C:\my dir\"), r#"^"C:\my dir\\^""#);
    }

    #[test]
    fn test_windows_quote_metacharacters() {
        assert_eq!(windows_quote("a&b|c"), "a^&b^|c");
        assert_eq!(windows_quote("%PATH%"), "^%PATH^%");
    }

    #[test]
    fn test_join() {
        let line = Dialect::Posix.join(["echo", "hello world", "a;b"]);
        assert_eq!(line, "echo 'hello world' 'a;b'");
    }

    #[test]
    fn test_wrap() {
        assert_eq!(
            Dialect::Posix.wrap("/bin/sh", "exit 7"),
            vec!["/bin/sh", "-c", "exit 7"]
        );
        assert_eq!(
            Dialect::Windows.wrap("cmd.exe", "exit 7"),
            vec!["cmd.exe", "/S", "/C", "exit 7"]
        );
    }

    #[test]
    fn test_env_names() {
        assert!(Dialect::Posix.is_valid_env_name("PATH"));
        assert!(Dialect::Posix.is_valid_env_name("_private1"));
        assert!(!Dialect::Posix.is_valid_env_name("1ABC"));
        assert!(!Dialect::Posix.is_valid_env_name("A-B"));
        assert!(!Dialect::Posix.is_valid_env_name("A;rm"));
        assert!(!Dialect::Posix.is_valid_env_name(""));
        assert!(Dialect::Windows.is_valid_env_name("ProgramFiles.x86"));
        assert!(!Dialect::Windows.is_valid_env_name("A&B"));
    }

    #[test]
    fn test_capture_env_command() {
        assert_eq!(Dialect::Posix.capture_env_command(&[]), "env");
        let sources = vec!["/etc/profile".to_string(), "/opt/my env.sh".to_string()];
        assert_eq!(
            Dialect::Posix.capture_env_command(&sources),
            ". /etc/profile > /dev/null 2> /dev/null && . '/opt/my env.sh' > /dev/null 2> /dev/null && env"
        );
    }
}
