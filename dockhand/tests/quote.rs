//! Quoting survives a real POSIX shell unchanged.

use dockhand::Dialect;
use proptest::prelude::*;

fn echo_through_sh(arg: &str) -> Vec<u8> {
    let line = format!("printf '%s' {}", Dialect::Posix.quote(arg));
    std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(line)
        .output()
        .expect("Failed to run /bin/sh")
        .stdout
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn posix_quote_is_identity_through_sh(arg in "[^\\x00]{0,40}") {
        prop_assert_eq!(echo_through_sh(&arg), arg.as_bytes().to_vec());
    }
}

#[test]
fn posix_join_keeps_argument_boundaries() {
    let args = ["a b", "", "it's", "$(false)", "*"];
    let line = format!("for a in {}; do printf '[%s]' \"$a\"; done", Dialect::Posix.join(args));
    let output = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(line)
        .output()
        .expect("Failed to run /bin/sh");
    assert_eq!(output.stdout, b"[a b][][it's][$(false)][*]");
}
