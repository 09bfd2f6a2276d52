//! Integration tests for command execution through a shell.

use std::collections::BTreeMap;

use dockhand::{DockhandError, Encoding, Output, ShellCommand, ShellOptions};
use dockhand_test_utils::TestShell;

// ============================================================================
// ENVIRONMENT CAPTURE TESTS
// ============================================================================

#[tokio::test]
async fn environment_is_captured_at_construction() {
    let ctx = TestShell::new().await;
    let env = ctx.shell.environment();
    assert!(env.contains_key("PATH"));
    assert!(!env.contains_key("PWD"));
}

#[tokio::test]
async fn sourced_files_contribute_to_environment() {
    let scratch = TestShell::new().await;
    let profile = scratch.path("profile.sh");
    std::fs::write(&profile, "export GREETING='hello\nworld'\nexport STAGE=sourced\n").unwrap();

    let ctx = TestShell::with_options(ShellOptions {
        sources: vec![profile],
        ..Default::default()
    })
    .await;

    let env = ctx.shell.environment();
    assert_eq!(env.get("STAGE").map(String::as_str), Some("sourced"));
    assert_eq!(env.get("GREETING").map(String::as_str), Some("hello\nworld"));
}

#[tokio::test]
async fn missing_source_file_is_not_found() {
    let ctx = TestShell::new().await;
    let options = ShellOptions {
        sources: vec![ctx.path("does-not-exist.sh")],
        ..Default::default()
    };
    let err = dockhand::Shell::new(ctx.backend.clone(), "local", options)
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
async fn failing_source_file_is_non_zero_exit() {
    let ctx = TestShell::new().await;
    let profile = ctx.path("broken.sh");
    std::fs::write(&profile, "return 3\n").unwrap();
    let options = ShellOptions {
        sources: vec![profile],
        ..Default::default()
    };
    let err = dockhand::Shell::new(ctx.backend.clone(), "local", options)
        .await
        .unwrap_err();
    assert!(matches!(err, DockhandError::NonZeroExit { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn options_environment_seeds_capture() {
    let ctx = TestShell::with_options(ShellOptions {
        environment: BTreeMap::from([("SEEDED".to_string(), "yes".to_string())]),
        ..Default::default()
    })
    .await;
    assert_eq!(ctx.shell.environ("SEEDED").await.unwrap(), Some("yes".to_string()));
}

#[tokio::test]
async fn with_environment_leaves_original_untouched() {
    let ctx = TestShell::new().await;
    let extended = ctx.shell.with_environment([("EXTRA", "1")]);

    assert_eq!(extended.environ("EXTRA").await.unwrap(), Some("1".to_string()));
    assert_eq!(ctx.shell.environ("EXTRA").await.unwrap(), None);
}

// ============================================================================
// ENVIRON TESTS
// ============================================================================

#[tokio::test]
async fn environ_returns_none_for_invalid_names() {
    let ctx = TestShell::new().await;
    assert_eq!(ctx.shell.environ("NOT A NAME").await.unwrap(), None);
    assert_eq!(ctx.shell.environ("$(reboot)").await.unwrap(), None);
    assert_eq!(ctx.shell.environ("").await.unwrap(), None);
}

#[tokio::test]
async fn environ_keeps_inner_newlines() {
    let ctx = TestShell::new().await;
    let shell = ctx.shell.with_environment([("MULTI", "a\nb\n")]);
    assert_eq!(shell.environ("MULTI").await.unwrap(), Some("a\nb\n".to_string()));
}

// ============================================================================
// EXECUTION TESTS
// ============================================================================

#[tokio::test]
async fn execute_reports_exit_code_and_streams() {
    let ctx = TestShell::new().await;
    let result = ctx
        .shell
        .execute("echo out; echo err >&2; exit 7")
        .await
        .unwrap();
    assert_eq!(result.exit_code, 7);
    assert_eq!(result.stdout, b"out\n");
    assert_eq!(result.stderr, b"err\n");
    assert!(!result.success());
}

#[tokio::test]
async fn args_are_quoted_not_interpreted() {
    let ctx = TestShell::new().await;
    let output = ctx
        .shell
        .check_output(ShellCommand::new("printf").args(["%s|", "$HOME", "a b", "say \"hi\"; exit 1"]).text())
        .await
        .unwrap();
    assert_eq!(output.as_text(), Some("$HOME|a b|say \"hi\"; exit 1|"));
}

#[tokio::test]
async fn per_command_env_and_cwd() {
    let ctx = TestShell::new().await;
    let output = ctx
        .shell
        .check_output(
            ShellCommand::raw("printf '%s:%s' \"$LOCAL_VAR\" \"$(pwd)\"")
                .env("LOCAL_VAR", "set")
                .cwd(ctx.scratch().to_string_lossy())
                .text(),
        )
        .await
        .unwrap();
    let expected_dir = ctx.scratch().canonicalize().unwrap();
    let text = output.into_text().unwrap();
    let (var, dir) = text.split_once(':').unwrap();
    assert_eq!(var, "set");
    assert_eq!(std::path::Path::new(dir).canonicalize().unwrap(), expected_dir);
}

#[tokio::test]
async fn check_output_strips_trailing_newlines_only_for_text() {
    let ctx = TestShell::new().await;
    let text = ctx
        .shell
        .check_output(ShellCommand::raw("printf 'line\\n\\n'").encoding(Encoding::Utf8))
        .await
        .unwrap();
    assert_eq!(text, Output::Text("line".to_string()));

    let bytes = ctx.shell.check_output("printf 'line\\n'").await.unwrap();
    assert_eq!(bytes, Output::Bytes(b"line\n".to_vec()));
}

#[tokio::test]
async fn check_output_fails_with_captured_output() {
    let ctx = TestShell::new().await;
    let err = ctx
        .shell
        .check_output("echo partial; echo oops >&2; exit 7")
        .await
        .unwrap_err();
    match err {
        DockhandError::NonZeroExit { code, ref stdout, ref stderr, .. } => {
            assert_eq!(code, 7);
            assert_eq!(stdout, b"partial\n");
            assert_eq!(stderr, b"oops\n");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn check_call_discards_output() {
    let ctx = TestShell::new().await;
    assert_eq!(ctx.shell.check_call("true").await.unwrap(), 0);

    let err = ctx.shell.check_call("echo noise; exit 2").await.unwrap_err();
    match err {
        DockhandError::NonZeroExit { code, stdout, stderr, .. } => {
            assert_eq!(code, 2);
            assert!(stdout.is_empty());
            assert!(stderr.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let ctx = TestShell::new().await;
    let err = ctx.shell.run(ShellCommand::from_args(Vec::<String>::new())).await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidInput(_)));
}

#[tokio::test]
async fn invalid_utf8_is_a_decode_error() {
    let ctx = TestShell::new().await;
    let err = ctx
        .shell
        .check_output(ShellCommand::raw("printf '\\377'").text())
        .await
        .unwrap_err();
    assert!(matches!(err, DockhandError::Decode { .. }), "unexpected error: {err}");

    let latin1 = ctx
        .shell
        .check_output(ShellCommand::raw("printf '\\351'").encoding(Encoding::Latin1))
        .await
        .unwrap();
    assert_eq!(latin1.as_text(), Some("é"));
}
