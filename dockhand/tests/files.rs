//! Integration tests for the filesystem bridge: queries, mutations and tar
//! based transfers.

use dockhand::archive::stream_bytes;
use dockhand::{AccessMode, DockhandError, MktempOptions, TransferDirection};
use futures::TryStreamExt;
use dockhand_test_utils::TestShell;
use tempfile::TempDir;

// ============================================================================
// CONTENT TESTS
// ============================================================================

#[tokio::test]
async fn write_then_read_is_byte_exact() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let path = ctx.path("blob.bin");
    let content: Vec<u8> = b"line one\r\nline two\n\0\xff\xfe trailing\n\n".to_vec();

    files.write(&path, &content).await.unwrap();
    assert_eq!(files.read(&path).await.unwrap(), content);
    assert_eq!(files.size(&path).await.unwrap(), content.len() as u64);
    assert_eq!(std::fs::read(&path).unwrap(), content);
}

#[tokio::test]
async fn write_replaces_existing_file_and_sets_mode() {
    use std::os::unix::fs::PermissionsExt;

    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let path = ctx.path("script.sh");

    files.write(&path, "old contents that are longer").await.unwrap();
    files.write_with_mode(&path, "#!/bin/sh\necho hi\n", 0o755).await.unwrap();

    assert_eq!(files.read_to_string(&path).await.unwrap(), "#!/bin/sh\necho hi\n");
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    assert!(files.access(&path, AccessMode::READ | AccessMode::EXECUTE).await.unwrap());
}

#[tokio::test]
async fn empty_file_round_trips() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let path = ctx.path("empty");
    files.write(&path, b"").await.unwrap();
    assert!(files.read(&path).await.unwrap().is_empty());
}

#[tokio::test]
async fn read_follows_symlinks() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    std::fs::write(ctx.path("target.txt"), "through the link").unwrap();
    std::os::unix::fs::symlink("target.txt", ctx.path("link.txt")).unwrap();

    assert!(files.islink(&ctx.path("link.txt")).await.unwrap());
    assert_eq!(
        files.read_to_string(&ctx.path("link.txt")).await.unwrap(),
        "through the link"
    );
}

#[tokio::test]
async fn read_missing_file_is_not_found() {
    let ctx = TestShell::new().await;
    let err = ctx
        .shell
        .filesystem()
        .read(&ctx.path("missing.txt"))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
async fn read_directory_is_invalid_input() {
    let ctx = TestShell::new().await;
    let err = ctx
        .shell
        .filesystem()
        .read(&ctx.scratch().to_string_lossy())
        .await
        .unwrap_err();
    assert!(matches!(err, DockhandError::InvalidInput(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn write_into_missing_directory_is_not_found() {
    let ctx = TestShell::new().await;
    let err = ctx
        .shell
        .filesystem()
        .write(&ctx.path("no/such/dir/file.txt"), "x")
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

// ============================================================================
// QUERY AND MUTATION TESTS
// ============================================================================

#[tokio::test]
async fn predicates_distinguish_files_and_directories() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    std::fs::write(ctx.path("plain"), "x").unwrap();

    assert!(files.exists(&ctx.path("plain")).await.unwrap());
    assert!(files.isfile(&ctx.path("plain")).await.unwrap());
    assert!(!files.isdir(&ctx.path("plain")).await.unwrap());
    assert!(files.isdir(&ctx.scratch().to_string_lossy()).await.unwrap());
    assert!(!files.exists(&ctx.path("nothing here")).await.unwrap());
    assert!(!files.access(&ctx.path("nothing here"), AccessMode::EXISTS).await.unwrap());
}

#[tokio::test]
async fn mkdir_listdir_and_rmtree() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let root = ctx.path("tree");

    files.mkdir(&root, false).await.unwrap();
    files.mkdir(&root, true).await.unwrap();
    let err = files.mkdir(&root, false).await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidInput(_)));

    files.makedirs(&ctx.path("tree/a/b c"), false).await.unwrap();
    files.write(&ctx.path("tree/.hidden"), "h").await.unwrap();
    files.write(&ctx.path("tree/a/b c/leaf.log"), "leaf").await.unwrap();

    assert_eq!(files.listdir(&root).await.unwrap(), vec![".hidden", "a"]);
    assert_eq!(
        files.find(&root, "*.log").await.unwrap(),
        vec![ctx.path("tree/a/b c/leaf.log")]
    );

    files.rmtree(&root).await.unwrap();
    assert!(!files.exists(&root).await.unwrap());
    assert!(files.rmtree(&root).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn rmdir_removes_only_empty_directories() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let empty = ctx.path("empty");
    let full = ctx.path("full");

    files.mkdir(&empty, false).await.unwrap();
    files.rmdir(&empty).await.unwrap();
    assert!(!files.exists(&empty).await.unwrap());
    assert!(files.rmdir(&empty).await.unwrap_err().is_not_found());

    files.mkdir(&full, false).await.unwrap();
    files.write(&ctx.path("full/keep.txt"), "keep").await.unwrap();
    let err = files.rmdir(&full).await.unwrap_err();
    assert!(matches!(err, DockhandError::NonZeroExit { .. }), "unexpected error: {err}");
    assert!(files.isdir(&full).await.unwrap());
    assert_eq!(files.read_to_string(&ctx.path("full/keep.txt")).await.unwrap(), "keep");
}

#[tokio::test]
async fn mkdir_without_parent_is_not_found() {
    let ctx = TestShell::new().await;
    let err = ctx
        .shell
        .filesystem()
        .mkdir(&ctx.path("missing/child"), false)
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
async fn listdir_missing_directory_is_not_found() {
    let ctx = TestShell::new().await;
    let err = ctx
        .shell
        .filesystem()
        .listdir(&ctx.path("absent"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn copy_rename_and_remove() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    files.write(&ctx.path("one"), "payload").await.unwrap();

    files.copy(&ctx.path("one"), &ctx.path("two")).await.unwrap();
    files.rename(&ctx.path("two"), &ctx.path("three")).await.unwrap();
    assert!(!files.exists(&ctx.path("two")).await.unwrap());
    assert_eq!(files.read_to_string(&ctx.path("three")).await.unwrap(), "payload");

    files.remove(&ctx.path("three")).await.unwrap();
    assert!(files.remove(&ctx.path("three")).await.unwrap_err().is_not_found());
    assert!(files.rename(&ctx.path("three"), &ctx.path("four")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn relative_paths_resolve_against_working_dir() {
    let ctx = TestShell::with_options(dockhand::ShellOptions::default()).await;
    let scratch = ctx.scratch().to_string_lossy().into_owned();
    let shell = dockhand::Shell::new(
        ctx.backend.clone(),
        "local",
        dockhand::ShellOptions {
            working_dir: scratch.clone(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let files = shell.filesystem();

    files.write("relative.txt", "rel").await.unwrap();
    assert_eq!(files.resolve("relative.txt"), format!("{}/relative.txt", scratch));
    assert_eq!(std::fs::read_to_string(ctx.path("relative.txt")).unwrap(), "rel");
}

// ============================================================================
// TEMPORARY PATH TESTS
// ============================================================================

#[tokio::test]
async fn mktemp_honors_prefix_suffix_and_dir() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let options = MktempOptions {
        prefix: "work-".to_string(),
        suffix: ".txt".to_string(),
        dir: Some(ctx.scratch().to_string_lossy().into_owned()),
        directory: false,
    };

    let path = files.mktemp(&options).await.unwrap();
    let name = path.rsplit('/').next().unwrap();
    assert!(path.starts_with(&*ctx.scratch().to_string_lossy()));
    assert!(name.starts_with("work-") && name.ends_with(".txt"), "{path}");
    assert!(files.isfile(&path).await.unwrap());

    let err = files
        .mktemp(&MktempOptions {
            prefix: "a/b".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DockhandError::InvalidInput(_)));
}

#[tokio::test]
async fn tempfile_is_removed_on_close() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let options = MktempOptions {
        dir: Some(ctx.scratch().to_string_lossy().into_owned()),
        ..MktempOptions::directory()
    };

    let temp = files.tempfile(&options).await.unwrap();
    let path = temp.path().to_string();
    assert!(temp.is_dir());
    files.write(&format!("{}/inner", path), "x").await.unwrap();

    temp.close().await.unwrap();
    assert!(!files.exists(&path).await.unwrap());
}

#[tokio::test]
async fn tempfile_keep_leaves_path() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let options = MktempOptions {
        dir: Some(ctx.scratch().to_string_lossy().into_owned()),
        ..Default::default()
    };
    let path = files.tempfile(&options).await.unwrap().keep();
    assert!(files.isfile(&path).await.unwrap());
}

// ============================================================================
// HOST TRANSFER TESTS
// ============================================================================

#[tokio::test]
async fn directory_round_trip_keeps_symlinks() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let host = TempDir::new().unwrap();

    let source = host.path().join("project");
    std::fs::create_dir_all(source.join("nested/deeper")).unwrap();
    std::fs::write(source.join("nested/deeper/data.txt"), "deep").unwrap();
    std::fs::write(source.join("top.txt"), "top").unwrap();
    std::os::unix::fs::symlink("deeper/data.txt", source.join("nested/alias")).unwrap();

    let container_copy = ctx.path("uploaded");
    let upload = files.copy_from_host(&source, &container_copy).await.unwrap();
    assert!(upload.is_dir);
    assert_eq!(upload.direction, TransferDirection::HostToContainer);
    assert!(files.islink(&format!("{}/nested/alias", container_copy)).await.unwrap());
    assert_eq!(
        files.read_to_string(&format!("{}/nested/alias", container_copy)).await.unwrap(),
        "deep"
    );

    let back = host.path().join("downloaded");
    let download = files.copy_to_host(&container_copy, &back).await.unwrap();
    assert!(download.is_dir);
    assert_eq!(download.host_path(), back);
    assert_eq!(
        std::fs::read_link(back.join("nested/alias")).unwrap(),
        std::path::PathBuf::from("deeper/data.txt")
    );
    assert_eq!(std::fs::read_to_string(back.join("top.txt")).unwrap(), "top");
    assert_eq!(std::fs::read_to_string(back.join("nested/deeper/data.txt")).unwrap(), "deep");
}

#[tokio::test]
async fn single_file_copy_to_host_renames() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let host = TempDir::new().unwrap();
    files.write(&ctx.path("report.csv"), "a,b\n").await.unwrap();

    let destination = host.path().join("renamed.csv");
    let descriptor = files.copy_to_host(&ctx.path("report.csv"), &destination).await.unwrap();
    assert!(!descriptor.is_dir);
    assert_eq!(std::fs::read_to_string(destination).unwrap(), "a,b\n");
}

#[tokio::test]
async fn put_keeps_the_host_name() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let host = TempDir::new().unwrap();
    let source = host.path().join("config.toml");
    std::fs::write(&source, "key = 1\n").unwrap();

    let descriptor = files.put(&source, &ctx.scratch().to_string_lossy()).await.unwrap();
    assert_eq!(descriptor.container_path(), ctx.path("config.toml"));
    assert_eq!(files.read_to_string(&ctx.path("config.toml")).await.unwrap(), "key = 1\n");

    let err = files.put(&source, &ctx.path("absent")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn put_archive_unpacks_every_entry() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let dest = ctx.path("unpacked");
    files.mkdir(&dest, false).await.unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    for (name, body) in [
        ("notes.txt", &b"first file\n"[..]),
        ("conf/app.toml", &b"port = 8080\n"[..]),
        ("conf/empty", &b""[..]),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body).unwrap();
    }
    let bytes = builder.into_inner().unwrap();

    files.put_archive(&dest, stream_bytes(bytes)).await.unwrap();

    assert_eq!(files.listdir(&dest).await.unwrap(), vec!["conf", "notes.txt"]);
    assert_eq!(
        files.read_to_string(&ctx.path("unpacked/conf/app.toml")).await.unwrap(),
        "port = 8080\n"
    );

    let downloaded: Vec<u8> = files
        .get_archive(&ctx.path("unpacked/conf"))
        .await
        .unwrap()
        .try_concat()
        .await
        .unwrap();
    let mut entries: Vec<(String, Vec<u8>)> = tar::Archive::new(downloaded.as_slice())
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
            let mut body = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut body).unwrap();
            (name, body)
        })
        .collect();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("conf".to_string(), Vec::new()),
            ("conf/app.toml".to_string(), b"port = 8080\n".to_vec()),
            ("conf/empty".to_string(), Vec::new()),
        ]
    );
}

#[tokio::test]
async fn put_archive_into_missing_directory_is_not_found() {
    let ctx = TestShell::new().await;
    let bytes = dockhand::archive::pack_file_bytes("a.txt", b"a", 0o644).unwrap();
    let err = ctx
        .shell
        .filesystem()
        .put_archive(&ctx.path("nowhere"), stream_bytes(bytes))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
async fn missing_sources_fail_by_direction() {
    let ctx = TestShell::new().await;
    let files = ctx.shell.filesystem();
    let host = TempDir::new().unwrap();

    let err = files
        .copy_to_host(&ctx.path("absent"), host.path().join("x"))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");

    let err = files
        .copy_from_host(host.path().join("absent"), &ctx.path("x"))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            DockhandError::ArchiveTransferFailed {
                direction: TransferDirection::HostToContainer,
                ..
            }
        ),
        "unexpected error: {err}"
    );
}
