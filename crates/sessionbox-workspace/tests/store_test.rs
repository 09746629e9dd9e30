// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git-backed project store tests.

mod common;

use common::{RemoteFixture, manager};
use sessionbox_workspace::{Error, GitProjectStore, ProjectStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_initialize_creates_then_reuses() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    let store = GitProjectStore::new(manager(&remote, root.path()), "main");

    let first = store.initialize_session_from_main(7, "abc").await.unwrap();
    std::fs::write(first.join("marker.txt"), "keep me").unwrap();

    let second = store.initialize_session_from_main(7, "abc").await.unwrap();

    assert_eq!(first, second);
    assert!(second.join("marker.txt").exists());
}

#[tokio::test]
async fn test_initialize_replaces_invalid_workspace() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    let mgr = manager(&remote, root.path());
    let store = GitProjectStore::new(mgr.clone(), "main");

    let broken = mgr.path_for(7, "abc");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("leftover.txt"), "x").unwrap();

    let path = store.initialize_session_from_main(7, "abc").await.unwrap();

    assert!(!path.join("leftover.txt").exists());
    assert!(path.join("README.md").exists());
    assert!(mgr.validate(7, "abc").await);
}

#[tokio::test]
async fn test_initialize_adopts_workspace_from_previous_process() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    GitProjectStore::new(manager(&remote, root.path()), "main")
        .initialize_session_from_main(7, "abc")
        .await
        .unwrap();

    let restarted = GitProjectStore::new(manager(&remote, root.path()), "main");
    restarted
        .initialize_session_from_main(7, "abc")
        .await
        .unwrap();

    assert!(restarted.manager().get(7, "abc").await.is_some());
}

#[tokio::test]
async fn test_write_read_and_list_files() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    let store = GitProjectStore::new(manager(&remote, root.path()), "main");
    store.initialize_session_from_main(7, "abc").await.unwrap();

    store
        .write_file(7, "abc", "src/components/Button.tsx", b"export {}")
        .await
        .unwrap();

    let contents = store
        .read_file(7, "abc", "src/components/Button.tsx")
        .await
        .unwrap();
    assert_eq!(contents, b"export {}");

    let files = store.list_files(7, "abc").await.unwrap();
    assert_eq!(
        files,
        vec!["README.md", "src/components/Button.tsx", "src/index.js"]
    );
}

#[tokio::test]
async fn test_file_access_rejects_escaping_paths() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    let store = GitProjectStore::new(manager(&remote, root.path()), "main");
    store.initialize_session_from_main(7, "abc").await.unwrap();

    let read = store.read_file(7, "abc", "../../etc/passwd").await;
    assert!(matches!(read, Err(Error::InvalidPath(_))));

    let write = store.write_file(7, "abc", ".git/config", b"x").await;
    assert!(matches!(write, Err(Error::InvalidPath(_))));
}

#[tokio::test]
async fn test_file_access_without_workspace() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    let store = GitProjectStore::new(manager(&remote, root.path()), "main");

    let result = store.list_files(7, "never-initialized").await;
    assert!(matches!(result, Err(Error::InvalidWorkspace(_))));
}

#[tokio::test]
async fn test_sync_from_remote_pulls_new_commits() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    let store = GitProjectStore::new(manager(&remote, root.path()), "main");
    store.initialize_session_from_main(7, "abc").await.unwrap();

    remote.push_commit("UPSTREAM.md", "from another session\n");

    store.sync_from_remote(7, "abc").await.unwrap();

    let contents = store.read_file(7, "abc", "UPSTREAM.md").await.unwrap();
    assert_eq!(contents, b"from another session\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_for_one_session() {
    let remote = RemoteFixture::new();
    let root = TempDir::new().unwrap();
    let store = GitProjectStore::new(manager(&remote, root.path()), "main");

    let (a, b) = tokio::join!(
        store.initialize_session_from_main(7, "abc"),
        store.initialize_session_from_main(7, "abc"),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert!(a.join("README.md").exists());
    assert!(store.manager().validate(7, "abc").await);
}
