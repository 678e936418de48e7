mod common;

use clap::Parser;
use common::Workspace;
use solution_cache::cli::Cli;
use solution_cache::commands::resolve_config;
use solution_cache::config::RepositoryProfile;
use std::ffi::OsString;
use std::fs::{self, File, FileTimes};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

fn age(path: &Path, days: u64) {
    let when = SystemTime::now() - Duration::from_secs(days * 86_400);
    let file = File::options().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_accessed(when).set_modified(when))
        .unwrap();
}

#[tokio::test]
async fn test_storage_sweep_removes_idle_entries_and_records_marker() {
    let ws = Workspace::new();
    let manager = ws.open().await;

    manager
        .set("symbols:Old", &vec![1u32; 32], Vec::<&str>::new(), None)
        .await
        .unwrap();
    manager
        .set("symbols:Fresh", &vec![2u32; 32], Vec::<&str>::new(), None)
        .await
        .unwrap();
    let old_path = manager.store().durable().path_for("symbols:Old");
    age(&old_path, 40);

    assert!(manager.health().await.last_cleanup.is_none());
    let report = manager
        .cleanup_storage(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.deleted_count, 1);
    assert!(!old_path.exists());
    let health = manager.health().await;
    assert_eq!(health.durable_entries, 1);
    assert_eq!(
        health.durable_bytes,
        fs::metadata(manager.store().durable().path_for("symbols:Fresh"))
            .unwrap()
            .len()
    );
    assert_eq!(manager.store().durable().get::<Vec<u32>>("symbols:Old").await, None);
    assert_eq!(
        manager.store().durable().get::<Vec<u32>>("symbols:Fresh").await,
        Some(vec![2u32; 32])
    );
    assert!(manager.health().await.last_cleanup.is_some());
}

#[tokio::test]
async fn test_storage_sweep_keeps_index_and_snapshots() {
    let ws = Workspace::new();
    ws.write("A.cs", "class A {}");
    let cancel = CancellationToken::new();
    let manager = ws.open().await;
    manager.initialize(&cancel).await.unwrap();
    manager.shutdown().await.unwrap();

    let index = manager.entries_root().join(".index.json");
    assert!(index.exists());
    age(&index, 60);

    manager.cleanup_storage(&cancel).await.unwrap();

    assert!(index.exists());
    let changes = manager.pending_changes(&cancel).await.unwrap();
    assert!(changes.is_empty());
}

#[tokio::test]
async fn test_cancelled_sweep_deletes_nothing() {
    let ws = Workspace::new();
    let manager = ws.open().await;
    manager
        .set("k", &1u32, Vec::<&str>::new(), None)
        .await
        .unwrap();
    let path = manager.store().durable().path_for("k");
    age(&path, 40);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = manager.cleanup_storage(&cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(path.exists());
}

#[tokio::test]
async fn test_clear_removes_entries_and_dependencies() {
    let ws = Workspace::new();
    ws.write("A.cs", "");
    let manager = ws.open().await;
    manager.set("a", &1u32, ["A.cs"], None).await.unwrap();
    manager.set("b", &2u32, ["A.cs"], None).await.unwrap();

    assert_eq!(manager.clear().await.unwrap(), 2);
    assert_eq!(manager.get::<u32>("a").await, None);
    assert!(manager.dependencies_of("a").is_none());
    assert_eq!(manager.health().await.durable_entries, 0);
}

#[test]
fn test_auto_profile_counts_projects() {
    let ws = Workspace::new();
    for i in 0..30 {
        ws.write(&format!("src/P{i}/P{i}.csproj"), "<Project />");
    }
    // Build output never counts
    ws.write("src/P0/obj/Extra.csproj", "<Project />");

    let cache_root = ws.cache.path().join("custom");
    let args: Vec<OsString> = vec![
        "solution-cache".into(),
        "--profile".into(),
        "auto".into(),
        "--cache-root".into(),
        cache_root.clone().into(),
        "stats".into(),
        ws.solution.path().into(),
    ];
    let cli = Cli::parse_from(args);

    let config = resolve_config(&cli, ws.solution.path()).unwrap();
    let medium = RepositoryProfile::Medium.to_config();

    assert_eq!(config.cache_root, Some(cache_root));
    assert_eq!(config.volatile.capacity, medium.volatile.capacity);
    assert_eq!(config.quota.max_age_days, medium.quota.max_age_days);
}

#[test]
fn test_unknown_profile_is_rejected() {
    let ws = Workspace::new();
    let cli = Cli::parse_from(["solution-cache", "--profile", "huge", "stats", "."]);
    let err = resolve_config(&cli, ws.solution.path()).unwrap_err();
    assert!(err.to_string().contains("huge"));
}

#[test]
fn test_config_file_in_solution_root_is_used() {
    let ws = Workspace::new();
    fs::write(
        ws.solution.path().join(".solution-cache.toml"),
        "[volatile]\ncapacity = 7\n",
    )
    .unwrap();

    let cli = Cli::parse_from(["solution-cache", "stats", "."]);
    let config = resolve_config(&cli, ws.solution.path()).unwrap();
    assert_eq!(config.volatile.capacity, 7);
}
