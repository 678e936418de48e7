mod common;

use common::{file_names, Workspace};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_first_run_reports_every_file_added() {
    let ws = Workspace::new();
    ws.write("App.sln", "");
    ws.write("src/Core/Core.csproj", "<Project />");
    ws.write("src/Core/A.cs", "class A {}");
    ws.write("bin/Debug/A.dll.cs", "ignored");
    ws.write("README.md", "ignored");

    let manager = ws.open().await;
    let report = manager.initialize(&CancellationToken::new()).await.unwrap();

    assert!(!report.had_history);
    assert_eq!(
        file_names(&report.changes.added),
        vec!["A.cs", "App.sln", "Core.csproj"]
    );
    assert!(report.changes.modified.is_empty());
    assert!(report.changes.deleted.is_empty());
}

#[tokio::test]
async fn test_diff_classifies_modified_deleted_and_added() {
    let ws = Workspace::new();
    ws.write("A.cs", "class A {}");
    ws.write("B.cs", "class B {}");
    ws.write("C.cs", "class C {}");
    let cancel = CancellationToken::new();

    {
        let manager = ws.open().await;
        manager.initialize(&cancel).await.unwrap();
        manager.shutdown().await.unwrap();
    }

    ws.write("B.cs", "class B { int x; }");
    ws.delete("C.cs");
    ws.write("D.cs", "class D {}");

    let manager = ws.open().await;
    let changes = manager.pending_changes(&cancel).await.unwrap();

    assert_eq!(file_names(&changes.modified), vec!["B.cs"]);
    assert_eq!(file_names(&changes.deleted), vec!["C.cs"]);
    assert_eq!(file_names(&changes.added), vec!["D.cs"]);
}

#[tokio::test]
async fn test_unchanged_tree_produces_empty_diff() {
    let ws = Workspace::new();
    ws.write("A.cs", "class A {}");
    let cancel = CancellationToken::new();
    let manager = ws.open().await;

    manager.initialize(&cancel).await.unwrap();
    let report = manager.refresh(&cancel).await.unwrap();

    assert!(report.changes.is_empty());
    assert!(report.invalidated.is_empty());
}

#[tokio::test]
async fn test_dependency_change_invalidates_only_dependents_across_restart() {
    let ws = Workspace::new();
    ws.write("A.cs", "class A {}");
    ws.write("B.cs", "class B {}");
    let cancel = CancellationToken::new();

    {
        let manager = ws.open().await;
        manager.initialize(&cancel).await.unwrap();
        manager
            .set("analysis:A", &"a".to_string(), ["A.cs"], None)
            .await
            .unwrap();
        manager
            .set("analysis:B", &"b".to_string(), ["B.cs"], None)
            .await
            .unwrap();
        manager.save_snapshot(&cancel).await.unwrap();
        manager.shutdown().await.unwrap();
    }

    ws.write("B.cs", "class B { void Run() {} }");

    let manager = ws.open().await;
    let report = manager.initialize(&cancel).await.unwrap();

    assert!(report.had_history);
    assert_eq!(report.invalidated.exact, vec!["analysis:B".to_string()]);
    assert_eq!(manager.get::<String>("analysis:B").await, None);
    assert_eq!(manager.get::<String>("analysis:A").await.as_deref(), Some("a"));
    assert!(manager.dependencies_of("analysis:B").is_none());
    assert!(manager.dependencies_of("analysis:A").is_some());
}

#[tokio::test]
async fn test_deleted_dependency_invalidates_dependent() {
    let ws = Workspace::new();
    ws.write("A.cs", "class A {}");
    ws.write("C.cs", "class C {}");
    let cancel = CancellationToken::new();
    let manager = ws.open().await;

    manager.initialize(&cancel).await.unwrap();
    manager
        .set("analysis:C", &1u32, ["C.cs"], None)
        .await
        .unwrap();
    manager.save_snapshot(&cancel).await.unwrap();

    ws.delete("C.cs");
    let report = manager.refresh(&cancel).await.unwrap();

    assert_eq!(report.invalidated.exact, vec!["analysis:C".to_string()]);
    assert_eq!(manager.get::<u32>("analysis:C").await, None);
}

#[tokio::test]
async fn test_source_change_invalidates_reserved_token_keys() {
    let ws = Workspace::new();
    ws.write("src/A.cs", "class A {}");
    let cancel = CancellationToken::new();
    let manager = ws.open().await;

    manager.initialize(&cancel).await.unwrap();
    manager
        .set("CallGraph:Core", &vec![1u32], Vec::<&str>::new(), None)
        .await
        .unwrap();
    manager
        .set("metrics:Core", &vec![2u32], Vec::<&str>::new(), None)
        .await
        .unwrap();

    ws.write("src/A.cs", "class A { int y; }");
    let report = manager.refresh(&cancel).await.unwrap();

    assert_eq!(report.invalidated.heuristic, vec!["CallGraph:Core".to_string()]);
    assert_eq!(manager.get::<Vec<u32>>("CallGraph:Core").await, None);
    assert_eq!(manager.get::<Vec<u32>>("metrics:Core").await, Some(vec![2]));
}

#[tokio::test]
async fn test_project_change_invalidates_keys_depending_on_that_project() {
    let ws = Workspace::new();
    ws.write("src/Core/Core.csproj", "<Project />");
    ws.write("src/Core/Service.cs", "class Service {}");
    ws.write("src/Web/Web.csproj", "<Project />");
    ws.write("src/Web/Page.cs", "class Page {}");
    let cancel = CancellationToken::new();
    let manager = ws.open().await;

    manager.initialize(&cancel).await.unwrap();
    manager
        .set("metrics:Service", &1u32, ["src/Core/Service.cs"], None)
        .await
        .unwrap();
    manager
        .set("metrics:Page", &2u32, ["src/Web/Page.cs"], None)
        .await
        .unwrap();

    ws.write("src/Core/Core.csproj", "<Project Sdk=\"Microsoft.NET.Sdk\" />");
    let report = manager.refresh(&cancel).await.unwrap();

    assert!(report.invalidated.exact.is_empty());
    assert_eq!(report.invalidated.heuristic, vec!["metrics:Service".to_string()]);
    assert_eq!(manager.get::<u32>("metrics:Page").await, Some(2));
}

#[tokio::test]
async fn test_pending_changes_does_not_move_baseline() {
    let ws = Workspace::new();
    ws.write("A.cs", "class A {}");
    let cancel = CancellationToken::new();
    let manager = ws.open().await;
    manager.initialize(&cancel).await.unwrap();

    ws.write("A.cs", "class A { }");
    let first = manager.pending_changes(&cancel).await.unwrap();
    let second = manager.pending_changes(&cancel).await.unwrap();

    assert_eq!(first.modified.len(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cancelled_refresh_leaves_cache_untouched() {
    let ws = Workspace::new();
    ws.write("A.cs", "class A {}");
    let manager = ws.open().await;
    manager.initialize(&CancellationToken::new()).await.unwrap();
    manager
        .set("semantic:A", &1u32, ["A.cs"], None)
        .await
        .unwrap();

    ws.write("A.cs", "class A { int z; }");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = manager.refresh(&cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(manager.get::<u32>("semantic:A").await, Some(1));
}
