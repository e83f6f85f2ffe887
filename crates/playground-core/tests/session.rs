//! End-to-end behaviour of a booted playground against in-memory collaborators

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use playground_core::memory::{
    MemoryEditor, MemoryFs, MemoryProcessHost, MemorySnapshotStore, MemoryTerminal,
};
use playground_core::ports::SnapshotStore;
use playground_core::{
    autosave, codec, Collaborators, Directory, File, NodeKind, Playground, PlaygroundConfig,
    PlaygroundError, PrepareStatus, SandboxGate, ShellSpec, ValidationError, Workspace,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    fs: Arc<MemoryFs>,
    editor: Arc<MemoryEditor>,
    host: Arc<MemoryProcessHost>,
    snapshots: Arc<MemorySnapshotStore>,
    playground: Playground,
}

fn scaffold() -> Workspace {
    Workspace::new(
        "app",
        vec![Directory::new(
            "src",
            vec![File::new("main.ts", "console.log(1);")
                .with_solution("console.log(42);")
                .into()],
        )
        .into()],
    )
    .with_initial_file_path("src/main.ts")
    .with_prepare_command("npm install")
    .with_shells(vec![ShellSpec::new().with_command("npm start")])
}

async fn boot(gate: &SandboxGate) -> Harness {
    boot_with(gate, PlaygroundConfig::default()).await
}

async fn boot_with(gate: &SandboxGate, config: PlaygroundConfig) -> Harness {
    let fs = Arc::new(MemoryFs::new());
    let editor = Arc::new(MemoryEditor::new());
    let host = Arc::new(MemoryProcessHost::new().with_script_delay(Duration::from_secs(3)));
    let snapshots = Arc::new(MemorySnapshotStore::new());

    let playground = Playground::boot(
        config,
        gate,
        scaffold(),
        Collaborators {
            fs: fs.clone(),
            processes: host.clone(),
            editor: editor.clone(),
            snapshots: Some(snapshots.clone()),
            prepare_output: None,
        },
    )
    .await
    .unwrap();

    Harness {
        fs,
        editor,
        host,
        snapshots,
        playground,
    }
}

#[tokio::test(start_paused = true)]
async fn test_boot_mounts_and_opens_initial_file() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;

    assert_eq!(h.fs.content("app/src/main.ts").as_deref(), Some("console.log(1);"));
    let model = h.editor.active_model().unwrap();
    assert_eq!(model.path, "app/src/main.ts");
    assert_eq!(model.language, "typescript");
    assert!(!gate.is_available());

    h.playground.shutdown().await;
    assert!(gate.is_available());
}

#[tokio::test(start_paused = true)]
async fn test_second_session_times_out_on_sandbox() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;

    let mut config = PlaygroundConfig::default();
    config.sandbox.acquire_timeout_ms = 50;
    let result = Playground::boot(
        config,
        &gate,
        scaffold(),
        Collaborators {
            fs: Arc::new(MemoryFs::new()),
            processes: Arc::new(MemoryProcessHost::new()),
            editor: Arc::new(MemoryEditor::new()),
            snapshots: None,
            prepare_output: None,
        },
    )
    .await;
    assert!(matches!(result, Err(PlaygroundError::Timeout(_))));
    h.playground.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_create_then_edit_new_file() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;
    let src = h.playground.workspace().get().tree()[0].id();

    let err = h
        .playground
        .create(Some(src), "util", NodeKind::File)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlaygroundError::Validation(ValidationError::MissingExtension(_))
    ));

    let util = h
        .playground
        .create(Some(src), "util.ts", NodeKind::File)
        .await
        .unwrap();
    let workspace = h.playground.workspace().get();
    assert_eq!(workspace.path_to(&util), Some("src/util.ts"));
    assert_eq!(h.fs.content("app/src/util.ts").as_deref(), Some(""));

    h.playground.select(util.id()).await.unwrap();
    h.editor.type_text("x");
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.editor.type_text("y");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let writes = h.fs.writes_to("app/src/util.ts");
    assert_eq!(writes, vec!["".to_string(), "xy".to_string()]);
    h.playground.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_pending_edit() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;

    h.editor.type_text(" // wip");
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.playground.shutdown().await;

    assert_eq!(
        h.fs.content("app/src/main.ts").as_deref(),
        Some("console.log(1); // wip")
    );
}

#[tokio::test(start_paused = true)]
async fn test_rename_directory_keeps_editing_same_file() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;
    let src = h.playground.workspace().get().tree()[0].id();

    h.fs.fail_next_rename("busy");
    assert!(h.playground.rename(src, "lib").await.is_err());
    assert!(h.playground.workspace().get().find_file("src/main.ts").is_some());

    h.playground.rename(src, "lib").await.unwrap();
    h.editor.type_text("!");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(
        h.fs.content("app/lib/main.ts").as_deref(),
        Some("console.log(1);!")
    );
    h.playground.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_selected_file_deselects() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;
    let src = h.playground.workspace().get().tree()[0].id();

    h.playground.remove(src).await.unwrap();
    assert_eq!(h.playground.editor().selected().get(), None);
    assert!(h.playground.workspace().get().tree().is_empty());
    assert!(!h.fs.exists("app/src"));
    h.playground.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_terminal_command_runs_after_prepare() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;
    let spec = h.playground.workspace().get().shells()[0].clone();
    let surface = Arc::new(MemoryTerminal::new());

    let handle = h.playground.open_terminal(&spec, surface).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.host.inputs().is_empty());

    assert_eq!(h.playground.prepared().await, PrepareStatus::Finished(0));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.host.inputs(), vec!["npm start\n".to_string()]);

    handle.close().await.unwrap();
    h.playground.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_trace_stream_builds_forest() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;

    let lines = [
        r#"{"type":"span","traceId":"t","spanId":"a","name":"main","startTime":0}"#,
        r#"{"type":"span","traceId":"t","spanId":"b","name":"fetch","startTime":1,"parent":{"type":"span","traceId":"t","spanId":"a","name":"main","startTime":0}}"#,
        r#"{"type":"span_event","traceId":"t","spanId":"b","name":"retry","startTime":2}"#,
        "plain log line",
        r#"{"type":"span","traceId":"t","spanId":"c","name":"parse","startTime":3,"parent":{"type":"external","traceId":"t","spanId":"b"}}"#,
    ];
    let output = stream::iter(lines.map(|l| Bytes::from(format!("{}\n", l)))).boxed();
    let mut updates = h.playground.trace().subscribe();
    h.playground.attach_trace(output);

    while updates.get().len() < 3 {
        updates.changed().await.unwrap();
    }
    let forest = h.playground.trace().get();
    assert_eq!(forest.roots().len(), 1);
    let b = &forest.roots()[0].children[0];
    assert_eq!(b.events.len(), 1);
    assert_eq!(b.children[0].span_id, "c");
    h.playground.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_autosave_and_share_round_trip() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;

    h.editor.type_text(" // saved");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.snapshots.load("app").await.unwrap().is_some());

    let code = h.playground.share_code().await.unwrap();
    let shared = codec::decode(&code).unwrap();
    assert_eq!(
        shared.find_file("src/main.ts").unwrap().initial_content(),
        "console.log(1); // saved"
    );

    h.playground.shutdown().await;
    let restored = autosave::restore(h.snapshots.as_ref(), "app", scaffold).await;
    assert_eq!(restored, shared);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_session_flushes_before_releasing_sandbox() {
    let gate = SandboxGate::new();
    let h = boot(&gate).await;

    h.editor.type_text("A");
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(h.playground);
    while !gate.is_available() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.fs.content("app/src/main.ts").as_deref(),
        Some("console.log(1);A")
    );

    // The sandbox may belong to someone else now
    h.editor.type_text("B");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        h.fs.writes_to("app/src/main.ts"),
        vec!["console.log(1);".to_string(), "console.log(1);A".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_new_file_uses_configured_language() {
    let gate = SandboxGate::new();
    let mut config = PlaygroundConfig::default();
    config.default_language = "javascript".to_string();
    let h = boot_with(&gate, config).await;

    let node = h
        .playground
        .create(None, "extra.ts", NodeKind::File)
        .await
        .unwrap();
    h.playground.select(node.id()).await.unwrap();
    assert_eq!(h.editor.active_model().unwrap().language, "javascript");
    h.playground.shutdown().await;
}

fn idle_after_one_second() -> PlaygroundConfig {
    let mut config = PlaygroundConfig::default();
    config.store.idle_ttl_ms = 1000;
    config
}

#[tokio::test(start_paused = true)]
async fn test_idle_trace_cell_stops_collectors() {
    let gate = SandboxGate::new();
    let h = boot_with(&gate, idle_after_one_second()).await;

    let (tx, mut rx) = mpsc::channel::<Bytes>(8);
    let output = stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed();
    let watching = h.playground.trace().subscribe();
    h.playground.attach_trace(output);
    tx.send(Bytes::from_static(b"not a span\n")).await.unwrap();

    drop(watching);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(tx.is_closed());

    // Attaching again after the idle period starts a fresh collector
    let (tx, mut rx) = mpsc::channel::<Bytes>(8);
    let output = stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed();
    h.playground.attach_trace(output);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!tx.is_closed());
    h.playground.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_terminal_list_kills_open_shells() {
    let gate = SandboxGate::new();
    let h = boot_with(&gate, idle_after_one_second()).await;
    let terminals = h.playground.terminals().terminals().clone();

    let mut handle = h
        .playground
        .open_terminal(&ShellSpec::new(), Arc::new(MemoryTerminal::new()))
        .await
        .unwrap();
    let watching = terminals.subscribe();
    assert_eq!(watching.get().len(), 1);

    drop(watching);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.wait().await.unwrap(), 137);
    assert!(terminals.get().is_empty());
    h.playground.shutdown().await;
}
