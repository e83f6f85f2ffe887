//! In-memory implementations of the ports
//!
//! Used by headless sessions and by tests. [`MemoryFs`] can be told to fail
//! selected operations so error paths are reachable.

use crate::ports::{
    DirEntry, EditorSurface, FsChange, KillHandle, Process, ProcessHost, ResizeHandle,
    SnapshotStore, SpawnRequest, TerminalSize, TerminalSurface, VirtualFs,
};
use crate::{PlaygroundError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn is_below(path: &str, ancestor: &str) -> bool {
    ancestor.is_empty() || path == ancestor || path.starts_with(&format!("{}/", ancestor))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    File(Vec<u8>),
    Directory,
}

#[derive(Default)]
struct FsState {
    entries: BTreeMap<String, Entry>,
    writes: Vec<(String, String)>,
    failing_renames: Vec<String>,
    not_found_writes: usize,
}

/// Virtual filesystem held in a map of normalized paths
pub struct MemoryFs {
    state: Mutex<FsState>,
    changes: broadcast::Sender<FsChange>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(FsState::default()),
            changes,
        }
    }

    fn notify(&self, change: FsChange) {
        let _ = self.changes.send(change);
    }

    /// Files and their contents, keyed by path
    pub fn files(&self) -> BTreeMap<String, String> {
        lock(&self.state)
            .entries
            .iter()
            .filter_map(|(path, entry)| match entry {
                Entry::File(bytes) => Some((path.clone(), String::from_utf8_lossy(bytes).into())),
                Entry::Directory => None,
            })
            .collect()
    }

    pub fn directories(&self) -> Vec<String> {
        lock(&self.state)
            .entries
            .iter()
            .filter(|(_, entry)| **entry == Entry::Directory)
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn exists(&self, path: &str) -> bool {
        lock(&self.state).entries.contains_key(&normalize(path))
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files().remove(&normalize(path))
    }

    /// Every successful `write_file` in order, as `(path, content)`
    pub fn writes(&self) -> Vec<(String, String)> {
        lock(&self.state).writes.clone()
    }

    pub fn writes_to(&self, path: &str) -> Vec<String> {
        let path = normalize(path);
        self.writes()
            .into_iter()
            .filter(|(p, _)| *p == path)
            .map(|(_, content)| content)
            .collect()
    }

    /// Make the next rename fail with a sandbox error carrying `message`
    pub fn fail_next_rename(&self, message: impl Into<String>) {
        lock(&self.state).failing_renames.push(message.into());
    }

    /// Make the next `count` writes fail with `NotFound`
    pub fn fail_writes_with_not_found(&self, count: usize) {
        lock(&self.state).not_found_writes = count;
    }

    fn require_directory(state: &FsState, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        match state.entries.get(path) {
            Some(Entry::Directory) => Ok(()),
            _ => Err(PlaygroundError::NotFound(path.to_string())),
        }
    }
}

#[async_trait]
impl VirtualFs for MemoryFs {
    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        {
            let mut state = lock(&self.state);
            if path.is_empty() || state.entries.contains_key(&path) {
                return Err(PlaygroundError::AlreadyExists(path));
            }
            Self::require_directory(&state, parent_of(&path))?;
            state.entries.insert(path.clone(), Entry::Directory);
        }
        self.notify(FsChange::Created(path));
        Ok(())
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = normalize(path);
        let existed = {
            let mut state = lock(&self.state);
            if state.not_found_writes > 0 {
                state.not_found_writes -= 1;
                return Err(PlaygroundError::NotFound(path));
            }
            Self::require_directory(&state, parent_of(&path))?;
            if state.entries.get(&path) == Some(&Entry::Directory) {
                return Err(PlaygroundError::Sandbox(format!("{} is a directory", path)));
            }
            let existed = state
                .entries
                .insert(path.clone(), Entry::File(content.to_vec()))
                .is_some();
            state
                .writes
                .push((path.clone(), String::from_utf8_lossy(content).into()));
            existed
        };
        self.notify(if existed {
            FsChange::Modified(path)
        } else {
            FsChange::Created(path)
        });
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path);
        match lock(&self.state).entries.get(&path) {
            Some(Entry::File(bytes)) => Ok(bytes.clone()),
            _ => Err(PlaygroundError::NotFound(path)),
        }
    }

    async fn read_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize(path);
        let state = lock(&self.state);
        Self::require_directory(&state, &path)?;
        Ok(state
            .entries
            .iter()
            .filter(|(p, _)| !p.is_empty() && parent_of(p) == path && **p != path)
            .map(|(p, entry)| DirEntry {
                name: p.rsplit('/').next().unwrap_or(p).to_string(),
                is_directory: *entry == Entry::Directory,
            })
            .collect())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (normalize(from), normalize(to));
        {
            let mut state = lock(&self.state);
            if let Some(message) = state.failing_renames.pop() {
                return Err(PlaygroundError::Sandbox(message));
            }
            if !state.entries.contains_key(&from) {
                return Err(PlaygroundError::NotFound(from));
            }
            if state.entries.contains_key(&to) {
                return Err(PlaygroundError::AlreadyExists(to));
            }
            Self::require_directory(&state, parent_of(&to))?;

            let moved: Vec<String> = state
                .entries
                .keys()
                .filter(|p| is_below(p, &from))
                .cloned()
                .collect();
            for old in moved {
                if let Some(entry) = state.entries.remove(&old) {
                    let new = format!("{}{}", to, &old[from.len()..]);
                    state.entries.insert(new, entry);
                }
            }
        }
        self.notify(FsChange::Removed(from));
        self.notify(FsChange::Created(to));
        Ok(())
    }

    async fn remove(&self, path: &str, recursive: bool) -> Result<()> {
        let path = normalize(path);
        {
            let mut state = lock(&self.state);
            if !state.entries.contains_key(&path) {
                return Err(PlaygroundError::NotFound(path));
            }
            let doomed: Vec<String> = state
                .entries
                .keys()
                .filter(|p| is_below(p, &path))
                .cloned()
                .collect();
            if doomed.len() > 1 && !recursive {
                return Err(PlaygroundError::Sandbox(format!("{} is not empty", path)));
            }
            for p in doomed {
                state.entries.remove(&p);
            }
        }
        self.notify(FsChange::Removed(path));
        Ok(())
    }

    fn watch(&self, path: &str) -> Result<BoxStream<'static, FsChange>> {
        let root = normalize(path);
        let rx = self.changes.subscribe();
        Ok(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(change) => return Some((change, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Watcher lagged, {} changes skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |change| std::future::ready(is_below(change.path(), &root)))
        .boxed())
    }
}

fn watch_stream<T>(mut rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    let first = rx.borrow_and_update().clone();
    let rest = stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let value = rx.borrow_and_update().clone();
        Some((value, rx))
    });
    stream::once(async move { first }).chain(rest).boxed()
}

/// A model handed to [`MemoryEditor::load_model`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModel {
    pub path: String,
    pub language: String,
    pub content: String,
}

/// Headless editor surface
pub struct MemoryEditor {
    buffer: watch::Sender<String>,
    loads: Mutex<Vec<LoadedModel>>,
}

impl Default for MemoryEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEditor {
    pub fn new() -> Self {
        let (buffer, _) = watch::channel(String::new());
        Self {
            buffer,
            loads: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the user typing at the end of the buffer
    pub fn type_text(&self, text: &str) {
        self.buffer.send_modify(|buffer| buffer.push_str(text));
    }

    pub fn loads(&self) -> Vec<LoadedModel> {
        lock(&self.loads).clone()
    }

    pub fn active_model(&self) -> Option<LoadedModel> {
        lock(&self.loads).last().cloned()
    }
}

#[async_trait]
impl EditorSurface for MemoryEditor {
    async fn load_model(&self, path: &str, language: &str, content: &str) -> Result<()> {
        lock(&self.loads).push(LoadedModel {
            path: path.to_string(),
            language: language.to_string(),
            content: content.to_string(),
        });
        self.buffer.send_replace(content.to_string());
        Ok(())
    }

    fn content(&self) -> BoxStream<'static, String> {
        watch_stream(self.buffer.subscribe())
    }

    fn value(&self) -> String {
        self.buffer.borrow().clone()
    }

    fn set_value(&self, value: &str) {
        self.buffer.send_replace(value.to_string());
    }
}

/// Headless terminal surface that records output and replays queued input
pub struct MemoryTerminal {
    output: Mutex<Vec<u8>>,
    input_tx: mpsc::UnboundedSender<Bytes>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    fits: Mutex<Vec<TerminalSize>>,
}

impl Default for MemoryTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTerminal {
    pub fn new() -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            output: Mutex::new(Vec::new()),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            fits: Mutex::new(Vec::new()),
        }
    }

    /// Queue bytes as if typed by the user
    pub fn send_input(&self, data: &str) {
        let _ = self.input_tx.send(Bytes::from(data.to_string()));
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&lock(&self.output)).into()
    }

    pub fn fit_count(&self) -> usize {
        lock(&self.fits).len()
    }

    /// Size passed to the latest fit
    pub fn last_fit(&self) -> Option<TerminalSize> {
        lock(&self.fits).last().copied()
    }
}

#[async_trait]
impl TerminalSurface for MemoryTerminal {
    async fn write(&self, data: &[u8]) -> Result<()> {
        lock(&self.output).extend_from_slice(data);
        Ok(())
    }

    fn input(&self) -> BoxStream<'static, Bytes> {
        match lock(&self.input_rx).take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|data| (data, rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }

    async fn fit(&self, size: TerminalSize) -> Result<()> {
        lock(&self.fits).push(size);
        Ok(())
    }
}

/// Process host whose shells echo their input and whose scripts succeed
/// after a configurable delay
pub struct MemoryProcessHost {
    spawned: Mutex<Vec<SpawnRequest>>,
    inputs: Arc<Mutex<Vec<String>>>,
    resizes: Arc<Mutex<Vec<TerminalSize>>>,
    script_delay: Duration,
    script_exit_code: i32,
    next_pid: AtomicU32,
}

impl Default for MemoryProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProcessHost {
    pub fn new() -> Self {
        Self {
            spawned: Mutex::new(Vec::new()),
            inputs: Arc::new(Mutex::new(Vec::new())),
            resizes: Arc::new(Mutex::new(Vec::new())),
            script_delay: Duration::ZERO,
            script_exit_code: 0,
            next_pid: AtomicU32::new(100),
        }
    }

    pub fn with_script_delay(mut self, delay: Duration) -> Self {
        self.script_delay = delay;
        self
    }

    pub fn with_script_exit_code(mut self, code: i32) -> Self {
        self.script_exit_code = code;
        self
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        lock(&self.spawned).clone()
    }

    /// Everything written to interactive shells, in arrival order
    pub fn inputs(&self) -> Vec<String> {
        lock(&self.inputs).clone()
    }

    /// Window sizes requested for interactive shells, in arrival order
    pub fn resizes(&self) -> Vec<TerminalSize> {
        lock(&self.resizes).clone()
    }
}

#[async_trait]
impl ProcessHost for MemoryProcessHost {
    async fn spawn(&self, request: SpawnRequest) -> Result<Process> {
        lock(&self.spawned).push(request.clone());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(100);
        let (output_tx, output_rx) = mpsc::unbounded_channel::<Bytes>();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (resize_tx, mut resize_rx) = mpsc::channel::<TerminalSize>(16);

        let script = match request.args.as_slice() {
            [flag, script] if flag == "-c" => Some(script.clone()),
            _ => None,
        };

        if let Some(script) = script {
            let delay = self.script_delay;
            let code = self.script_exit_code;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let _ = output_tx.send(Bytes::from(format!("ran: {}\n", script)));
                        let _ = exit_tx.send(code);
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = exit_tx.send(137);
                    }
                }
            });
        } else {
            let inputs = self.inputs.clone();
            let resizes = self.resizes.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(size) = resize_rx.recv() => lock(&resizes).push(size),
                        data = input_rx.recv() => match data {
                            Some(data) => {
                                lock(&inputs).push(String::from_utf8_lossy(&data).into());
                                let _ = output_tx.send(data);
                            }
                            None => {
                                let _ = exit_tx.send(0);
                                break;
                            }
                        },
                        _ = shutdown_rx.recv() => {
                            let _ = exit_tx.send(137);
                            break;
                        }
                    }
                }
            });
        }

        let output = stream::unfold(output_rx, |mut rx| async move {
            rx.recv().await.map(|data| (data, rx))
        })
        .boxed();

        Ok(Process {
            pid: Some(pid),
            input: input_tx,
            output,
            exit: exit_rx,
            kill: KillHandle::new(shutdown_tx),
            resize: ResizeHandle::new(resize_tx),
        })
    }
}

/// Snapshot store backed by a map
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, String>>,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, key: &str, encoded: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), encoded.to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fs_requires_parents() {
        let fs = MemoryFs::new();
        assert!(fs.write_file("app/a.ts", b"x").await.unwrap_err().is_not_found());
        fs.mkdir("app").await.unwrap();
        assert!(fs.mkdir("app").await.unwrap_err().is_already_exists());
        fs.write_file("app/a.ts", b"x").await.unwrap();
        assert_eq!(fs.content("app/a.ts").as_deref(), Some("x"));

        let listing = fs.read_directory("app").await.unwrap();
        assert_eq!(
            listing,
            vec![DirEntry {
                name: "a.ts".into(),
                is_directory: false
            }]
        );
    }

    #[tokio::test]
    async fn test_memory_fs_rename_moves_subtree() {
        let fs = MemoryFs::new();
        fs.mkdir("app").await.unwrap();
        fs.mkdir("app/src").await.unwrap();
        fs.write_file("app/src/main.ts", b"1").await.unwrap();

        fs.rename("app/src", "app/lib").await.unwrap();
        assert!(!fs.exists("app/src/main.ts"));
        assert_eq!(fs.content("app/lib/main.ts").as_deref(), Some("1"));

        assert!(fs.remove("app/lib", false).await.is_err());
        fs.remove("app/lib", true).await.unwrap();
        assert_eq!(fs.directories(), vec!["app".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_fs_watch_filters_by_path() {
        let fs = MemoryFs::new();
        let mut changes = fs.watch("app").unwrap();
        fs.mkdir("other").await.unwrap();
        fs.mkdir("app").await.unwrap();
        assert_eq!(changes.next().await, Some(FsChange::Created("app".into())));
    }

    #[tokio::test]
    async fn test_memory_editor_stream_starts_with_buffer() {
        let editor = MemoryEditor::new();
        editor.load_model("a.ts", "typescript", "abc").await.unwrap();
        let mut content = editor.content();
        assert_eq!(content.next().await.as_deref(), Some("abc"));
        editor.type_text("d");
        assert_eq!(content.next().await.as_deref(), Some("abcd"));
    }
}
