//! Terminal and process supervision
//!
//! Every terminal surface gets its own shell inside the sandbox. Output and
//! input are pumped by tasks owned by the [`TerminalHandle`]; closing the
//! handle kills the shell and joins the pumps. Shells still open when the
//! terminal list goes idle are killed.

use crate::debounce::{sleep_until_deadline, Debouncer};
use crate::ports::{KillHandle, Process, ProcessHost, SpawnRequest, TerminalSurface};
pub use crate::ports::TerminalSize;
use crate::store::Cell;
use crate::{PlaygroundError, Result};
use bytes::Bytes;
use futures::StreamExt;
use playground_types::ShellSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Progress of the workspace prepare command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum PrepareStatus {
    Pending,
    Running,
    Finished(i32),
    Failed(String),
    Skipped,
}

impl PrepareStatus {
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            PrepareStatus::Finished(_) | PrepareStatus::Failed(_) | PrepareStatus::Skipped
        )
    }
}

/// Run the workspace prepare command once, publishing its progress.
///
/// Output is echoed to `echo` when given. A missing command is reported as
/// [`PrepareStatus::Skipped`].
pub async fn run_prepare(
    processes: &dyn ProcessHost,
    shell: &str,
    cwd: &str,
    command: Option<&str>,
    status: &watch::Sender<PrepareStatus>,
    echo: Option<Arc<dyn TerminalSurface>>,
) -> Result<Option<i32>> {
    let Some(command) = command else {
        status.send_replace(PrepareStatus::Skipped);
        return Ok(None);
    };

    status.send_replace(PrepareStatus::Running);
    info!("Running prepare command: {}", command);
    let Process {
        mut output, exit, ..
    } = match processes
        .spawn(SpawnRequest::script(shell, command).cwd(cwd))
        .await
    {
        Ok(process) => process,
        Err(e) => {
            status.send_replace(PrepareStatus::Failed(e.to_string()));
            return Err(e);
        }
    };

    while let Some(chunk) = output.next().await {
        if let Some(surface) = &echo {
            if let Err(e) = surface.write(&chunk).await {
                warn!("Failed to echo prepare output: {}", e);
            }
        }
    }

    match Process::wait(exit).await {
        Ok(code) => {
            if code == 0 {
                info!("Prepare command finished");
            } else {
                warn!("Prepare command exited with code {}", code);
            }
            status.send_replace(PrepareStatus::Finished(code));
            Ok(Some(code))
        }
        Err(e) => {
            status.send_replace(PrepareStatus::Failed(e.to_string()));
            Err(e)
        }
    }
}

/// Summary of an open terminal, published through the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalInfo {
    pub id: Uuid,
    pub label: String,
    pub pid: Option<u32>,
}

/// Shells that have not been closed yet, by terminal id
type ShellMap = HashMap<Uuid, (KillHandle, CancellationToken)>;
type LiveShells = Arc<Mutex<ShellMap>>;

fn lock_live(live: &LiveShells) -> MutexGuard<'_, ShellMap> {
    live.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct TerminalSupervisor {
    processes: Arc<dyn ProcessHost>,
    shell: String,
    cwd: String,
    prepare: watch::Receiver<PrepareStatus>,
    size: Cell<TerminalSize>,
    terminals: Cell<Vec<TerminalInfo>>,
    resize_debounce: Duration,
    live: LiveShells,
    release_armed: Arc<AtomicBool>,
}

impl TerminalSupervisor {
    pub fn new(
        processes: Arc<dyn ProcessHost>,
        shell: impl Into<String>,
        cwd: impl Into<String>,
        prepare: watch::Receiver<PrepareStatus>,
        size: Cell<TerminalSize>,
        terminals: Cell<Vec<TerminalInfo>>,
        resize_debounce: Duration,
    ) -> Self {
        Self {
            processes,
            shell: shell.into(),
            cwd: cwd.into(),
            prepare,
            size,
            terminals,
            resize_debounce,
            live: Arc::new(Mutex::new(HashMap::new())),
            release_armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of shells opened and not yet closed or released
    pub fn live_count(&self) -> usize {
        lock_live(&self.live).len()
    }

    /// Kill every open shell once nobody watches the terminal list
    fn arm_idle_release(&self) {
        if self.release_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let live = self.live.clone();
        let armed = self.release_armed.clone();
        let terminals = self.terminals.downgrade();
        self.terminals.on_idle(move || {
            armed.store(false, Ordering::SeqCst);
            let released: Vec<_> = lock_live(&live).drain().collect();
            if released.is_empty() {
                return;
            }
            info!("Terminal list idle, killing {} shells", released.len());
            for (id, (kill, cancel)) in released {
                debug!("Releasing terminal {}", id);
                kill.kill_now();
                cancel.cancel();
            }
            if let Some(terminals) = terminals.upgrade() {
                terminals.set(Vec::new());
            }
        });
    }

    pub fn terminals(&self) -> &Cell<Vec<TerminalInfo>> {
        &self.terminals
    }

    /// Spawn a shell for `spec` and wire it to `surface`
    pub async fn open(
        &self,
        spec: &ShellSpec,
        surface: Arc<dyn TerminalSurface>,
    ) -> Result<TerminalHandle> {
        let process = self
            .processes
            .spawn(SpawnRequest::new(&self.shell).cwd(&self.cwd))
            .await?;
        let info = TerminalInfo {
            id: Uuid::new_v4(),
            label: spec.display_label().to_string(),
            pid: process.pid,
        };
        info!("Opened terminal '{}' ({})", info.label, info.id);

        let Process {
            pid: _,
            input,
            output,
            exit,
            kill,
            resize,
        } = process;
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let sizes = self.size.subscribe();
        let initial = sizes.get();
        if !resize.resize(initial).await {
            debug!("Shell for {} exited before it was sized", info.id);
        }
        if let Err(e) = surface.fit(initial).await {
            warn!("Terminal fit failed: {}", e);
        }

        // Process output -> surface
        tasks.push(tokio::spawn({
            let surface = surface.clone();
            let cancel = cancel.clone();
            let mut output = output;
            async move {
                loop {
                    let chunk = tokio::select! {
                        _ = cancel.cancelled() => break,
                        chunk = output.next() => chunk,
                    };
                    let Some(chunk) = chunk else { break };
                    if let Err(e) = surface.write(&chunk).await {
                        warn!("Terminal write failed: {}", e);
                    }
                }
            }
        }));

        // Surface input -> process
        tasks.push(tokio::spawn({
            let mut typed = surface.input();
            let input = input.clone();
            let cancel = cancel.clone();
            async move {
                loop {
                    let data = tokio::select! {
                        _ = cancel.cancelled() => break,
                        data = typed.next() => data,
                    };
                    let Some(data) = data else { break };
                    if input.send(data).await.is_err() {
                        debug!("Shell stdin closed");
                        break;
                    }
                }
            }
        }));

        // Startup command, once the prepare command is through
        if let Some(command) = spec.command.clone() {
            let mut prepare = self.prepare.clone();
            let input = input.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let ready = tokio::select! {
                    _ = cancel.cancelled() => return,
                    ready = prepare.wait_for(PrepareStatus::is_done) => ready.map(|s| s.clone()),
                };
                match ready {
                    Ok(status) => {
                        debug!("Prepare {:?}, starting '{}'", status, command);
                        let line = Bytes::from(format!("{}\n", command));
                        if input.send(line).await.is_err() {
                            warn!("Shell exited before '{}' could start", command);
                        }
                    }
                    Err(_) => warn!("Prepare status lost, not running '{}'", command),
                }
            }));
        }

        // Debounced resize -> process window size and fit
        tasks.push(tokio::spawn({
            let mut sizes = sizes;
            let window = self.resize_debounce;
            let cancel = cancel.clone();
            async move {
                let mut debouncer = Debouncer::new(window);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        size = sizes.changed() => match size {
                            Ok(size) => debouncer.push(size),
                            Err(_) => break,
                        },
                        _ = sleep_until_deadline(debouncer.deadline()) => {
                            if let Some(size) = debouncer.take() {
                                debug!("Resizing terminal to {}x{}", size.cols, size.rows);
                                if !resize.resize(size).await {
                                    debug!("Shell is gone, not resizing");
                                }
                                if let Err(e) = surface.fit(size).await {
                                    warn!("Terminal fit failed: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        }));

        self.terminals.update(|list| {
            let mut list = list.clone();
            list.push(info.clone());
            list
        });
        lock_live(&self.live).insert(info.id, (kill.clone(), cancel.clone()));
        self.arm_idle_release();

        Ok(TerminalHandle {
            info,
            input,
            kill,
            exit: Some(exit),
            cancel,
            tasks,
            terminals: self.terminals.clone(),
            live: self.live.clone(),
        })
    }
}

/// An open terminal and the shell behind it
pub struct TerminalHandle {
    info: TerminalInfo,
    input: mpsc::Sender<Bytes>,
    kill: KillHandle,
    exit: Option<oneshot::Receiver<i32>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    terminals: Cell<Vec<TerminalInfo>>,
    live: LiveShells,
}

impl TerminalHandle {
    pub fn id(&self) -> Uuid {
        self.info.id
    }

    pub fn label(&self) -> &str {
        &self.info.label
    }

    pub fn info(&self) -> &TerminalInfo {
        &self.info
    }

    /// Write bytes to the shell as if typed
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.input
            .send(data.into())
            .await
            .map_err(|_| PlaygroundError::Process(format!("terminal {} has exited", self.info.id)))
    }

    /// Wait for the shell to exit on its own
    pub async fn wait(&mut self) -> Result<i32> {
        let exit = self
            .exit
            .take()
            .ok_or_else(|| PlaygroundError::Defect("exit status already taken".to_string()))?;
        Process::wait(exit).await
    }

    /// Kill the shell, stop the pumps and wait for them to finish
    pub async fn close(mut self) -> Result<Option<i32>> {
        lock_live(&self.live).remove(&self.info.id);
        self.kill.kill().await;
        let code = match self.exit.take() {
            Some(exit) => match tokio::time::timeout(Duration::from_secs(5), exit).await {
                Ok(Ok(code)) => Some(code),
                Ok(Err(_)) => None,
                Err(_) => {
                    warn!("Terminal {} did not exit after kill", self.info.id);
                    None
                }
            },
            None => None,
        };

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Terminal pump for {} failed: {}", self.info.id, e);
            }
        }

        let id = self.info.id;
        self.terminals
            .update(|list| list.iter().filter(|t| t.id != id).cloned().collect());
        info!("Closed terminal '{}'", self.info.label);
        Ok(code)
    }
}

impl Drop for TerminalHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
