//! Process host exposed by the sandbox

use super::terminal::TerminalSize;
use crate::{PlaygroundError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Request to start a process inside the sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

impl SpawnRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Run `script` through `shell -c`
    pub fn script(shell: &str, script: &str) -> Self {
        Self::new(shell).arg("-c").arg(script)
    }
}

/// Requests termination of a running process
#[derive(Debug, Clone)]
pub struct KillHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl KillHandle {
    pub fn new(shutdown_tx: mpsc::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    /// Ask the host to kill the process; a process that already exited is fine
    pub async fn kill(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Like [`KillHandle::kill`], for callers that cannot await. A request
    /// already queued is enough.
    pub fn kill_now(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

/// Changes the window size the process sees
#[derive(Debug, Clone)]
pub struct ResizeHandle {
    resize_tx: mpsc::Sender<TerminalSize>,
}

impl ResizeHandle {
    pub fn new(resize_tx: mpsc::Sender<TerminalSize>) -> Self {
        Self { resize_tx }
    }

    /// Returns false once the process is gone
    pub async fn resize(&self, size: TerminalSize) -> bool {
        self.resize_tx.send(size).await.is_ok()
    }
}

/// A running process. Fields are meant to be taken apart by the consumer.
pub struct Process {
    pub pid: Option<u32>,
    /// Bytes written here reach the process's stdin
    pub input: mpsc::Sender<Bytes>,
    /// Everything the process writes to stdout/stderr
    pub output: BoxStream<'static, Bytes>,
    /// Resolves with the exit code
    pub exit: oneshot::Receiver<i32>,
    pub kill: KillHandle,
    pub resize: ResizeHandle,
}

impl Process {
    /// Wait for the exit code, treating a dropped sender as a process failure
    pub async fn wait(exit: oneshot::Receiver<i32>) -> Result<i32> {
        exit.await
            .map_err(|_| PlaygroundError::Process("exit status was never reported".to_string()))
    }
}

#[async_trait]
pub trait ProcessHost: Send + Sync {
    async fn spawn(&self, request: SpawnRequest) -> Result<Process>;
}
