//! Process host that runs commands under a local pseudo-terminal

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use playground_core::ports::{
    KillHandle, Process, ProcessHost, ResizeHandle, SpawnRequest, TerminalSize,
};
use playground_core::{PlaygroundError, Result};
use portable_pty::{
    Child, ChildKiller, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem,
};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const EXIT_POLL: Duration = Duration::from_millis(100);

pub struct PtyProcessHost {
    root: PathBuf,
    size: PtySize,
}

impl PtyProcessHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            size: PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            },
        }
    }

    fn pty_error(e: impl std::fmt::Display) -> PlaygroundError {
        PlaygroundError::Process(e.to_string())
    }
}

#[async_trait]
impl ProcessHost for PtyProcessHost {
    async fn spawn(&self, request: SpawnRequest) -> Result<Process> {
        let pair = NativePtySystem::default()
            .openpty(self.size)
            .map_err(Self::pty_error)?;

        let mut cmd = CommandBuilder::new(&request.command);
        cmd.args(&request.args);
        let cwd = match &request.cwd {
            Some(cwd) => self.root.join(cwd.trim_start_matches('/')),
            None => self.root.clone(),
        };
        cmd.cwd(cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(Self::pty_error)?;
        let pid = child.process_id();
        info!("Spawned {} with PID: {:?}", request.command, pid);
        drop(pair.slave);

        let mut reader = pair.master.try_clone_reader().map_err(Self::pty_error)?;
        let mut writer = pair.master.take_writer().map_err(Self::pty_error)?;

        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(100);
        tokio::task::spawn_blocking(move || {
            while let Some(data) = input_rx.blocking_recv() {
                if writer.write_all(&data).is_err() || writer.flush().is_err() {
                    break;
                }
            }
        });

        let (output_tx, output_rx) = mpsc::channel::<Bytes>(1000);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx
                            .blocking_send(Bytes::copy_from_slice(&buf[..n]))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        // Linux reports EIO once the slave side is gone
                        debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
        });
        let output = stream::unfold(output_rx, |mut rx| async move {
            rx.recv().await.map(|data| (data, rx))
        })
        .boxed();

        let (exit_tx, exit_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (resize_tx, resize_rx) = mpsc::channel(16);
        tokio::spawn(wait_for_exit(
            child,
            pair.master,
            shutdown_rx,
            resize_rx,
            exit_tx,
        ));

        Ok(Process {
            pid,
            input: input_tx,
            output,
            exit: exit_rx,
            kill: KillHandle::new(shutdown_tx),
            resize: ResizeHandle::new(resize_tx),
        })
    }
}

/// Poll the child until it exits, killing or resizing it on request. The
/// master side is held here so the PTY stays open for as long as the child
/// runs.
async fn wait_for_exit(
    mut child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    mut shutdown_rx: mpsc::Receiver<()>,
    mut resize_rx: mpsc::Receiver<TerminalSize>,
    exit_tx: oneshot::Sender<i32>,
) {
    let code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.exit_code() as i32,
            Ok(None) => {}
            Err(e) => {
                error!("Failed to poll child: {}", e);
                break -1;
            }
        }

        tokio::select! {
            Some(()) = shutdown_rx.recv() => {
                debug!("Killing PTY child");
                if let Err(e) = child.kill() {
                    warn!("Failed to kill child: {}", e);
                }
            }
            Some(size) = resize_rx.recv() => {
                let pty_size = PtySize {
                    rows: size.rows,
                    cols: size.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                };
                match master.resize(pty_size) {
                    Ok(()) => debug!("Resized PTY to {}x{}", size.cols, size.rows),
                    Err(e) => warn!("Failed to resize PTY: {}", e),
                }
            }
            _ = tokio::time::sleep(EXIT_POLL) => {}
        }
    };

    info!("PTY child exited with code: {}", code);
    drop(master);
    let _ = exit_tx.send(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_script_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let host = PtyProcessHost::new(dir.path());

        let process = host
            .spawn(SpawnRequest::script("/bin/sh", "echo hello; exit 3"))
            .await
            .unwrap();

        let code = Process::wait(process.exit).await.unwrap();
        assert_eq!(code, 3);

        let output: Vec<Bytes> = process.output.collect().await;
        let text = String::from_utf8_lossy(&output.concat()).into_owned();
        assert!(text.contains("hello"));
    }

    #[tokio::test]
    async fn test_resize_reaches_child() {
        let dir = TempDir::new().unwrap();
        let host = PtyProcessHost::new(dir.path());

        let process = host.spawn(SpawnRequest::new("/bin/sh")).await.unwrap();
        assert!(process.resize.resize(TerminalSize { cols: 100, rows: 40 }).await);
        // Give the exit poller a turn to apply it
        tokio::time::sleep(Duration::from_millis(300)).await;
        process
            .input
            .send(Bytes::from_static(b"stty size; exit\n"))
            .await
            .unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), Process::wait(process.exit))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, 0);
        let output: Vec<Bytes> = process.output.collect().await;
        let text = String::from_utf8_lossy(&output.concat()).into_owned();
        assert!(text.contains("40 100"), "unexpected output: {}", text);
    }

    #[tokio::test]
    async fn test_kill_ends_shell() {
        let dir = TempDir::new().unwrap();
        let host = PtyProcessHost::new(dir.path());

        let process = host.spawn(SpawnRequest::new("/bin/sh")).await.unwrap();
        process.kill.kill().await;

        let code = tokio::time::timeout(Duration::from_secs(5), Process::wait(process.exit))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(code, 0);
    }
}
