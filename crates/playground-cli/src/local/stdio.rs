//! Terminal surfaces backed by the process's own stdio

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use playground_core::ports::{TerminalSize, TerminalSurface};
use playground_core::Result;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Writes process output to stdout and reads keystrokes from stdin
#[derive(Default)]
pub struct StdioTerminal;

impl StdioTerminal {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TerminalSurface for StdioTerminal {
    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(data).await?;
        stdout.flush().await?;
        Ok(())
    }

    fn input(&self) -> BoxStream<'static, Bytes> {
        ReaderStream::new(tokio::io::stdin())
            .filter_map(|chunk| async move { chunk.ok() })
            .boxed()
    }

    async fn fit(&self, size: TerminalSize) -> Result<()> {
        // The host terminal owns its own geometry
        debug!(
            "Ignoring fit to {}x{} for stdio terminal",
            size.cols, size.rows
        );
        Ok(())
    }
}

/// Forwards everything written to an inner surface and copies it to a
/// channel, so traced output can be read while the user watches it
pub struct TeeSurface {
    inner: Arc<dyn TerminalSurface>,
    copy: mpsc::UnboundedSender<Bytes>,
}

impl TeeSurface {
    pub fn new(inner: Arc<dyn TerminalSurface>) -> (Self, BoxStream<'static, Bytes>) {
        let (copy, rx) = mpsc::unbounded_channel();
        let copies = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|data| (data, rx))
        })
        .boxed();
        (Self { inner, copy }, copies)
    }
}

#[async_trait]
impl TerminalSurface for TeeSurface {
    async fn write(&self, data: &[u8]) -> Result<()> {
        let _ = self.copy.send(Bytes::copy_from_slice(data));
        self.inner.write(data).await
    }

    fn input(&self) -> BoxStream<'static, Bytes> {
        self.inner.input()
    }

    async fn fit(&self, size: TerminalSize) -> Result<()> {
        self.inner.fit(size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playground_core::memory::MemoryTerminal;

    #[tokio::test]
    async fn test_tee_copies_output() {
        let inner = Arc::new(MemoryTerminal::new());
        let (tee, mut copies) = TeeSurface::new(inner.clone());

        tee.write(b"line one\n").await.unwrap();
        tee.write(b"line two\n").await.unwrap();
        drop(tee);

        assert_eq!(inner.output_text(), "line one\nline two\n");
        assert_eq!(copies.next().await.unwrap(), Bytes::from_static(b"line one\n"));
        assert_eq!(copies.next().await.unwrap(), Bytes::from_static(b"line two\n"));
        assert!(copies.next().await.is_none());
    }
}
