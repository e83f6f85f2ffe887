//! Terminal widget abstraction

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Geometry of the terminal container, as published by the rendering layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

#[async_trait]
pub trait TerminalSurface: Send + Sync {
    /// Display bytes produced by the process
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Bytes typed by the user
    fn input(&self) -> BoxStream<'static, Bytes>;

    /// Lay the widget out for `size` after the container was resized
    async fn fit(&self, size: TerminalSize) -> Result<()>;
}
