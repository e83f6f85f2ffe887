//! Text-editing surface that displays one file at a time

use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

#[async_trait]
pub trait EditorSurface: Send + Sync {
    /// Make `content` the active buffer, replacing the previous model
    async fn load_model(&self, path: &str, language: &str, content: &str) -> Result<()>;

    /// Stream of the buffer text. The current text is emitted first, then
    /// one item per change.
    fn content(&self) -> BoxStream<'static, String>;

    fn value(&self) -> String;

    fn set_value(&self, value: &str);
}
