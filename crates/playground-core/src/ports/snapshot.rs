//! Storage for encoded workspace snapshots (autosave, sharing)

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, key: &str, encoded: &str) -> Result<()>;

    async fn load(&self, key: &str) -> Result<Option<String>>;
}
