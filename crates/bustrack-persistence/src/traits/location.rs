//! Location store trait
//!
//! Durable keyed storage for bus records and the append-only position log.

use async_trait::async_trait;
use bustrack_common::{Bus, BusKey, PositionSample};

use crate::model::StorageMode;

/// Primary location storage operations
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Get the storage mode of this backend
    fn storage_mode(&self) -> StorageMode;

    /// Append a position sample to the log
    async fn insert_sample(&self, sample: &PositionSample) -> anyhow::Result<()>;

    /// Most recent sample (by timestamp) for a bus
    async fn latest_sample(&self, bus_id: i64) -> anyhow::Result<Option<PositionSample>>;

    /// Find a bus by id or username
    async fn find_bus(&self, key: &BusKey) -> anyhow::Result<Option<Bus>>;

    /// All registered buses, ordered by id
    async fn all_buses(&self) -> anyhow::Result<Vec<Bus>>;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
