//! In-memory location store
//!
//! Used for standalone deployments without a database and by tests. Samples
//! are kept per bus in arrival order next to an index of the latest sample,
//! so `latest_sample` never scans the log.

use async_trait::async_trait;
use bustrack_common::{Bus, BusKey, PositionSample, TrackerError};
use dashmap::DashMap;

use crate::model::StorageMode;
use crate::traits::LocationStore;

#[derive(Default)]
pub struct MemoryLocationStore {
    buses: DashMap<i64, Bus>,
    samples: DashMap<i64, Vec<PositionSample>>,
    latest: DashMap<i64, PositionSample>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with `buses`
    pub fn with_buses(buses: impl IntoIterator<Item = Bus>) -> Self {
        let store = Self::new();
        for bus in buses {
            store.insert_bus(bus);
        }
        store
    }

    /// Register or replace a bus record
    pub fn insert_bus(&self, bus: Bus) {
        self.buses.insert(bus.id, bus);
    }

    /// All samples recorded for a bus, in insertion order
    pub fn samples(&self, bus_id: i64) -> Vec<PositionSample> {
        self.samples
            .get(&bus_id)
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }

    /// Total number of samples across all buses
    pub fn sample_count(&self) -> usize {
        self.samples.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn insert_sample(&self, sample: &PositionSample) -> anyhow::Result<()> {
        if !self.buses.contains_key(&sample.bus_id) {
            return Err(TrackerError::BusNotExist(sample.bus_id.to_string()).into());
        }

        let mut log = self.samples.entry(sample.bus_id).or_default();
        log.push(sample.clone());

        // Later arrivals win timestamp ties. Updated while the log shard is
        // held so the index never runs ahead of the log.
        self.latest
            .entry(sample.bus_id)
            .and_modify(|latest| {
                if sample.timestamp >= latest.timestamp {
                    *latest = sample.clone();
                }
            })
            .or_insert_with(|| sample.clone());
        drop(log);

        Ok(())
    }

    async fn latest_sample(&self, bus_id: i64) -> anyhow::Result<Option<PositionSample>> {
        Ok(self.latest.get(&bus_id).map(|latest| latest.value().clone()))
    }

    async fn find_bus(&self, key: &BusKey) -> anyhow::Result<Option<Bus>> {
        let bus = match key {
            BusKey::Id(id) => self.buses.get(id).map(|b| b.clone()),
            BusKey::Username(_) => self
                .buses
                .iter()
                .find(|entry| key.matches(entry.value()))
                .map(|entry| entry.value().clone()),
        };

        Ok(bus)
    }

    async fn all_buses(&self) -> anyhow::Result<Vec<Bus>> {
        let mut buses: Vec<Bus> = self.buses.iter().map(|e| e.value().clone()).collect();
        buses.sort_by_key(|b| b.id);
        Ok(buses)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
