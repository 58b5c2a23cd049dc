//! Process-local latest position per bus

use std::collections::HashMap;
use std::sync::Arc;

use bustrack_common::{Bus, BusKey, PositionSample};
use dashmap::DashMap;

use crate::model::{BusFilter, BusPosition};

/// Cached bus metadata together with its latest accepted sample
#[derive(Clone, Debug, PartialEq)]
pub struct CachedPosition {
    pub bus: Arc<Bus>,
    pub sample: PositionSample,
}

/// Anything consumer sessions can read snapshots from
pub trait PositionSource: Send + Sync {
    /// Current positions admitted by `filter`. Bus metadata is attached only
    /// for `BusFilter::All`.
    fn positions(&self, filter: &BusFilter) -> Vec<BusPosition>;
}

/// Latest-known position per bus.
///
/// Entries are replaced as whole values so readers never observe a partially
/// updated sample. There is no ordering across buses.
///
/// Bus metadata lives in a directory next to the entries. Samples always
/// pick up the directory's record, and `sync_buses` rewrites both when the
/// location store reports changes (a bus deactivated mid-session drops out
/// of "all buses" snapshots on the next sync).
#[derive(Clone, Default)]
pub struct PositionCache {
    entries: Arc<DashMap<i64, CachedPosition>>,
    buses: Arc<DashMap<i64, Arc<Bus>>>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `sample` as the latest position of its bus. `bus` is only
    /// used when the directory has no record for it yet.
    pub fn update(&self, bus: Arc<Bus>, sample: PositionSample) {
        let bus = self.known_bus(bus);
        self.entries
            .insert(sample.bus_id, CachedPosition { bus, sample });
    }

    /// Install `sample` only if the bus has no cached position yet
    pub fn warm(&self, bus: Arc<Bus>, sample: PositionSample) -> bool {
        let bus = self.known_bus(bus);
        let mut inserted = false;
        self.entries.entry(sample.bus_id).or_insert_with(|| {
            inserted = true;
            CachedPosition { bus, sample }
        });
        inserted
    }

    /// Record a freshly loaded bus, replacing the metadata of its entry
    pub fn set_bus(&self, bus: Arc<Bus>) {
        self.buses.insert(bus.id, bus.clone());
        if let Some(mut entry) = self.entries.get_mut(&bus.id) {
            entry.bus = bus;
        }
    }

    /// Replace the bus directory with `buses`.
    ///
    /// Entries whose metadata changed are rewritten; entries for buses the
    /// store no longer knows are removed. Returns the number of entries
    /// touched.
    pub fn sync_buses(&self, buses: impl IntoIterator<Item = Bus>) -> usize {
        let fresh: HashMap<i64, Arc<Bus>> = buses
            .into_iter()
            .map(|bus| (bus.id, Arc::new(bus)))
            .collect();

        self.buses.retain(|id, _| fresh.contains_key(id));
        for (id, bus) in &fresh {
            self.buses.insert(*id, bus.clone());
        }

        let before = self.entries.len();
        self.entries.retain(|id, _| fresh.contains_key(id));
        let mut touched = before.saturating_sub(self.entries.len());

        for mut entry in self.entries.iter_mut() {
            if let Some(bus) = fresh.get(entry.key())
                && entry.bus.as_ref() != bus.as_ref()
            {
                entry.value_mut().bus = bus.clone();
                touched += 1;
            }
        }

        touched
    }

    /// Directory record for a bus, if one has been loaded
    pub fn bus(&self, bus_id: i64) -> Option<Arc<Bus>> {
        self.buses.get(&bus_id).map(|bus| bus.value().clone())
    }

    fn known_bus(&self, bus: Arc<Bus>) -> Arc<Bus> {
        self.buses.entry(bus.id).or_insert(bus).value().clone()
    }

    pub fn get(&self, bus_id: i64) -> Option<CachedPosition> {
        self.entries.get(&bus_id).map(|entry| entry.value().clone())
    }

    pub fn find(&self, key: &BusKey) -> Option<CachedPosition> {
        match key {
            BusKey::Id(id) => self.get(*id),
            BusKey::Username(_) => self
                .entries
                .iter()
                .find(|entry| key.matches(&entry.value().bus))
                .map(|entry| entry.value().clone()),
        }
    }

    /// Point-in-time copy of every entry
    pub fn get_all(&self) -> HashMap<i64, CachedPosition> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn remove(&self, bus_id: i64) -> Option<CachedPosition> {
        self.entries.remove(&bus_id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PositionSource for PositionCache {
    fn positions(&self, filter: &BusFilter) -> Vec<BusPosition> {
        match filter {
            BusFilter::Single(key) => self
                .find(key)
                .map(|entry| BusPosition {
                    sample: entry.sample,
                    bus: None,
                })
                .into_iter()
                .collect(),
            BusFilter::All => {
                let mut positions: Vec<BusPosition> = self
                    .entries
                    .iter()
                    .filter(|entry| filter.admits(&entry.value().bus))
                    .map(|entry| BusPosition {
                        sample: entry.value().sample.clone(),
                        bus: Some(entry.value().bus.as_ref().clone()),
                    })
                    .collect();
                positions.sort_by_key(|p| p.sample.bus_id);
                positions
            }
        }
    }
}
