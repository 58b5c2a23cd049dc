//! SQL-based location store (MySQL/PostgreSQL via SeaORM)
//!
//! Thin adapter that implements `LocationStore` with direct SeaORM queries
//! against the `bus` and `bus_location` tables.

use std::time::Duration;

use async_trait::async_trait;
use bustrack_common::{Bus, BusKey, PositionSample};
use sea_orm::{prelude::Expr, *};

use crate::entity::{bus, bus_location};
use crate::model::StorageMode;
use crate::traits::LocationStore;

/// External database location store
///
/// Wraps a SeaORM `DatabaseConnection`.
pub struct SqlLocationStore {
    db: DatabaseConnection,
}

impl SqlLocationStore {
    /// Create a new store over an existing connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open a pooled connection to `url`
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut opt = ConnectOptions::new(url.to_string());
        opt.max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(connect_timeout)
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Ok(Self::new(db))
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn bus_entity_to_domain(model: bus::Model) -> Bus {
    Bus {
        id: model.id,
        username: model.username,
        plate_number: model.plate_number,
        route: model.route,
        active: model.active,
    }
}

fn location_entity_to_domain(model: bus_location::Model) -> PositionSample {
    PositionSample {
        bus_id: model.bus_id,
        latitude: model.latitude,
        longitude: model.longitude,
        speed: model.speed,
        heading: model.heading,
        timestamp: model.timestamp,
    }
}

#[async_trait]
impl LocationStore for SqlLocationStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::ExternalDb
    }

    async fn insert_sample(&self, sample: &PositionSample) -> anyhow::Result<()> {
        let entity = bus_location::ActiveModel {
            bus_id: Set(sample.bus_id),
            latitude: Set(sample.latitude),
            longitude: Set(sample.longitude),
            speed: Set(sample.speed),
            heading: Set(sample.heading),
            timestamp: Set(sample.timestamp),
            gmt_create: Set(chrono::Utc::now().naive_utc()),
            ..Default::default()
        };

        bus_location::Entity::insert(entity).exec(&self.db).await?;

        Ok(())
    }

    async fn latest_sample(&self, bus_id: i64) -> anyhow::Result<Option<PositionSample>> {
        let latest = bus_location::Entity::find()
            .filter(bus_location::Column::BusId.eq(bus_id))
            .order_by_desc(bus_location::Column::Timestamp)
            .order_by_desc(bus_location::Column::Id)
            .one(&self.db)
            .await?;

        Ok(latest.map(location_entity_to_domain))
    }

    async fn find_bus(&self, key: &BusKey) -> anyhow::Result<Option<Bus>> {
        let query = match key {
            BusKey::Id(id) => bus::Entity::find_by_id(*id),
            BusKey::Username(username) => {
                bus::Entity::find().filter(bus::Column::Username.eq(username.as_str()))
            }
        };

        Ok(query.one(&self.db).await?.map(bus_entity_to_domain))
    }

    async fn all_buses(&self) -> anyhow::Result<Vec<Bus>> {
        let buses = bus::Entity::find()
            .order_by_asc(bus::Column::Id)
            .all(&self.db)
            .await?;

        Ok(buses.into_iter().map(bus_entity_to_domain).collect())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        bus::Entity::find()
            .select_only()
            .column_as(Expr::cust("1"), "health")
            .into_tuple::<i32>()
            .one(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_entity_to_domain() {
        let model = bus_location::Model {
            id: 11,
            bus_id: 3,
            latitude: -6.2,
            longitude: 106.8,
            speed: 32.5,
            heading: 270.0,
            timestamp: 1_700_000_000_000,
            gmt_create: chrono::Utc::now().naive_utc(),
        };

        let sample = location_entity_to_domain(model);
        assert_eq!(sample.bus_id, 3);
        assert_eq!(sample.heading, 270.0);
        assert_eq!(sample.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_bus_entity_to_domain() {
        let now = chrono::Utc::now().naive_utc();
        let model = bus::Model {
            id: 3,
            username: "line-3".to_string(),
            plate_number: "D 4411 AB".to_string(),
            route: None,
            active: false,
            gmt_create: now,
            gmt_modified: now,
        };

        let bus = bus_entity_to_domain(model);
        assert_eq!(bus.username, "line-3");
        assert!(!bus.active);
    }
}
