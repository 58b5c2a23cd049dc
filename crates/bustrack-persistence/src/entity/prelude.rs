//! `SeaORM` entity prelude

pub use super::bus::Entity as BusEntity;
pub use super::bus_location::Entity as BusLocationEntity;
