//! `SeaORM` Entity for bus table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bus")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub username: String,
    pub plate_number: String,
    pub route: Option<String>,
    pub active: bool,
    pub gmt_create: DateTime,
    pub gmt_modified: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::bus_location::Entity")]
    BusLocation,
}

impl Related<super::bus_location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BusLocation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
