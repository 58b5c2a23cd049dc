//! `SeaORM` entities for the tracking schema

pub mod prelude;

pub mod bus;
pub mod bus_location;
