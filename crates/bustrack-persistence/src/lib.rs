//! bustrack Persistence - Location store and mirror store layer
//!
//! This crate provides:
//! - SeaORM entity definitions for buses and position samples
//! - The `LocationStore` and `MirrorStore` capability traits
//! - A SQL backend, an in-memory backend, and an HTTP document mirror

pub mod entity;
pub mod memory;
pub mod mirror;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export store traits
pub use traits::{LocationStore, MirrorStore};

// Re-export backends
pub use memory::MemoryLocationStore;
pub use mirror::{HttpDocumentMirror, MirrorDocument, NoopMirror};
pub use sql::SqlLocationStore;

// Re-export model types
pub use model::StorageMode;
