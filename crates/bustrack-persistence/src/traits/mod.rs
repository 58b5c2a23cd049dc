//! Store traits for the tracking core
//!
//! The distribution hub depends only on these two capabilities. The primary
//! location store is the durability guarantee; the mirror store is a
//! best-effort secondary sink and must never be treated as authoritative.

pub mod location;
pub mod mirror;

pub use location::LocationStore;
pub use mirror::MirrorStore;
