//! bustrack Auth - Producer authorization gate
//!
//! This crate provides:
//! - The `AuthGate` capability consulted once per producer session
//! - A JWT-backed gate and a pass-through gate for auth-disabled deployments

pub mod model;
pub mod service;

pub use service::gate::{AuthGate, DisabledAuthGate};
pub use service::jwt::JwtAuthGate;
