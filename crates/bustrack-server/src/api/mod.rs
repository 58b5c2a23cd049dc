//! HTTP and WebSocket endpoints

pub mod health;
pub mod route;
pub mod stream;
