// bustrack server library
// Binds the distribution hub to HTTP / WebSocket endpoints and wires the
// configured stores, auth gate, logging, and shutdown handling

pub mod api; // HTTP and WebSocket handlers
pub mod model; // Configuration, application state, response types
pub mod startup; // Logging, HTTP server, shutdown

pub use model::{AppState, Configuration};
