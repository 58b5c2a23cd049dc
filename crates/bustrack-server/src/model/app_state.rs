//! Shared state handed to every HTTP / WebSocket handler

use bustrack_common::now_millis;
use bustrack_core::DistributionHub;

use super::config::Configuration;

#[derive(Clone)]
pub struct AppState {
    pub configuration: Configuration,
    pub hub: DistributionHub,
    /// Server start time, epoch milliseconds
    pub started_at: i64,
}

impl AppState {
    pub fn new(configuration: Configuration, hub: DistributionHub) -> Self {
        Self {
            configuration,
            hub,
            started_at: now_millis(),
        }
    }
}
