//! Authorization gate trait

use async_trait::async_trait;
use bustrack_common::Bus;

/// Validates a producer credential against the bus it wants to report for.
///
/// Pass/fail only. The hub calls this exactly once per producer session.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn authorize(&self, credential: &str, bus: &Bus) -> bool;
}

/// Gate used when authentication is disabled: every producer passes
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledAuthGate;

#[async_trait]
impl AuthGate for DisabledAuthGate {
    async fn authorize(&self, _credential: &str, _bus: &Bus) -> bool {
        true
    }
}
