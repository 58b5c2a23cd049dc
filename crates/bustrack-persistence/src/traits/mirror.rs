//! Mirror store trait

use async_trait::async_trait;
use bustrack_common::PositionSample;

/// Secondary, best-effort sink for accepted samples.
///
/// Callers log and swallow errors from this trait.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Short backend name used in log fields
    fn name(&self) -> &'static str;

    /// Write a copy of an accepted sample
    async fn mirror_sample(&self, sample: &PositionSample) -> anyhow::Result<()>;
}
