//! Background dispatcher for best-effort mirror writes
//!
//! Producer sessions hand accepted samples to a bounded queue and move on; a
//! single worker drains the queue into the mirror store. Mirror failures and
//! a full queue are logged and never reach the producer.

use std::sync::Arc;

use bustrack_common::PositionSample;
use bustrack_persistence::MirrorStore;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MirrorDispatcher {
    sender: mpsc::Sender<PositionSample>,
    backend: &'static str,
}

impl MirrorDispatcher {
    /// Spawn the mirror worker. Must be called from within a tokio runtime.
    ///
    /// The worker stops once every dispatcher clone has been dropped and the
    /// queue is drained.
    pub fn start(mirror: Arc<dyn MirrorStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<PositionSample>(capacity.max(1));
        let backend = mirror.name();

        let handle = tokio::spawn(async move {
            while let Some(sample) = receiver.recv().await {
                if let Err(e) = mirror.mirror_sample(&sample).await {
                    warn!(
                        backend,
                        bus_id = sample.bus_id,
                        timestamp = sample.timestamp,
                        error = %e,
                        "Mirror write failed, sample kept in location store only"
                    );
                }
            }
            debug!(backend, "Mirror dispatcher stopped");
        });

        (Self { sender, backend }, handle)
    }

    /// Queue a copy of `sample`. Returns false when the copy was dropped.
    pub fn submit(&self, sample: PositionSample) -> bool {
        match self.sender.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(sample)) => {
                warn!(
                    backend = self.backend,
                    bus_id = sample.bus_id,
                    timestamp = sample.timestamp,
                    "Mirror queue full, dropping mirror copy"
                );
                false
            }
            Err(TrySendError::Closed(sample)) => {
                warn!(
                    backend = self.backend,
                    bus_id = sample.bus_id,
                    "Mirror dispatcher stopped, dropping mirror copy"
                );
                false
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }
}
