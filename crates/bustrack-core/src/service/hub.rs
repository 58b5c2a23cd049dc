//! Distribution hub
//!
//! The hub owns the position cache and the injected collaborators (location
//! store, mirror, auth gate). It negotiates sessions and hands back
//! `ProducerSession` / `ConsumerSession` values whose `run` methods drive one
//! connection each. Sessions are transport agnostic: the inbound side is any
//! stream of text frames and the outbound side is a bounded channel drained
//! by the transport.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bustrack_auth::AuthGate;
use bustrack_common::error::{DATA_ACCESS_ERROR, SESSION_IDLE_TIMEOUT};
use bustrack_common::{Bus, now_millis};
use bustrack_persistence::{LocationStore, MirrorStore, NoopMirror};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::cache::{PositionCache, PositionSource};
use super::mirror::MirrorDispatcher;
use super::registry::{SessionGuard, SessionInfo, SessionRegistry};
use crate::error::{HubError, TransportError};
use crate::model::{
    BusFilter, ConsumerHandshake, HubConfig, LocationUpdate, ProducerHandshake, Role,
    ServerMessage, SessionEnd,
};

/// How long a terminal error frame may wait for room in the outbound buffer
const TERMINAL_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

struct HubInner {
    store: Arc<dyn LocationStore>,
    auth: Arc<dyn AuthGate>,
    cache: PositionCache,
    mirror: MirrorDispatcher,
    registry: SessionRegistry,
    simulation: Option<Arc<dyn PositionSource>>,
    config: HubConfig,
    /// Wakes the bus refresher ahead of its interval
    bus_refresh: Arc<Notify>,
    shutdown: watch::Sender<bool>,
}

/// Realtime distribution hub, cheap to clone
#[derive(Clone)]
pub struct DistributionHub {
    inner: Arc<HubInner>,
}

pub struct DistributionHubBuilder {
    store: Arc<dyn LocationStore>,
    auth: Arc<dyn AuthGate>,
    mirror: Arc<dyn MirrorStore>,
    cache: PositionCache,
    simulation: Option<Arc<dyn PositionSource>>,
    config: HubConfig,
}

impl DistributionHubBuilder {
    pub fn mirror(mut self, mirror: Arc<dyn MirrorStore>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn cache(mut self, cache: PositionCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn simulation(mut self, source: Arc<dyn PositionSource>) -> Self {
        self.simulation = Some(source);
        self
    }

    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the hub and start its mirror dispatcher and bus refresher.
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> DistributionHub {
        let (mirror, _worker) =
            MirrorDispatcher::start(self.mirror, self.config.mirror_queue_capacity);
        let bus_refresh = Arc::new(Notify::new());
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(HubInner {
            store: self.store,
            auth: self.auth,
            cache: self.cache,
            mirror,
            registry: SessionRegistry::new(),
            simulation: self.simulation,
            config: self.config,
            bus_refresh: bus_refresh.clone(),
            shutdown,
        });

        spawn_bus_refresher(
            Arc::downgrade(&inner),
            bus_refresh,
            inner.config.bus_refresh_interval,
        );

        DistributionHub { inner }
    }
}

/// Reload bus metadata every `period`, or sooner when `trigger` fires. Exits
/// once the hub is dropped or shut down.
fn spawn_bus_refresher(weak: Weak<HubInner>, trigger: Arc<Notify>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = trigger.notified() => {}
            }

            let Some(inner) = weak.upgrade() else { break };
            if *inner.shutdown.borrow() {
                break;
            }

            let hub = DistributionHub { inner };
            if let Err(e) = hub.refresh_buses().await {
                warn!(error = %e, "Failed to refresh bus metadata");
            }
        }

        debug!("Bus refresher stopped");
    });
}

/// Resolves once the hub asks sessions to stop. Never resolves if the hub is
/// gone without asking.
async fn stop_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Deliver a frame that precedes the end of a session. Unlike acks these are
/// not dropped on a momentarily full buffer; they wait briefly for the
/// transport to drain.
async fn emit_terminal(
    outbound: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
    session_id: &str,
) {
    match tokio::time::timeout(TERMINAL_FRAME_TIMEOUT, outbound.send(message)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => debug!(session_id, "Peer gone before the terminal frame was sent"),
        Err(_) => warn!(
            session_id,
            "Outbound buffer still full, terminal error frame dropped"
        ),
    }
}

impl DistributionHub {
    pub fn builder(
        store: Arc<dyn LocationStore>,
        auth: Arc<dyn AuthGate>,
    ) -> DistributionHubBuilder {
        DistributionHubBuilder {
            store,
            auth,
            mirror: Arc::new(NoopMirror),
            cache: PositionCache::new(),
            simulation: None,
            config: HubConfig::default(),
        }
    }

    pub fn new(
        store: Arc<dyn LocationStore>,
        mirror: Arc<dyn MirrorStore>,
        auth: Arc<dyn AuthGate>,
        config: HubConfig,
    ) -> Self {
        Self::builder(store, auth).mirror(mirror).config(config).build()
    }

    pub fn cache(&self) -> &PositionCache {
        &self.inner.cache
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn LocationStore> {
        &self.inner.store
    }

    /// Reload every bus record into the cache's directory. Returns the number
    /// of cached entries whose metadata changed or that were removed.
    pub async fn refresh_buses(&self) -> anyhow::Result<usize> {
        let buses = self.inner.store.all_buses().await?;
        let total = buses.len();
        let touched = self.inner.cache.sync_buses(buses);

        if touched > 0 {
            info!(buses = total, touched, "Bus metadata refreshed");
        } else {
            debug!(buses = total, "Bus metadata unchanged");
        }
        Ok(touched)
    }

    /// Ask every open session to end. Sessions finish with
    /// `SessionEnd::Shutdown`; sessions opened afterwards end immediately.
    pub fn shutdown(&self) {
        info!(
            sessions = self.inner.registry.count(),
            "Distribution hub shutting down"
        );
        self.inner.shutdown.send_replace(true);
        self.inner.bus_refresh.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Pre-populate the cache with the latest stored sample of every active
    /// bus. Entries already updated by live producers are left alone.
    pub async fn warm_cache(&self) -> anyhow::Result<usize> {
        let buses = self.inner.store.all_buses().await?;
        let mut warmed = 0;

        for bus in buses.into_iter().filter(|bus| bus.active) {
            if let Some(sample) = self.inner.store.latest_sample(bus.id).await?
                && self.inner.cache.warm(Arc::new(bus), sample)
            {
                warmed += 1;
            }
        }

        info!(warmed, "Position cache warmed from location store");
        Ok(warmed)
    }

    /// Resolve the target bus and authorize the producer.
    ///
    /// The auth gate is consulted exactly once, and only for an existing,
    /// active bus.
    pub async fn connect_producer(
        &self,
        handshake: ProducerHandshake,
    ) -> Result<ProducerSession, HubError> {
        let key = handshake.bus;

        let bus = match self.inner.store.find_bus(&key).await {
            Ok(Some(bus)) => bus,
            Ok(None) => {
                warn!(bus = %key, peer = %handshake.peer, "Producer rejected, unknown bus");
                return Err(HubError::UnknownBus(key));
            }
            Err(e) => {
                error!(bus = %key, error = %e, "Failed to look up producer bus");
                return Err(HubError::Store(e));
            }
        };

        if !bus.active {
            warn!(bus_id = bus.id, peer = %handshake.peer, "Producer rejected, bus inactive");
            return Err(HubError::InactiveBus(key));
        }

        if !self.inner.auth.authorize(&handshake.credential, &bus).await {
            warn!(bus_id = bus.id, peer = %handshake.peer, "Producer rejected, not authorized");
            return Err(HubError::Unauthorized(key));
        }

        let bus = Arc::new(bus);
        self.inner.cache.set_bus(bus.clone());

        let session_id = self.inner.registry.next_session_id(&handshake.peer);
        let guard = self.inner.registry.register(SessionInfo {
            session_id: session_id.clone(),
            role: Role::Producer,
            bus: Some(bus.id.to_string()),
            peer: handshake.peer,
            opened_at: now_millis(),
        });

        info!(session_id = %session_id, bus_id = bus.id, "Producer session opened");

        Ok(ProducerSession {
            hub: self.clone(),
            bus,
            session_id,
            accepted: 0,
            _guard: guard,
        })
    }

    /// Open a consumer session. Consumers are never rejected; a filter that
    /// matches nothing yields empty snapshots.
    pub fn connect_consumer(&self, handshake: ConsumerHandshake) -> ConsumerSession {
        let live: Arc<dyn PositionSource> = Arc::new(self.inner.cache.clone());

        let (source, filter) = match (handshake.experimental, &self.inner.simulation) {
            (true, Some(simulation)) => {
                let filter = handshake
                    .experimental_id
                    .map(BusFilter::Single)
                    .unwrap_or(handshake.filter);
                (simulation.clone(), filter)
            }
            (true, None) => {
                warn!(
                    peer = %handshake.peer,
                    "Experimental stream requested without a simulated fleet, \
                     serving live positions"
                );
                (live, handshake.filter)
            }
            (false, _) => (live, handshake.filter),
        };

        let session_id = self.inner.registry.next_session_id(&handshake.peer);
        let guard = self.inner.registry.register(SessionInfo {
            session_id: session_id.clone(),
            role: Role::Consumer,
            bus: match &filter {
                BusFilter::All => None,
                BusFilter::Single(key) => Some(key.to_string()),
            },
            peer: handshake.peer,
            opened_at: now_millis(),
        });

        // "All buses" snapshots filter on the active flag, so make sure the
        // directory catches up soon after a new reader arrives
        if filter.is_all() {
            self.inner.bus_refresh.notify_one();
        }

        info!(
            session_id = %session_id,
            filter = ?filter,
            experimental = handshake.experimental,
            "Consumer session opened"
        );

        ConsumerSession {
            session_id,
            filter,
            source,
            cadence: self.inner.config.consumer_cadence,
            shutdown: self.inner.shutdown.subscribe(),
            _guard: guard,
        }
    }
}

/// An authorized producer connection
pub struct ProducerSession {
    hub: DistributionHub,
    bus: Arc<Bus>,
    session_id: String,
    accepted: u64,
    _guard: SessionGuard,
}

impl ProducerSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Ingest samples until the peer goes away, the producer idles out, or
    /// the location store fails.
    ///
    /// Samples are stored, cached, and mirrored strictly in receipt order.
    pub async fn run<S>(
        mut self,
        mut inbound: S,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<SessionEnd, HubError>
    where
        S: Stream<Item = Result<String, TransportError>> + Unpin,
    {
        let idle = self.hub.inner.config.producer_idle_timeout;
        let shutdown = self.hub.inner.shutdown.subscribe();

        let end = loop {
            let next = tokio::select! {
                _ = outbound.closed() => break SessionEnd::OutboundClosed,
                _ = stop_requested(shutdown.clone()) => break SessionEnd::Shutdown,
                next = tokio::time::timeout(idle, inbound.next()) => next,
            };

            match next {
                Err(_) => {
                    info!(
                        session_id = %self.session_id,
                        bus_id = self.bus.id,
                        idle_secs = idle.as_secs(),
                        "Producer idle, closing session"
                    );
                    emit_terminal(
                        &outbound,
                        ServerMessage::error(
                            &SESSION_IDLE_TIMEOUT,
                            format!("no sample received for {:?}", idle),
                        ),
                        &self.session_id,
                    )
                    .await;
                    break SessionEnd::IdleTimeout;
                }
                Ok(None) => break SessionEnd::PeerClosed,
                Ok(Some(Err(e))) => {
                    warn!(
                        session_id = %self.session_id,
                        bus_id = self.bus.id,
                        error = %e,
                        "Producer transport failed"
                    );
                    return Err(HubError::Transport(e));
                }
                Ok(Some(Ok(text))) => {
                    if let Some(end) = self.handle_frame(&text, &outbound).await? {
                        break end;
                    }
                }
            }
        };

        info!(
            session_id = %self.session_id,
            bus_id = self.bus.id,
            accepted = self.accepted,
            end = ?end,
            "Producer session closed"
        );
        Ok(end)
    }

    async fn handle_frame(
        &mut self,
        text: &str,
        outbound: &mpsc::Sender<ServerMessage>,
    ) -> Result<Option<SessionEnd>, HubError> {
        let update = match LocationUpdate::parse(text) {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    bus_id = self.bus.id,
                    error = %e,
                    "Dropping malformed sample"
                );
                return Ok(emit(
                    outbound,
                    ServerMessage::SampleRejected {
                        reason: e.to_string(),
                    },
                )
                .await);
            }
        };

        let sample = update.into_sample(self.bus.id);
        let hub = &self.hub.inner;

        if let Err(e) = hub.store.insert_sample(&sample).await {
            error!(
                session_id = %self.session_id,
                bus_id = self.bus.id,
                timestamp = sample.timestamp,
                error = %e,
                "Location store write failed, closing producer session"
            );
            emit_terminal(
                outbound,
                ServerMessage::error(&DATA_ACCESS_ERROR, DATA_ACCESS_ERROR.message),
                &self.session_id,
            )
            .await;
            return Err(HubError::Store(e));
        }

        hub.cache.update(self.bus.clone(), sample.clone());
        hub.mirror.submit(sample.clone());
        self.accepted += 1;

        trace!(
            session_id = %self.session_id,
            bus_id = sample.bus_id,
            timestamp = sample.timestamp,
            "Sample accepted"
        );

        Ok(emit(
            outbound,
            ServerMessage::Ack {
                bus_id: sample.bus_id,
                timestamp: sample.timestamp,
                sequence: self.accepted,
            },
        )
        .await)
    }
}

async fn emit(
    outbound: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
) -> Option<SessionEnd> {
    outbound
        .send(message)
        .await
        .err()
        .map(|_| SessionEnd::OutboundClosed)
}

/// A consumer connection receiving snapshots on a fixed cadence
pub struct ConsumerSession {
    session_id: String,
    filter: BusFilter,
    source: Arc<dyn PositionSource>,
    cadence: Duration,
    shutdown: watch::Receiver<bool>,
    _guard: SessionGuard,
}

impl ConsumerSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn filter(&self) -> &BusFilter {
        &self.filter
    }

    /// Push one snapshot immediately and then one per cadence tick until the
    /// peer goes away. Inbound frames are drained and ignored.
    ///
    /// A consumer whose outbound buffer is still full at a tick is dropped
    /// with `HubError::SlowConsumer`.
    pub async fn run<S>(
        self,
        mut inbound: S,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<SessionEnd, HubError>
    where
        S: Stream<Item = Result<String, TransportError>> + Unpin,
    {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent: u64 = 0;

        let end = loop {
            tokio::select! {
                _ = outbound.closed() => break SessionEnd::OutboundClosed,
                _ = stop_requested(self.shutdown.clone()) => break SessionEnd::Shutdown,
                frame = inbound.next() => match frame {
                    None => break SessionEnd::PeerClosed,
                    Some(Err(e)) => {
                        debug!(
                            session_id = %self.session_id,
                            error = %e,
                            "Consumer transport failed"
                        );
                        return Err(HubError::Transport(e));
                    }
                    Some(Ok(_)) => trace!(session_id = %self.session_id, "Ignoring consumer frame"),
                },
                _ = ticker.tick() => {
                    let snapshot = ServerMessage::Snapshot {
                        buses: self.source.positions(&self.filter),
                        generated_at: now_millis(),
                    };

                    match outbound.try_send(snapshot) {
                        Ok(()) => sent += 1,
                        Err(TrySendError::Full(_)) => {
                            warn!(
                                session_id = %self.session_id,
                                sent,
                                "Consumer outbound buffer full, dropping session"
                            );
                            return Err(HubError::SlowConsumer);
                        }
                        Err(TrySendError::Closed(_)) => break SessionEnd::OutboundClosed,
                    }
                }
            }
        };

        info!(session_id = %self.session_id, sent, end = ?end, "Consumer session closed");
        Ok(end)
    }
}
