// Socket-level tests: a real server and a WebSocket client exchanging frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use actix_web::{App, web};
use async_trait::async_trait;
use awc::ws::{CloseCode, Frame, Message};
use bustrack_auth::DisabledAuthGate;
use bustrack_common::{Bus, BusKey, PositionSample};
use bustrack_core::DistributionHub;
use bustrack_persistence::{LocationStore, MemoryLocationStore, StorageMode};
use bustrack_server::{AppState, Configuration, api::route::routes};
use futures::{SinkExt, Stream, StreamExt};

const WAIT: Duration = Duration::from_secs(5);

/// Memory store whose writes can be switched off
struct SwitchableStore {
    inner: MemoryLocationStore,
    read_only: AtomicBool,
}

#[async_trait]
impl LocationStore for SwitchableStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn insert_sample(&self, sample: &PositionSample) -> anyhow::Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            anyhow::bail!("database is read only");
        }
        self.inner.insert_sample(sample).await
    }

    async fn latest_sample(&self, bus_id: i64) -> anyhow::Result<Option<PositionSample>> {
        self.inner.latest_sample(bus_id).await
    }

    async fn find_bus(&self, key: &BusKey) -> anyhow::Result<Option<Bus>> {
        self.inner.find_bus(key).await
    }

    async fn all_buses(&self) -> anyhow::Result<Vec<Bus>> {
        self.inner.all_buses().await
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn store(read_only: bool) -> Arc<SwitchableStore> {
    Arc::new(SwitchableStore {
        inner: MemoryLocationStore::with_buses([Bus {
            id: 1,
            username: "B1".to_string(),
            plate_number: "B 1001 XY".to_string(),
            route: Some("Blok M - Kota".to_string()),
            active: true,
        }]),
        read_only: AtomicBool::new(read_only),
    })
}

fn server(store: Arc<SwitchableStore>) -> actix_test::TestServer {
    let hub = DistributionHub::builder(store, Arc::new(DisabledAuthGate)).build();
    let state = Arc::new(AppState::new(Configuration::default(), hub));

    actix_test::start(move || {
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(routes)
    })
}

const SAMPLE: &str =
    r#"{"latitude":-6.2,"longitude":106.8,"speed":30.5,"heading":90.0,"timestamp":1700000000000}"#;

async fn next_frame<S, E>(socket: &mut S) -> Frame
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: std::fmt::Debug,
{
    tokio::time::timeout(WAIT, socket.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket ended without a close frame")
        .expect("protocol error")
}

async fn next_json<S, E>(socket: &mut S) -> serde_json::Value
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: std::fmt::Debug,
{
    match next_frame(socket).await {
        Frame::Text(bytes) => serde_json::from_slice(&bytes).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

async fn next_close<S, E>(socket: &mut S) -> CloseCode
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: std::fmt::Debug,
{
    match next_frame(socket).await {
        Frame::Close(Some(reason)) => reason.code,
        other => panic!("expected a close frame, got {:?}", other),
    }
}

#[actix_web::test]
async fn test_unknown_bus_gets_error_frame_then_policy_close() {
    let mut srv = server(store(false));
    let mut socket = srv
        .ws_at("/bus/stream?type=driver&token=t&busId=B9")
        .await
        .unwrap();

    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], 21003);

    assert_eq!(next_close(&mut socket).await, CloseCode::Policy);
}

#[actix_web::test]
async fn test_producer_text_frame_is_acked() {
    let mut srv = server(store(false));
    let mut socket = srv
        .ws_at("/bus/stream?type=driver&token=t&busId=1")
        .await
        .unwrap();

    socket.send(Message::Text(SAMPLE.into())).await.unwrap();

    let ack = next_json(&mut socket).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["busId"], 1);
    assert_eq!(ack["timestamp"], 1700000000000i64);
    assert_eq!(ack["sequence"], 1);

    socket.send(Message::Text("not json".into())).await.unwrap();
    let rejected = next_json(&mut socket).await;
    assert_eq!(rejected["type"], "sampleRejected");
}

#[actix_web::test]
async fn test_store_failure_closes_with_server_error() {
    let mut srv = server(store(true));
    let mut socket = srv
        .ws_at("/bus/stream?type=driver&token=t&busId=B1")
        .await
        .unwrap();

    socket.send(Message::Text(SAMPLE.into())).await.unwrap();

    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], 10002);

    assert_eq!(next_close(&mut socket).await, CloseCode::Error);
}

#[actix_web::test]
async fn test_consumer_receives_snapshot_with_live_position() {
    let store = store(false);
    let mut srv = server(store.clone());

    let mut producer = srv
        .ws_at("/bus/stream?type=driver&token=t&busId=1")
        .await
        .unwrap();
    producer.send(Message::Text(SAMPLE.into())).await.unwrap();
    assert_eq!(next_json(&mut producer).await["type"], "ack");

    let mut consumer = srv.ws_at("/bus/stream?type=client&busId=1").await.unwrap();
    let snapshot = next_json(&mut consumer).await;
    assert_eq!(snapshot["type"], "snapshot");

    let buses = snapshot["buses"].as_array().unwrap();
    assert_eq!(buses.len(), 1);
    assert_eq!(buses[0]["latitude"], -6.2);
    assert_eq!(store.inner.sample_count(), 1);
}
