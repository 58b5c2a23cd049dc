// HTTP surface tests: health endpoints and the stream upgrade route.

use std::sync::Arc;

use actix_web::{App, http::StatusCode, test, web};
use bustrack_auth::DisabledAuthGate;
use bustrack_common::Bus;
use bustrack_core::{BusFilter, ConsumerHandshake, DistributionHub};
use bustrack_persistence::MemoryLocationStore;
use bustrack_server::{AppState, Configuration, api::route::routes};

fn app_state() -> Arc<AppState> {
    let store = MemoryLocationStore::with_buses([Bus {
        id: 1,
        username: "B1".to_string(),
        plate_number: "B 1001 XY".to_string(),
        route: Some("Blok M - Kota".to_string()),
        active: true,
    }]);
    let hub = DistributionHub::builder(Arc::new(store), Arc::new(DisabledAuthGate)).build();

    Arc::new(AppState::new(Configuration::default(), hub))
}

#[actix_web::test]
async fn test_health_reports_store_and_sessions() {
    let state = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(routes),
    )
    .await;

    let _consumer = state
        .hub
        .connect_consumer(ConsumerHandshake::new(BusFilter::All));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "UP");
    assert_eq!(body["store"]["status"], "UP");
    assert_eq!(body["store"]["storageMode"], "memory");
    assert_eq!(body["sessions"]["producers"], 0);
    assert_eq!(body["sessions"]["consumers"], 1);
    assert_eq!(body["cachedBuses"], 0);
}

#[actix_web::test]
async fn test_liveness() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(app_state()))
            .configure(routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/health/liveness").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "UP");
}

#[actix_web::test]
async fn test_sessions_listing_tracks_open_sessions() {
    let state = app_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(routes),
    )
    .await;

    let consumer = state
        .hub
        .connect_consumer(ConsumerHandshake::new(BusFilter::All));

    let req = test::TestRequest::get().uri("/health/sessions").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let sessions = body.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["role"], "consumer");
    assert_eq!(sessions[0]["sessionId"], consumer.session_id());

    drop(consumer);

    let req = test::TestRequest::get().uri("/health/sessions").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn test_stream_requires_websocket_upgrade() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(app_state()))
            .configure(routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/bus/stream?type=client")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_client_error());
}

#[actix_web::test]
async fn test_stream_upgrades_websocket_request() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(app_state()))
            .configure(routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/bus/stream?type=client&busId=1")
        .insert_header(("upgrade", "websocket"))
        .insert_header(("connection", "upgrade"))
        .insert_header(("sec-websocket-version", "13"))
        .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
}
