use actix_web::{HttpResponse, Responder, Scope, get, web};
use bustrack_common::now_millis;
use bustrack_core::{Role, SessionInfo};
use serde::Serialize;

use crate::model::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub store: ComponentStatus,
    pub sessions: SessionCounts,
    pub cached_buses: usize,
    pub uptime_ms: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub status: String,
    pub storage_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionCounts {
    pub producers: usize,
    pub consumers: usize,
}

impl ComponentStatus {
    pub fn up(storage_mode: String) -> Self {
        Self {
            status: "UP".to_string(),
            storage_mode,
            message: None,
        }
    }

    pub fn down(storage_mode: String, message: String) -> Self {
        Self {
            status: "DOWN".to_string(),
            storage_mode,
            message: Some(message),
        }
    }
}

#[get("")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let store = data.hub.store();
    let storage_mode = store.storage_mode().to_string();

    let store_status = match store.health_check().await {
        Ok(()) => ComponentStatus::up(storage_mode),
        Err(e) => ComponentStatus::down(storage_mode, format!("{:#}", e)),
    };

    let registry = data.hub.registry();
    let up = store_status.status == "UP";
    let health_status = HealthStatus {
        status: if up { "UP" } else { "DOWN" }.to_string(),
        store: store_status,
        sessions: SessionCounts {
            producers: registry.count_by_role(Role::Producer),
            consumers: registry.count_by_role(Role::Consumer),
        },
        cached_buses: data.hub.cache().len(),
        uptime_ms: now_millis() - data.started_at,
    };

    if up {
        HttpResponse::Ok().json(health_status)
    } else {
        HttpResponse::ServiceUnavailable().json(health_status)
    }
}

#[get("/liveness")]
async fn liveness() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "UP" }))
}

/// Open sessions on this node, oldest first
#[get("/sessions")]
async fn sessions(data: web::Data<AppState>) -> web::Json<Vec<SessionInfo>> {
    web::Json(data.hub.registry().sessions())
}

pub fn routes() -> Scope {
    web::scope("/health")
        .service(health_check)
        .service(liveness)
        .service(sessions)
}
