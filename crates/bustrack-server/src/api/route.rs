use actix_web::web;

use super::{health, stream};

/// Register every endpoint of the server
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(stream::routes()).service(health::routes());
}
