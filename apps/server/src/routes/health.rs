use actix_web::web::{Data, ServiceConfig};
use actix_web::{HttpResponse, Responder, get};
use serde_json::json;
use uppe_core::Orchestrator;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(health_route);
}

/// Health check route
/// Always 200 while the process serves requests; storage trouble shows in the body.
#[get("/health")]
pub async fn health_route(orchestrator: Data<Orchestrator>) -> impl Responder {
    let degraded = orchestrator.storage_degraded();
    HttpResponse::Ok().json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "storage_degraded": degraded,
        "unpersisted": orchestrator.unpersisted_count().await,
    }))
}
