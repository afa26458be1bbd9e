use actix_web::web::{Data, Json, Path, Query, ServiceConfig};
use actix_web::{HttpResponse, get, post};
use serde::Deserialize;
use uppe_core::Orchestrator;
use uppe_core::incident::IncidentFilter;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(list_incidents)
        .service(get_incident)
        .service(acknowledge_incident)
        .service(investigate_incident)
        .service(resolve_incident)
        .service(escalate_incident)
        .service(add_note);
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

/// `?active=true`, `?status=acknowledged`, `?severity=critical`, `?monitor_id=...`
#[get("/incidents")]
pub async fn list_incidents(orchestrator: Data<Orchestrator>, filter: Query<IncidentFilter>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.incidents(&filter).await?))
}

#[get("/incidents/{id}")]
pub async fn get_incident(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.incident(id.into_inner()).await?))
}

#[post("/incidents/{id}/acknowledge")]
pub async fn acknowledge_incident(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.acknowledge_incident(id.into_inner()).await?))
}

#[post("/incidents/{id}/investigate")]
pub async fn investigate_incident(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.investigate_incident(id.into_inner()).await?))
}

#[post("/incidents/{id}/resolve")]
pub async fn resolve_incident(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.resolve_incident(id.into_inner()).await?))
}

#[post("/incidents/{id}/escalate")]
pub async fn escalate_incident(
    orchestrator: Data<Orchestrator>,
    id: Path<Uuid>,
    body: Json<EscalateRequest>,
) -> ApiResult<HttpResponse> {
    let to = body.to.trim();
    if to.is_empty() {
        return Err(ApiError::BadRequest("escalation target is empty".into()));
    }
    Ok(HttpResponse::Ok().json(orchestrator.escalate_incident(id.into_inner(), to).await?))
}

#[post("/incidents/{id}/notes")]
pub async fn add_note(
    orchestrator: Data<Orchestrator>,
    id: Path<Uuid>,
    body: Json<NoteRequest>,
) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.add_incident_note(id.into_inner(), &body.note).await?))
}
