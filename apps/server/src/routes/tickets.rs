use actix_web::web::{Data, Json, Path, ServiceConfig};
use actix_web::{HttpResponse, get, post};
use serde::Deserialize;
use serde_json::json;
use uppe_core::Orchestrator;
use uppe_core::model::{Recommendation, Ticket};

use crate::error::{ApiError, ApiResult};

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(evaluate_ticket)
        .service(submit_recommendation)
        .service(list_recommendations)
        .service(execute_recommendation)
        .service(cancel_recommendation);
}

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    pub ticket: Ticket,
    pub recommendation: Recommendation,
}

/// Run the workflow rules against a ticket pushed by the ITSM
#[post("/tickets/evaluate")]
pub async fn evaluate_ticket(orchestrator: Data<Orchestrator>, ticket: Json<Ticket>) -> ApiResult<HttpResponse> {
    let applied = orchestrator.evaluate_ticket(&ticket).await?;
    Ok(HttpResponse::Ok().json(json!({ "ticket_id": ticket.id, "applied": applied })))
}

#[post("/recommendations")]
pub async fn submit_recommendation(
    orchestrator: Data<Orchestrator>,
    body: Json<RecommendationRequest>,
) -> ApiResult<HttpResponse> {
    let RecommendationRequest { ticket, recommendation } = body.into_inner();
    if !(0.0..=1.0).contains(&recommendation.confidence) {
        return Err(ApiError::BadRequest(format!("confidence {} is outside [0, 1]", recommendation.confidence)));
    }
    let ticket_id = ticket.id.clone();
    let mode = orchestrator.submit_recommendation(ticket, recommendation);
    Ok(HttpResponse::Accepted().json(json!({ "ticket_id": ticket_id, "execution": mode })))
}

#[get("/recommendations")]
pub async fn list_recommendations(orchestrator: Data<Orchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(orchestrator.pending_recommendations())
}

#[post("/recommendations/{ticket_id}/execute")]
pub async fn execute_recommendation(orchestrator: Data<Orchestrator>, ticket_id: Path<String>) -> ApiResult<HttpResponse> {
    let applied = orchestrator.execute_recommendation(&ticket_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "ticket_id": *ticket_id, "applied": applied })))
}

#[post("/recommendations/{ticket_id}/cancel")]
pub async fn cancel_recommendation(orchestrator: Data<Orchestrator>, ticket_id: Path<String>) -> HttpResponse {
    if orchestrator.cancel_recommendation(&ticket_id) {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().json(json!({ "error": format!("No pending recommendation for ticket {}", *ticket_id) }))
    }
}
