use actix_web::web::{Data, Path, Query, ServiceConfig};
use actix_web::{HttpResponse, get};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uppe_core::Orchestrator;
use uuid::Uuid;

use crate::error::ApiResult;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(on_call);
}

#[derive(Debug, Deserialize)]
pub struct AtQuery {
    pub at: Option<DateTime<Utc>>,
}

/// Who is on call at `?at=` (default now) and who takes over next
#[get("/oncall/{schedule_id}")]
pub async fn on_call(
    orchestrator: Data<Orchestrator>,
    schedule_id: Path<Uuid>,
    query: Query<AtQuery>,
) -> ApiResult<HttpResponse> {
    let schedule_id = schedule_id.into_inner();
    let at = query.at.unwrap_or_else(Utc::now);
    let current = orchestrator.on_call(schedule_id, at).await?;
    let next = orchestrator.next_on_call(schedule_id, at).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "at": at,
        "current": current,
        "next": next,
    })))
}
