use actix_web::web::{Data, Json, Path, ServiceConfig};
use actix_web::{HttpResponse, get, post};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uppe_core::Orchestrator;
use uppe_core::model::MaintenanceWindow;
use uuid::Uuid;

use crate::error::ApiResult;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(list_windows).service(schedule_window).service(cancel_window);
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub monitor_ids: Vec<Uuid>,
}

#[get("/maintenance")]
pub async fn list_windows(orchestrator: Data<Orchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(orchestrator.maintenance_windows().await)
}

#[post("/maintenance")]
pub async fn schedule_window(
    orchestrator: Data<Orchestrator>,
    body: Json<MaintenanceRequest>,
) -> ApiResult<HttpResponse> {
    let MaintenanceRequest { title, description, start_time, end_time, monitor_ids } = body.into_inner();
    let mut window = MaintenanceWindow::new(title, start_time, end_time, monitor_ids);
    window.description = description;
    Ok(HttpResponse::Created().json(orchestrator.schedule_maintenance(window).await?))
}

#[post("/maintenance/{id}/cancel")]
pub async fn cancel_window(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.cancel_maintenance(id.into_inner()).await?))
}
