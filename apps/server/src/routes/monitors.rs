use actix_web::web::{Data, Json, Path, ServiceConfig};
use actix_web::{HttpResponse, delete, get, post, put};
use serde::Deserialize;
use uppe_core::Orchestrator;
use uppe_core::model::{Monitor, MonitorTarget, Severity};
use uuid::Uuid;

use crate::error::ApiResult;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(list_monitors)
        .service(get_monitor)
        .service(create_monitor)
        .service(update_monitor)
        .service(pause_monitor)
        .service(resume_monitor)
        .service(check_monitor)
        .service(delete_monitor);
}

/// Monitor definition as accepted from operators
///
/// Unset timing fields keep the defaults of [`Monitor::new`] on create and the
/// stored values on update.
#[derive(Debug, Deserialize)]
pub struct MonitorRequest {
    pub name: String,
    pub target: MonitorTarget,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_interval_secs: Option<u64>,
    #[serde(default)]
    pub upside_down: bool,
    #[serde(default)]
    pub public_facing: bool,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub tags: Vec<Uuid>,
    #[serde(default)]
    pub maintenance_window_ids: Vec<Uuid>,
    #[serde(default)]
    pub notification_provider_ids: Vec<Uuid>,
    pub oncall_schedule_id: Option<Uuid>,
}

impl MonitorRequest {
    pub fn apply(self, monitor: &mut Monitor) {
        monitor.name = self.name;
        monitor.target = self.target;
        monitor.interval_secs = self.interval_secs.unwrap_or(monitor.interval_secs);
        monitor.timeout_secs = self.timeout_secs.unwrap_or(monitor.timeout_secs);
        monitor.max_retries = self.max_retries.unwrap_or(monitor.max_retries);
        monitor.retry_interval_secs = self.retry_interval_secs.unwrap_or(monitor.retry_interval_secs);
        monitor.upside_down = self.upside_down;
        monitor.public_facing = self.public_facing;
        monitor.severity = self.severity;
        monitor.tags = self.tags;
        monitor.maintenance_window_ids = self.maintenance_window_ids;
        monitor.notification_provider_ids = self.notification_provider_ids;
        monitor.oncall_schedule_id = self.oncall_schedule_id;
    }
}

/// Current state of every monitor
#[get("/monitors")]
pub async fn list_monitors(orchestrator: Data<Orchestrator>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.monitor_states().await?))
}

#[get("/monitors/{id}")]
pub async fn get_monitor(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    let id = id.into_inner();
    let monitor = orchestrator.monitor(id).await?;
    let state = orchestrator.monitor_state(id).await?;
    let uptime = orchestrator.uptime(id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "monitor": monitor,
        "state": state,
        "uptime": uptime,
    })))
}

#[post("/monitors")]
pub async fn create_monitor(orchestrator: Data<Orchestrator>, body: Json<MonitorRequest>) -> ApiResult<HttpResponse> {
    let request = body.into_inner();
    let mut monitor = Monitor::new(request.name.clone(), request.target.clone());
    request.apply(&mut monitor);
    Ok(HttpResponse::Created().json(orchestrator.create_monitor(monitor).await?))
}

#[put("/monitors/{id}")]
pub async fn update_monitor(
    orchestrator: Data<Orchestrator>,
    id: Path<Uuid>,
    body: Json<MonitorRequest>,
) -> ApiResult<HttpResponse> {
    let mut monitor = orchestrator.monitor(id.into_inner()).await?;
    body.into_inner().apply(&mut monitor);
    Ok(HttpResponse::Ok().json(orchestrator.update_monitor(monitor).await?))
}

#[post("/monitors/{id}/pause")]
pub async fn pause_monitor(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.pause_monitor(id.into_inner()).await?))
}

#[post("/monitors/{id}/resume")]
pub async fn resume_monitor(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.resume_monitor(id.into_inner()).await?))
}

/// Run a check outside the schedule
#[post("/monitors/{id}/check")]
pub async fn check_monitor(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    if orchestrator.check_now(id.into_inner()).await? {
        Ok(HttpResponse::Accepted().finish())
    } else {
        Ok(HttpResponse::Conflict().json(serde_json::json!({ "error": "monitor is not scheduled" })))
    }
}

#[delete("/monitors/{id}")]
pub async fn delete_monitor(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    let removal = orchestrator.delete_monitor(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "result": removal })))
}
