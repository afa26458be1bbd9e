use actix_web::web::{Data, Json, Path, ServiceConfig};
use actix_web::{HttpResponse, delete, get, post};
use serde::Deserialize;
use uppe_core::Orchestrator;
use uppe_core::model::{NotificationProvider, ProviderConfig};
use uuid::Uuid;

use crate::error::ApiResult;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(list_providers).service(create_provider).service(delete_provider).service(test_provider);
}

#[derive(Debug, Deserialize)]
pub struct ProviderRequest {
    pub name: String,
    pub config: ProviderConfig,
    #[serde(default)]
    pub is_default: bool,
}

#[get("/providers")]
pub async fn list_providers(orchestrator: Data<Orchestrator>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.providers().await?))
}

#[post("/providers")]
pub async fn create_provider(orchestrator: Data<Orchestrator>, body: Json<ProviderRequest>) -> ApiResult<HttpResponse> {
    let ProviderRequest { name, config, is_default } = body.into_inner();
    let mut provider = NotificationProvider::new(name, config);
    provider.is_default = is_default;
    orchestrator.save_provider(&provider).await?;
    Ok(HttpResponse::Created().json(provider))
}

#[delete("/providers/{id}")]
pub async fn delete_provider(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    if orchestrator.delete_provider(id.into_inner()).await? {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(HttpResponse::NotFound().finish())
    }
}

/// Send one test alert; the outcome is also stored on the provider
#[post("/providers/{id}/test")]
pub async fn test_provider(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.test_provider(id.into_inner()).await?))
}
