use actix_web::web::{Data, Json, Path, ServiceConfig};
use actix_web::{HttpResponse, delete, get, post};
use serde::Deserialize;
use uppe_core::Orchestrator;
use uppe_core::model::Tag;
use uuid::Uuid;

use crate::error::ApiResult;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(list_tags).service(create_tag).service(delete_tag).service(tagged_monitors);
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub name: String,
    pub color: Option<String>,
}

#[get("/tags")]
pub async fn list_tags(orchestrator: Data<Orchestrator>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.tags().await?))
}

#[post("/tags")]
pub async fn create_tag(orchestrator: Data<Orchestrator>, body: Json<TagRequest>) -> ApiResult<HttpResponse> {
    let TagRequest { name, color } = body.into_inner();
    let mut tag = Tag::new(name);
    tag.color = color;
    orchestrator.save_tag(&tag).await?;
    Ok(HttpResponse::Created().json(tag))
}

#[delete("/tags/{id}")]
pub async fn delete_tag(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    if orchestrator.delete_tag(id.into_inner()).await? {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(HttpResponse::NotFound().finish())
    }
}

#[get("/tags/{id}/monitors")]
pub async fn tagged_monitors(orchestrator: Data<Orchestrator>, id: Path<Uuid>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.monitors_tagged(id.into_inner()).await?))
}
