use std::convert::Infallible;

use actix_web::web::{Bytes, Data, ServiceConfig};
use actix_web::{HttpResponse, get};
use futures::stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uppe_core::{MonitorEvent, Orchestrator};

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.service(event_stream);
}

/// One server-sent event frame
pub fn sse_frame(event: &MonitorEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(data) => Bytes::from(format!("event: {}\ndata: {}\n\n", event.name(), data)),
        Err(e) => {
            warn!(event = event.name(), "Failed to serialize event: {}", e);
            Bytes::from_static(b": unserializable event\n\n")
        }
    }
}

/// Live monitor and incident events as `text/event-stream`
///
/// A client that falls behind gets a `lagged` comment and continues with the
/// newest events.
#[get("/events")]
pub async fn event_stream(orchestrator: Data<Orchestrator>) -> HttpResponse {
    let rx = orchestrator.subscribe();
    debug!("Event stream subscriber connected");

    let body = stream::unfold(rx, |mut rx| async move {
        let frame = match rx.recv().await {
            Ok(event) => sse_frame(&event),
            Err(RecvError::Lagged(skipped)) => Bytes::from(format!(": lagged {skipped}\n\n")),
            Err(RecvError::Closed) => return None,
        };
        Some((Ok::<_, Infallible>(frame), rx))
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body)
}
