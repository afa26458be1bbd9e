use actix_web::web::ServiceConfig;

mod events;
mod health;
mod incidents;
mod maintenance;
mod monitors;
mod oncall;
mod providers;
mod tags;
mod tickets;

/// Register every route on the app
pub fn routes(cfg: &mut ServiceConfig) {
    cfg.configure(health::routes)
        .configure(monitors::routes)
        .configure(incidents::routes)
        .configure(providers::routes)
        .configure(oncall::routes)
        .configure(tickets::routes)
        .configure(maintenance::routes)
        .configure(tags::routes)
        .configure(events::routes);
}
