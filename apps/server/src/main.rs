#![warn(clippy::all, clippy::pedantic)]

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use dotenvy::dotenv;
use tracing::info;
use uppe_core::storage::LibsqlStorage;
use uppe_core::{Config, Orchestrator};

mod error;
mod routes;

use error::AppError;
use logger::init_tracing;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_config(env::var_os("UPPE_CONFIG"))?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let storage = LibsqlStorage::open(&config.database.path, config.database.pool_size).await?;
    let orchestrator = Orchestrator::builder(config).storage(Arc::new(storage)).build()?;
    orchestrator.start().await?;

    let result = run_server(addr, orchestrator.clone()).await;
    orchestrator.shutdown().await;
    result
}

async fn run_server(addr: SocketAddr, orchestrator: Orchestrator) -> Result<(), AppError> {
    info!("Listening on {}", addr);
    let orchestrator = Data::new(orchestrator);
    HttpServer::new(move || {
        App::new()
            .app_data(orchestrator.clone())
            .wrap(Logger::default())
            .configure(routes::routes)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
