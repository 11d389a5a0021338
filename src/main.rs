use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};

use clinicflow::{
    config::{AppConfig, StoreBackend},
    routes, seed,
    state::AppState,
    store::{memory::MemoryStore, sqlite::SqliteStore, Store},
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Sqlite => {
            log::info!("Opening SQLite store at {}", config.database_url);
            Arc::new(SqliteStore::connect(&config.database_url, config.max_connections).await?)
        }
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store. Data will not survive a restart.");
            Arc::new(MemoryStore::new())
        }
    };

    seed::seed_defaults(store.as_ref(), &config.admin, config.seed_catalog).await?;

    let state = AppState::new(store, config.event_buffer);
    let address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting ClinicFlow on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
