use actix_cors::Cors;
use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use std::io;
use std::sync::Arc;

mod background;
mod config;
mod controllers;
mod db;
mod models;
mod uploads;

use background::BackgroundTasks;
use config::Config;
use db::Database;
use uploads::AvatarStorage;

pub struct AppState {
    pub db: Arc<Database>,
    pub avatars: Arc<AvatarStorage>,
    /// Avatar removals still running after their request finished
    pub background: BackgroundTasks,
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env().map_err(|e| {
        log::error!("{}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    // The server starts even when the store is unreachable; every store
    // operation retries the connection until it succeeds.
    let db = Arc::new(Database::new(&config.database_url));
    match db.ready() {
        Ok(()) => log::info!("Connected to member store at {}", db.location()),
        Err(e) => log::error!("Error connecting to member store at {}: {}", db.location(), e),
    }

    let avatars = Arc::new(AvatarStorage::new(&config.uploads_dir));
    avatars.ensure_dir().await?;
    log::info!("Storing avatars in {}", avatars.dir().display());

    // Removals run on this runtime so they survive the worker shutdown
    let background = BackgroundTasks::current();

    log::info!(
        "Starting members server on {}:{}",
        config.bind_address,
        config.port
    );

    let uploads_dir = config.uploads_dir.clone();
    let tasks = background.clone();

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                avatars: Arc::clone(&avatars),
                background: tasks.clone(),
            }))
            .app_data(controllers::json_config())
            .app_data(controllers::form_config())
            .wrap(middleware::NormalizePath::trim())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::members::config)
            .service(Files::new("/uploads", uploads_dir.clone()))
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await?;

    if !background.is_empty() {
        log::info!("Waiting for {} avatar removal(s) to finish", background.len());
    }
    background.shutdown().await;
    log::info!("Shutdown complete");

    Ok(())
}
