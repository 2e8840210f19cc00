use actix_web::{web, HttpResponse, Responder};

use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(welcome)));
    cfg.service(web::resource("/api/health").route(web::get().to(health_check)));
}

async fn welcome() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body("Welcome to the club!")
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let store = match state.db.ready() {
        Ok(()) => "ready",
        Err(e) => {
            log::warn!("Health check: store unavailable: {}", e);
            "unavailable"
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "store": store
    }))
}
