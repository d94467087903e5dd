pub mod ingest;
pub mod query;
pub mod stream;

use actix_web::web;

/// Wires every HTTP endpoint onto an `App`. Called once from `main` via
/// `App::new().configure(api::configure)`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(query::health))
        .route("/", web::get().to(query::index))
        // Kept at top level as aliases of the original service's routes.
        .route("/log", web::post().to(ingest::ingest))
        .route("/logs", web::get().to(query::logs))
        .route("/stats", web::get().to(query::analytics))
        .service(
            web::scope("/api/v1")
                .route("/log", web::post().to(ingest::ingest))
                .route("/logs", web::get().to(query::logs))
                .route("/live", web::get().to(query::live))
                .route("/stream", web::get().to(stream::stream))
                .route("/alerts", web::get().to(query::alerts))
                .route("/analytics", web::get().to(query::analytics))
                .route("/stats", web::get().to(query::analytics))
                .route("/map", web::get().to(query::map))
                .route("/ml_insights", web::get().to(query::ml_insights))
                .route("/investigate", web::get().to(query::investigate)),
        )
        .default_service(web::route().to(query::not_found));
}
