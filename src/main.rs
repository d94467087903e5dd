use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use log::info;

use honeypot_telemetry_core::api;
use honeypot_telemetry_core::{AppState, Config};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();
    let app_state = AppState::new(&config).map_err(|e| std::io::Error::other(e.to_string()))?;

    info!("Honeypot telemetry core listening on {}", config.listen_addr);
    info!("model bundle dir: {}", config.model_bundle_dir);
    info!("database: {}", config.database_path);

    let listen_addr = config.listen_addr.clone();

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(api::configure)
    })
    .bind(&listen_addr)?
    .run()
    .await
}
