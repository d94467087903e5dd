use std::time::Duration;

/// Process-lifetime configuration, collected once at startup from the
/// environment (`.env` loaded via `dotenv`, then `std::env::var`).
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub database_path: String,
    pub geoip_lookup_url: String,
    pub geoip_timeout: Duration,
    pub model_bundle_dir: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env_or("INGEST_LISTEN_ADDR", "0.0.0.0:3001"),
            database_path: env_or("DATABASE_PATH", "./data/honeypot.db"),
            geoip_lookup_url: env_or("GEOIP_LOOKUP_URL", "https://ipapi.co/{ip}/json/"),
            geoip_timeout: Duration::from_secs(env_or("GEOIP_TIMEOUT_SECS", "10").parse().unwrap_or(10)),
            model_bundle_dir: env_or("MODEL_BUNDLE_DIR", "./data/ml_models"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
