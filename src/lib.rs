// ==========================================
// HONEYPOT TELEMETRY CORE - ENTRY POINT
// ==========================================

pub mod api;
pub mod config;
pub mod errors;
pub mod geoip;
pub mod hash;
pub mod models;
pub mod scoring;
pub mod state;
pub mod store;

pub use config::Config;
pub use errors::CoreError;
pub use models::{AttackType, DarknetTrafficType, Event, GeoAttribution, IngestEvent, RiskLevel};
pub use state::AppState;
