use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::errors::CoreError;
use crate::geoip::GeoIpEnricher;
use crate::scoring::{Ensemble, ModelBundle};
use crate::store::EventStore;

/// Process-lifetime shared state injected into every handler via
/// `web::Data<AppState>`. Constructed exactly once in `main`, never
/// reconstructed per-request.
pub struct AppState {
    pub geoip: GeoIpEnricher,
    pub ensemble: Ensemble,
    pub store: EventStore,
    /// Fed by every successful insert; SSE subscribers drain it and fall
    /// back to polling `since()` for anything missed (lagged receivers).
    pub live_events: broadcast::Sender<i64>,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Arc<Self>, CoreError> {
        let geoip = GeoIpEnricher::new(config.geoip_lookup_url.clone(), config.geoip_timeout);
        let bundle = ModelBundle::load(Path::new(&config.model_bundle_dir));
        let ensemble = Ensemble::new(bundle);
        let store = EventStore::open(&config.database_path)?;
        let (live_events, _rx) = broadcast::channel(1024);

        Ok(Arc::new(Self {
            geoip,
            ensemble,
            store,
            live_events,
        }))
    }
}
