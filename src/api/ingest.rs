use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use serde_json::json;

use crate::errors::CoreError;
use crate::hash::canonical_hash;
use crate::models::{Event, IngestEvent};
use crate::state::AppState;

/// `POST /api/v1/log` (aliased at `/log`). Validates, enriches, scores,
/// hashes, and persists a single honeypot event, then publishes its row id
/// on the live-events channel. Only validation, duplicate, and store
/// errors are surfaced to the caller — enrichment and scoring degrade
/// silently so the honeypot keeps recording under partial outage.
pub async fn ingest(state: web::Data<Arc<AppState>>, body: web::Json<IngestEvent>) -> Result<HttpResponse, CoreError> {
    let ingested = body.into_inner();

    if ingested.source_ip.trim().is_empty() {
        return Err(CoreError::Validation("source_ip must not be empty".to_string()));
    }
    if ingested.action.trim().is_empty() {
        return Err(CoreError::Validation("action must not be empty".to_string()));
    }
    if ingested.target_service.trim().is_empty() {
        return Err(CoreError::Validation("target_service must not be empty".to_string()));
    }
    if ingested.session_id.trim().is_empty() {
        return Err(CoreError::Validation("session_id must not be empty".to_string()));
    }

    let timestamp = ingested
        .timestamp
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| Utc::now().to_rfc3339());
    let protocol = ingested.protocol.clone().unwrap_or_else(|| "HTTP".to_string());
    let user_agent = ingested.user_agent.clone().unwrap_or_else(|| "Unknown".to_string());
    let headers = ingested.headers.clone().unwrap_or_else(|| json!({}));
    let payload = ingested.payload.clone().unwrap_or_else(|| json!({}));

    info!("received event: action={} source_ip={}", ingested.action, ingested.source_ip);

    let geo = state.geoip.enrich(&ingested.source_ip).await;
    info!("enriched event: source_ip={} country={}", ingested.source_ip, geo.country);

    // The hash covers exactly the fields known at this point in the
    // pipeline (pre-scoring): recomputing it later must omit ml_score,
    // ml_risk_level, is_anomaly, predicted_attack_type, darknet_traffic_type
    // as well as log_hash/id/created_at, since those are assigned after
    // this point.
    let hashable = json!({
        "timestamp": timestamp,
        "source_ip": ingested.source_ip,
        "protocol": protocol,
        "target_service": ingested.target_service,
        "action": ingested.action,
        "target_file": ingested.target_file,
        "headers": headers,
        "payload": payload,
        "session_id": ingested.session_id,
        "user_agent": user_agent,
        "geo_country": geo.country,
        "geo_city": geo.city,
        "geo_region": geo.region,
        "geo_latitude": geo.latitude,
        "geo_longitude": geo.longitude,
        "geo_timezone": geo.timezone,
        "geo_isp": geo.isp,
        "geo_org": geo.org,
    });
    let log_hash = canonical_hash(&hashable);

    let scoring = state.ensemble.predict(&IngestEvent {
        timestamp: Some(timestamp.clone()),
        source_ip: ingested.source_ip.clone(),
        protocol: Some(protocol.clone()),
        target_service: ingested.target_service.clone(),
        action: ingested.action.clone(),
        target_file: ingested.target_file.clone(),
        payload: Some(payload.clone()),
        headers: Some(headers.clone()),
        session_id: ingested.session_id.clone(),
        user_agent: Some(user_agent.clone()),
    });
    info!(
        "scored event: source_ip={} score={:.4} risk={} attack_type={}",
        ingested.source_ip, scoring.score, scoring.risk_level, scoring.predicted_attack_type
    );

    let event = Event {
        id: 0,
        created_at: Utc::now(),
        timestamp,
        source_ip: ingested.source_ip,
        protocol,
        target_service: ingested.target_service,
        action: ingested.action,
        target_file: ingested.target_file,
        payload,
        headers,
        session_id: ingested.session_id,
        user_agent,
        geo_country: geo.country,
        geo_city: geo.city,
        geo_region: geo.region,
        geo_latitude: geo.latitude,
        geo_longitude: geo.longitude,
        geo_timezone: geo.timezone,
        geo_isp: geo.isp,
        geo_org: geo.org,
        log_hash,
        ml_score: scoring.score,
        ml_risk_level: scoring.risk_level,
        is_anomaly: scoring.is_anomaly,
        predicted_attack_type: scoring.predicted_attack_type,
        darknet_traffic_type: scoring.darknet_traffic_type,
    };

    let id = state.store.insert(&event)?;
    info!("stored event: id={} source_ip={}", id, event.source_ip);

    // A full subscriber channel just means the slowest dashboard client
    // missed a live push; it resyncs on its next since() poll.
    let _ = state.live_events.send(id);

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Log received and stored",
        "log_id": event.log_hash,
        "ml_prediction": {
            "ml_score": event.ml_score,
            "ml_risk_level": event.ml_risk_level.to_string(),
            "is_anomaly": event.is_anomaly,
            "predicted_attack_type": event.predicted_attack_type.to_string(),
        }
    })))
}
