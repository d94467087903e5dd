use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;
use crate::store::LogFilter;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;
const ALERTS_THRESHOLD_FLOOR: f64 = 0.30;

fn clamp_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct LiveParams {
    pub limit: Option<i64>,
    pub source_ip: Option<String>,
    pub min_score: Option<f64>,
}

/// `GET /api/v1/live` — recent events with classification, newest-first.
/// Never 5xxs on a reachable store: an internal fault degrades to an
/// empty-structure response with a non-fatal `error` field.
pub async fn live(state: web::Data<Arc<AppState>>, params: web::Query<LiveParams>) -> HttpResponse {
    let limit = clamp_limit(params.limit);
    let filter = LogFilter {
        source_ip: params.source_ip.clone(),
        ..Default::default()
    };

    match state.store.query_logs(&filter, limit, 0) {
        Ok(mut events) => {
            if let Some(min_score) = params.min_score {
                events.retain(|e| e.ml_score >= min_score);
            }
            HttpResponse::Ok().json(json!({ "status": "success", "logs": events, "count": events.len() }))
        }
        Err(e) => degraded(&e.to_string(), json!({ "logs": [], "count": 0 })),
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertsParams {
    pub threshold: Option<f64>,
    pub limit: Option<i64>,
}

/// `GET /api/v1/alerts` — events at or above a risk threshold; a
/// requested threshold under 0.30 is silently raised to prevent an
/// "alert on everything" query from exhausting the API.
pub async fn alerts(state: web::Data<Arc<AppState>>, params: web::Query<AlertsParams>) -> HttpResponse {
    let threshold = params.threshold.unwrap_or(ALERTS_THRESHOLD_FLOOR).max(ALERTS_THRESHOLD_FLOOR);
    let limit = clamp_limit(params.limit);

    match state.store.top_by_score(threshold, limit) {
        Ok(events) => HttpResponse::Ok().json(json!({
            "status": "success",
            "threshold": threshold,
            "alerts": events,
            "count": events.len(),
        })),
        Err(e) => degraded(&e.to_string(), json!({ "alerts": [], "count": 0 })),
    }
}

/// `GET /api/v1/analytics` (aliased `/stats`) — totals, top-N, and the
/// 24h hourly score trend.
pub async fn analytics(state: web::Data<Arc<AppState>>) -> HttpResponse {
    match state.store.aggregate() {
        Ok(agg) => HttpResponse::Ok().json(json!({ "status": "success", "statistics": agg })),
        Err(e) => degraded(&e.to_string(), json!({ "statistics": {} })),
    }
}

/// `GET /api/v1/map` — geo-aggregated attack points and country totals.
pub async fn map(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let points = state.store.geo_points(500);
    let countries = state.store.aggregate().map(|a| a.top_countries);

    match (points, countries) {
        (Ok(points), Ok(countries)) => {
            let attack_points: Vec<_> = points
                .iter()
                .map(|e| {
                    json!({
                        "source_ip": e.source_ip,
                        "latitude": e.geo_latitude,
                        "longitude": e.geo_longitude,
                        "country": e.geo_country,
                        "ml_score": e.ml_score,
                        "risk_level": e.ml_risk_level.to_string(),
                    })
                })
                .collect();
            HttpResponse::Ok().json(json!({
                "status": "success",
                "attack_points": attack_points,
                "country_totals": countries,
            }))
        }
        (points, countries) => {
            let msg = points.err().or(countries.err()).map(|e| e.to_string()).unwrap_or_default();
            degraded(&msg, json!({ "attack_points": [], "country_totals": [] }))
        }
    }
}

/// `GET /api/v1/ml_insights` — score averages, high-score sources, risk
/// and darknet-traffic-type distributions, and loaded model metadata.
pub async fn ml_insights(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let agg = state.store.aggregate();
    let darknet = state.store.darknet_distribution();
    let high_score = state.store.top_by_score(0.70, 20);

    match (agg, darknet, high_score) {
        (Ok(agg), Ok(darknet), Ok(high_score)) => HttpResponse::Ok().json(json!({
            "status": "success",
            "avg_ml_score": agg.avg_ml_score,
            "risk_distribution": agg.risk_distribution,
            "darknet_distribution": darknet,
            "high_score_sources": high_score,
            "models": state.ensemble.model_metadata(),
        })),
        (agg, darknet, high_score) => {
            let msg = agg.err().or(darknet.err()).or(high_score.err()).map(|e| e.to_string()).unwrap_or_default();
            degraded(
                &msg,
                json!({ "risk_distribution": [], "darknet_distribution": [], "high_score_sources": [] }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InvestigateParams {
    pub source_ip: String,
}

/// `GET /api/v1/investigate` — deep view for one source address.
pub async fn investigate(state: web::Data<Arc<AppState>>, params: web::Query<InvestigateParams>) -> HttpResponse {
    match state.store.by_source(&params.source_ip) {
        Ok(summary) => HttpResponse::Ok().json(json!({ "status": "success", "investigation": summary })),
        Err(e) => degraded(&e.to_string(), json!({ "investigation": null })),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    pub source_ip: Option<String>,
    pub action: Option<String>,
    pub target_service: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /logs` — kept as an alias of the original service's endpoint.
pub async fn logs(state: web::Data<Arc<AppState>>, params: web::Query<LogsParams>) -> HttpResponse {
    let limit = clamp_limit(params.limit);
    let offset = params.offset.unwrap_or(0).max(0);
    let filter = LogFilter {
        source_ip: params.source_ip.clone(),
        action: params.action.clone(),
        target_service: params.target_service.clone(),
    };

    match state.store.query_logs(&filter, limit, offset) {
        Ok(events) => HttpResponse::Ok().json(json!({
            "status": "success",
            "logs": events,
            "count": events.len(),
            "limit": limit,
            "offset": offset,
        })),
        Err(e) => degraded(&e.to_string(), json!({ "logs": [], "count": 0 })),
    }
}

/// `GET /health` — database connectivity plus row count.
pub async fn health(state: web::Data<Arc<AppState>>) -> HttpResponse {
    match state.store.row_count() {
        Ok(total_logs) => HttpResponse::Ok().json(json!({
            "status": "healthy",
            "service": "Honeypot Telemetry Core",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "database": "connected",
            "total_logs": total_logs,
        })),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "status": "unhealthy",
            "error": e.to_string(),
        })),
    }
}

/// `GET /` — endpoint discovery document.
pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "Honeypot Telemetry Core",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "log_ingestion": "POST /api/v1/log",
            "live_feed": "GET /api/v1/live",
            "stream": "GET /api/v1/stream",
            "alerts": "GET /api/v1/alerts",
            "analytics": "GET /api/v1/analytics",
            "map": "GET /api/v1/map",
            "ml_insights": "GET /api/v1/ml_insights",
            "investigate": "GET /api/v1/investigate",
            "log_retrieval": "GET /logs",
            "statistics": "GET /stats",
            "health_check": "GET /health",
        },
        "query_parameters": {
            "logs": {
                "source_ip": "Filter by source IP address",
                "action": "Filter by action type",
                "target_service": "Filter by target service",
                "limit": "Number of logs to return (default: 100)",
                "offset": "Number of logs to skip (default: 0)",
            }
        },
        "note": "This is a centralized ingestion and scoring service for honeypot events",
    }))
}

/// Catch-all for unmatched routes, mirroring the original service's JSON
/// 404 rather than actix's default plain-text body.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": "Endpoint not found" }))
}

/// Dashboard endpoints never surface a 5xx when the store is reachable at
/// all: an internal fault returns 200 with the caller's empty-structure
/// default plus a non-fatal `error` field, so the dashboard keeps
/// rendering instead of showing a broken widget.
fn degraded(error: &str, mut defaults: serde_json::Value) -> HttpResponse {
    if let Some(obj) = defaults.as_object_mut() {
        obj.insert("status".to_string(), json!("degraded"));
        obj.insert("error".to_string(), json!(error));
    }
    HttpResponse::Ok().json(defaults)
}
