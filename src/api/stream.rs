use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const BACKLOG_LIMIT: i64 = 50;

struct StreamCursor {
    state: web::Data<Arc<AppState>>,
    rx: broadcast::Receiver<i64>,
    last_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Watermark a reconnecting client already has; defaults to "now" (the
    /// current row count) for a first-time subscriber with no backlog to
    /// catch up on.
    pub last_id: Option<i64>,
}

/// `GET /api/v1/stream` — server-sent events, newest honeypot activity
/// first. Each tick either wakes early off the broadcast channel fed by
/// `ingest`, or times out after `POLL_INTERVAL`; either way it then polls
/// `since()`, so a dashboard reconnecting after a gap sees everything it
/// missed instead of only what arrives after it reconnects.
pub async fn stream(state: web::Data<Arc<AppState>>, params: web::Query<StreamParams>) -> HttpResponse {
    let rx = state.live_events.subscribe();
    let last_id = params.last_id.unwrap_or_else(|| state.store.row_count().unwrap_or(0));
    let cursor = StreamCursor { state, rx, last_id };

    let body = stream::unfold(cursor, |mut cursor| async move {
        loop {
            tokio::select! {
                _ = sleep(POLL_INTERVAL) => {}
                _ = cursor.rx.recv() => {}
            }

            match cursor.state.store.since(cursor.last_id, BACKLOG_LIMIT) {
                Ok(events) if !events.is_empty() => {
                    cursor.last_id = events.last().map(|e| e.id).unwrap_or(cursor.last_id);
                    let frames: String = events
                        .iter()
                        .map(|e| {
                            let frame = json!({
                                "id": e.id,
                                "timestamp": e.timestamp,
                                "source_ip": e.source_ip,
                                "country": e.geo_country,
                                "action": e.action,
                                "service": e.target_service,
                                "ml_score": e.ml_score,
                                "risk_level": e.ml_risk_level.to_string(),
                                "is_anomaly": e.is_anomaly,
                            });
                            format!("data: {}\n\n", frame)
                        })
                        .collect();
                    return Some((Ok::<_, actix_web::Error>(web::Bytes::from(frames)), cursor));
                }
                Ok(_) => continue,
                Err(_) => return Some((Ok::<_, actix_web::Error>(web::Bytes::from(": keep-alive\n\n")), cursor)),
            }
        }
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("X-Accel-Buffering", "no"))
        .streaming(body)
}
