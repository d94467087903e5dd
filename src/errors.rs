use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy for the ingestion endpoint. Only `Validation`,
/// `Duplicate`, and `StoreIo` ever reach the producer as a non-2xx
/// response; enrichment and model failures are absorbed upstream and never
/// constructed here (the honeypot should keep recording even when scoring
/// or enrichment is degraded).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("duplicate event")]
    Duplicate,
    #[error("store io error: {0}")]
    StoreIo(String),
}

impl ResponseError for CoreError {
    fn error_response(&self) -> HttpResponse {
        match self {
            CoreError::Validation(msg) => {
                HttpResponse::BadRequest().json(json!({ "error": msg }))
            }
            CoreError::Duplicate => {
                HttpResponse::Conflict().json(json!({ "error": "duplicate_event" }))
            }
            CoreError::StoreIo(msg) => {
                HttpResponse::InternalServerError().json(json!({ "error": msg }))
            }
        }
    }
}
