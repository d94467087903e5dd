use std::fs;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use actix_web::{test, web, App};
use serde_json::{json, Value};

use honeypot_telemetry_core::api;
use honeypot_telemetry_core::{AppState, Config};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Writes `best_model_info.json` and `isolationforest_model_info.json` (no
/// darknet file) to a fresh temp dir, matching the ensemble's unit-test
/// `partial_bundle()` fixture — enough to exercise the full weighted
/// ensemble and attack-type rules without the all-missing fallback.
fn partial_model_dir() -> std::path::PathBuf {
    let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("honeypot-core-it-{}-{}", std::process::id(), unique));
    fs::create_dir_all(&dir).unwrap();

    let mut rf = fs::File::create(dir.join("best_model_info.json")).unwrap();
    write!(rf, r#"{{"accuracy": 0.95, "feature_columns": []}}"#).unwrap();

    let mut if_model = fs::File::create(dir.join("isolationforest_model_info.json")).unwrap();
    write!(if_model, r#"{{"accuracy": 0.89, "feature_columns": [], "threshold": null}}"#).unwrap();

    dir
}

fn test_config(model_dir: &std::path::Path) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        database_path: ":memory:".to_string(),
        // Unreachable on purpose: these tests run offline. Every non-private
        // source IP used here either resolves to "Unknown" (acceptable per
        // the stored-event geo invariant) or is never looked up at all.
        geoip_lookup_url: "http://127.0.0.1:1/{ip}".to_string(),
        geoip_timeout: Duration::from_millis(50),
        model_bundle_dir: model_dir.to_string_lossy().to_string(),
    }
}

#[actix_web::test]
async fn env_file_access_scores_high_and_stores_as_data_exfiltration() {
    let model_dir = partial_model_dir();
    let state = AppState::new(&test_config(&model_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/log")
        .set_json(&json!({
            "action": "file_access",
            "target_file": ".env",
            "source_ip": "8.8.8.8",
            "target_service": "Fake Git Repository",
            "session_id": "sess-1",
            "payload": {}
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let prediction = &body["ml_prediction"];
    assert!(prediction["ml_score"].as_f64().unwrap() >= 0.70);
    assert_eq!(prediction["ml_risk_level"], "HIGH");
    assert_eq!(prediction["predicted_attack_type"], "DATA_EXFILTRATION");
    assert_eq!(prediction["is_anomaly"], true);

    let _ = fs::remove_dir_all(&model_dir);
}

#[actix_web::test]
async fn git_push_with_backdoor_commit_message_is_exploit() {
    let model_dir = partial_model_dir();
    let state = AppState::new(&test_config(&model_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/log")
        .set_json(&json!({
            "action": "git_push",
            "source_ip": "203.0.113.10",
            "target_service": "Fake Git Repository",
            "session_id": "sess-2",
            "payload": {"commit_message": "Add malicious backdoor"}
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let prediction = &body["ml_prediction"];
    assert!(prediction["ml_score"].as_f64().unwrap() >= 0.75);
    assert_eq!(prediction["predicted_attack_type"], "EXPLOIT");
    assert_eq!(prediction["ml_risk_level"], "HIGH");

    let _ = fs::remove_dir_all(&model_dir);
}

#[actix_web::test]
async fn ci_credentials_access_is_backdoor() {
    let model_dir = partial_model_dir();
    let state = AppState::new(&test_config(&model_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/log")
        .set_json(&json!({
            "action": "ci_credentials_access",
            "target_file": "ci_credentials",
            "source_ip": "198.51.100.4",
            "target_service": "Fake CI/CD Runner",
            "session_id": "sess-3",
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let prediction = &body["ml_prediction"];
    assert_eq!(prediction["predicted_attack_type"], "BACKDOOR");
    assert_eq!(prediction["ml_risk_level"], "HIGH");

    let _ = fs::remove_dir_all(&model_dir);
}

#[actix_web::test]
async fn private_source_ip_gets_private_geo_and_stays_low_risk() {
    let model_dir = partial_model_dir();
    let state = AppState::new(&test_config(&model_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/log")
        .set_json(&json!({
            "action": "index_access",
            "source_ip": "192.168.1.5",
            "target_service": "Consolidated Honeypot Services",
            "session_id": "sess-4",
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let prediction = &body["ml_prediction"];
    assert!(matches!(prediction["ml_risk_level"].as_str().unwrap(), "MINIMAL" | "LOW"));
    assert_eq!(prediction["is_anomaly"], false);

    let investigate_req = test::TestRequest::get()
        .uri("/api/v1/investigate?source_ip=192.168.1.5")
        .to_request();
    let investigate: Value = test::call_and_read_body_json(&app, investigate_req).await;
    let investigation = &investigate["investigation"];
    assert_eq!(investigation["events"][0]["geo_country"], "Private Network");
    assert_eq!(investigation["events"][0]["geo_city"], "Local");

    let _ = fs::remove_dir_all(&model_dir);
}

#[actix_web::test]
async fn duplicate_event_is_rejected_and_row_count_increments_once() {
    let model_dir = partial_model_dir();
    let state = AppState::new(&test_config(&model_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let payload = json!({
        "action": "file_access",
        "target_file": "readme.md",
        "source_ip": "10.0.0.9",
        "target_service": "Fake Git Repository",
        "session_id": "sess-5",
        "timestamp": "2026-01-01T00:00:00+00:00",
    });

    let first = test::TestRequest::post().uri("/api/v1/log").set_json(&payload).to_request();
    let first_resp = test::call_service(&app, first).await;
    assert!(first_resp.status().is_success());

    let second = test::TestRequest::post().uri("/api/v1/log").set_json(&payload).to_request();
    let second_resp = test::call_service(&app, second).await;
    assert_eq!(second_resp.status(), 409);

    assert_eq!(state.store.row_count().unwrap(), 1);

    let _ = fs::remove_dir_all(&model_dir);
}

#[actix_web::test]
async fn missing_model_bundle_falls_back_to_keyword_scoring_but_still_ingests() {
    let empty_dir = std::env::temp_dir().join(format!(
        "honeypot-core-it-missing-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    // Deliberately never created: ModelBundle::load must treat a missing
    // directory the same as a directory with no metadata files in it.
    let state = AppState::new(&test_config(&empty_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/log")
        .set_json(&json!({
            "action": "bruteforce_login",
            "source_ip": "203.0.113.55",
            "target_service": "Fake CI/CD Runner",
            "session_id": "sess-6",
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let prediction = &body["ml_prediction"];
    assert!((prediction["ml_score"].as_f64().unwrap() - 0.75).abs() < 1e-9);
    assert_eq!(prediction["ml_risk_level"], "HIGH");
    assert!(matches!(
        prediction["predicted_attack_type"].as_str().unwrap(),
        "KNOWN_ATTACK" | "UNKNOWN" | "NORMAL"
    ));
}

#[actix_web::test]
async fn missing_required_field_is_rejected_with_validation_error() {
    let model_dir = partial_model_dir();
    let state = AppState::new(&test_config(&model_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/log")
        .set_json(&json!({
            "action": "",
            "source_ip": "10.0.0.1",
            "target_service": "Fake Git Repository",
            "session_id": "sess-7",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let _ = fs::remove_dir_all(&model_dir);
}

#[actix_web::test]
async fn analytics_and_alerts_endpoints_never_5xx_and_reflect_inserts() {
    let model_dir = partial_model_dir();
    let state = AppState::new(&test_config(&model_dir)).unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(api::configure)).await;

    let ingest_req = test::TestRequest::post()
        .uri("/api/v1/log")
        .set_json(&json!({
            "action": "file_access",
            "target_file": ".env",
            "source_ip": "9.9.9.9",
            "target_service": "Fake Git Repository",
            "session_id": "sess-8",
        }))
        .to_request();
    let ingest_resp = test::call_service(&app, ingest_req).await;
    assert!(ingest_resp.status().is_success());

    let analytics: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/v1/analytics").to_request()).await;
    assert_eq!(analytics["statistics"]["total_logs"], 1);

    let alerts: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/v1/alerts?threshold=0.1").to_request(),
    )
    .await;
    assert_eq!(alerts["threshold"], 0.30);
    assert_eq!(alerts["count"], 1);

    let health: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["total_logs"], 1);

    let missing: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/no-such-route").to_request()).await;
    assert_eq!(missing["error"], "Endpoint not found");

    let _ = fs::remove_dir_all(&model_dir);
}
