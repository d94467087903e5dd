use serde_json::Value as JsonValue;

use crate::models::IngestEvent;

/// Synthetic network-flow feature vector the honeypot event is projected
/// onto before scoring. Field names and defaults mirror the UNSW-NB15-style
/// columns the tabular classifiers were trained against; an event that
/// already carries precomputed flow fields (from the attack simulator) uses
/// those verbatim instead of the synthesized defaults.
#[derive(Debug, Clone, Copy)]
pub struct FeatureVector {
    pub dur: f64,
    pub proto: i32,
    pub service: i32,
    pub state: i32,
    pub sbytes: f64,
    pub dbytes: f64,
    pub spkts: f64,
    pub dpkts: f64,
    pub rate: f64,
    pub sttl: f64,
    pub dttl: f64,
    pub sload: f64,
    pub dload: f64,
    /// Set when the event already supplied one or more raw flow fields
    /// (`sbytes`, `spkts`, `dur`, `rate`, `sload`) rather than having them
    /// synthesized from string lengths.
    pub had_precomputed_flow_fields: bool,
    /// `feature_9` in the CIC-DarkNet preprocessing: 1 if the user agent
    /// string mentions "tor" or "vpn".
    pub tor_vpn_indicator: bool,
}

/// True when the raw event looks malicious by the same keyword test the
/// preprocessing step uses to pick feature defaults. Distinct from (but
/// overlapping) the heuristic boost keyword lists in `mod.rs` — this one
/// governs synthetic feature magnitudes, not the score itself.
pub fn looks_malicious(action: &str, target_file: &str, payload: &JsonValue) -> bool {
    let action = action.to_lowercase();
    let target_file = target_file.to_lowercase();
    let payload_str = payload_to_lossy_string(payload).to_lowercase();

    action.contains("git_push")
        || action.contains("ci_credentials")
        || target_file.contains("credentials")
        || target_file.contains(".env")
        || target_file.contains("secrets")
        || action.contains("bruteforce")
        || action.contains("malformed")
        || action.contains("scan")
        || ["backdoor", "malicious", "exploit", "shell", "wget", "curl"]
            .iter()
            .any(|kw| payload_str.contains(kw))
}

fn payload_to_lossy_string(payload: &JsonValue) -> String {
    match payload {
        JsonValue::Null => "{}".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Projects an ingest event onto the synthetic feature vector. Any of
/// `sbytes`/`spkts`/`dur`/`rate`/`sload` present in `payload` as a JSON
/// object field overrides the synthesized default, mirroring the original
/// preprocessor's `if 'sbytes' in log_data: ...` checks.
pub fn project(event: &IngestEvent) -> FeatureVector {
    let empty = JsonValue::Null;
    let payload = event.payload.as_ref().unwrap_or(&empty);
    let headers = event.headers.as_ref().unwrap_or(&empty);

    let target_file = event.target_file.as_deref().unwrap_or("");
    let malicious = looks_malicious(&event.action, target_file, payload);

    let overrides = payload.as_object();
    let get_override = |key: &str| -> Option<f64> {
        overrides.and_then(|m| m.get(key)).and_then(JsonValue::as_f64)
    };

    let had_precomputed_flow_fields = ["sbytes", "spkts", "dur", "rate", "sload"]
        .iter()
        .any(|k| get_override(k).is_some());

    let dur = get_override("dur").unwrap_or(if malicious { 0.1 } else { 1.0 });

    let payload_str = payload_to_lossy_string(payload);
    let headers_str = payload_to_lossy_string(headers);

    let sbytes = get_override("sbytes")
        .unwrap_or_else(|| payload_str.len() as f64 * if malicious { 100.0 } else { 10.0 });
    let dbytes = get_override("dbytes")
        .unwrap_or_else(|| headers_str.len() as f64 * if malicious { 50.0 } else { 5.0 });
    let spkts = get_override("spkts").unwrap_or(if malicious { 100.0 } else { 10.0 });
    let dpkts = get_override("dpkts").unwrap_or(if malicious { 50.0 } else { 5.0 });

    let rate = get_override("rate").unwrap_or_else(|| {
        if dur > 0.0 {
            sbytes / dur
        } else if malicious {
            5000.0
        } else {
            100.0
        }
    });

    let sttl = get_override("sttl").unwrap_or(if malicious { 32.0 } else { 64.0 });
    let dttl = get_override("dttl").unwrap_or(if malicious { 32.0 } else { 64.0 });

    let sload = get_override("sload").unwrap_or_else(|| {
        if dur > 0.0 {
            sbytes / dur
        } else if malicious {
            5000.0
        } else {
            100.0
        }
    });
    let dload = get_override("dload").unwrap_or_else(|| {
        if dur > 0.0 {
            dbytes / dur
        } else if malicious {
            4000.0
        } else {
            80.0
        }
    });

    let user_agent = event.user_agent.as_deref().unwrap_or("").to_lowercase();
    let tor_vpn_indicator = user_agent.contains("tor") || user_agent.contains("vpn");

    FeatureVector {
        dur,
        proto: encode_protocol(event.protocol.as_deref().unwrap_or("HTTP")),
        service: encode_service(&event.target_service),
        state: encode_state("ESTABLISHED"),
        sbytes,
        dbytes,
        spkts,
        dpkts,
        rate,
        sttl,
        dttl,
        sload,
        dload,
        had_precomputed_flow_fields,
        tor_vpn_indicator,
    }
}

/// Fallback protocol encoder. There is no trained encoder to defer to in
/// this deployment (no `.pkl` artifacts are loaded), so this mapping *is*
/// the encoder.
pub fn encode_protocol(protocol: &str) -> i32 {
    match protocol.to_uppercase().as_str() {
        "HTTP" | "HTTPS" | "TCP" => 0,
        "UDP" => 1,
        "ICMP" => 2,
        "FTP" => 3,
        "SSH" => 4,
        "TELNET" => 5,
        _ => 0,
    }
}

pub fn encode_service(service: &str) -> i32 {
    match service {
        "Fake Git Repository" => 0,
        "Fake CI/CD Runner" => 1,
        "Consolidated Honeypot Services" => 2,
        _ => 3,
    }
}

pub fn encode_state(state: &str) -> i32 {
    match state.to_uppercase().as_str() {
        "ESTABLISHED" => 0,
        "FIN" => 1,
        "CON" => 2,
        "REQ" => 3,
        "RST" => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_event() -> IngestEvent {
        IngestEvent {
            timestamp: None,
            source_ip: "8.8.8.8".to_string(),
            protocol: None,
            target_service: "Fake Git Repository".to_string(),
            action: "file_access".to_string(),
            target_file: Some(".env".to_string()),
            payload: Some(json!({})),
            headers: Some(json!({})),
            session_id: "s1".to_string(),
            user_agent: None,
        }
    }

    #[test]
    fn malicious_defaults_exceed_benign_ones() {
        let malicious = looks_malicious("file_access", ".env", &json!({}));
        assert!(malicious);

        let f = project(&base_event());
        assert_eq!(f.sttl, 32.0);
        assert_eq!(f.dur, 0.1);
    }

    #[test]
    fn precomputed_flow_fields_override_synthesis() {
        let mut event = base_event();
        event.payload = Some(json!({"sbytes": 12345.0, "rate": 999.0}));
        let f = project(&event);
        assert!(f.had_precomputed_flow_fields);
        assert_eq!(f.sbytes, 12345.0);
        assert_eq!(f.rate, 999.0);
    }

    #[test]
    fn benign_action_does_not_trip_malicious_defaults() {
        let malicious = looks_malicious("index_access", "", &json!(null));
        assert!(!malicious);
    }
}
