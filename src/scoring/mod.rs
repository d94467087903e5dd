pub mod bundle;
pub mod features;

use serde_json::Value as JsonValue;

use crate::models::{AttackType, DarknetTrafficType, IngestEvent, ModelDetail, RiskLevel, ScoringResult};

pub use bundle::ModelBundle;

/// Three-classifier ensemble: a supervised tabular model (M₁), an
/// unsupervised anomaly detector (M₂), and a CIC-DarkNet traffic-type
/// classifier (M₃), combined with a rule-based heuristic boost. The bundle
/// is immutable for the process lifetime; `predict` takes `&self`.
pub struct Ensemble {
    bundle: ModelBundle,
}

impl Ensemble {
    pub fn new(bundle: ModelBundle) -> Self {
        Self { bundle }
    }

    /// Loaded-model metadata for the `ml_insights` endpoint: which of the
    /// three classifiers are active and their recorded training accuracy.
    pub fn model_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "rf_loaded": self.bundle.rf.is_some(),
            "rf_accuracy": self.bundle.rf.as_ref().map(|m| m.accuracy),
            "if_loaded": self.bundle.if_model.is_some(),
            "if_accuracy": self.bundle.if_model.as_ref().map(|m| m.accuracy),
            "darknet_loaded": self.bundle.darknet.is_some(),
            "darknet_accuracy": self.bundle.darknet.as_ref().map(|m| m.accuracy),
            "darknet_class_labels": self.bundle.darknet.as_ref().map(|m| &m.class_labels),
        })
    }

    pub fn predict(&self, event: &IngestEvent) -> ScoringResult {
        let empty = JsonValue::Null;
        let payload = event.payload.as_ref().unwrap_or(&empty);
        let target_file = event.target_file.as_deref().unwrap_or("");
        let malicious = features::looks_malicious(&event.action, target_file, payload);

        if self.bundle.all_missing() {
            return keyword_only_fallback(malicious);
        }

        let fv = features::project(event);

        let (rf_is_attack, rf_probability) = self.predict_rf(&fv);
        let (if_is_anomaly, if_anomaly_score) = self.predict_if(&fv);
        let (traffic_type, darknet_confidence, suspicion_score) = self.predict_darknet(&fv);

        const RF_WEIGHT: f64 = 0.60;
        const IF_WEIGHT: f64 = 0.25;
        const DARKNET_WEIGHT: f64 = 0.15;

        let darknet_weight = if self.bundle.darknet.is_some() { DARKNET_WEIGHT } else { 0.0 };
        let mut score = RF_WEIGHT * rf_probability + IF_WEIGHT * if_anomaly_score + darknet_weight * suspicion_score;

        let boost = heuristic_boost(&event.action, target_file, payload, fv.had_precomputed_flow_fields);

        if boost > 0.30 && score < 0.50 {
            score = 0.65 + boost;
        }
        score = (score + boost).min(1.0);
        if boost > 0.20 && score < 0.70 {
            score = 0.75;
        }

        let is_anomaly = rf_is_attack || if_is_anomaly || suspicion_score >= 0.70 || score >= 0.50;
        let risk_level = RiskLevel::from_score(score);
        let predicted_attack_type = predict_attack_type(
            &event.action,
            target_file,
            rf_is_attack,
            if_is_anomaly,
            score,
            traffic_type,
        );

        ScoringResult {
            score,
            risk_level,
            is_anomaly,
            predicted_attack_type,
            darknet_traffic_type: traffic_type,
            detail: ModelDetail {
                rf_is_attack,
                rf_probability,
                rf_accuracy: self.bundle.rf.as_ref().map(|m| m.accuracy),
                if_is_anomaly,
                if_anomaly_score,
                if_accuracy: self.bundle.if_model.as_ref().map(|m| m.accuracy),
                darknet_traffic_type: traffic_type,
                darknet_confidence,
                darknet_accuracy: self.bundle.darknet.as_ref().map(|m| m.accuracy),
            },
        }
    }

    /// Stand-in decision surface for the supervised tabular classifier:
    /// since no `.pkl` model is deserialized, `rf_probability` is derived
    /// directly from the synthesized feature magnitudes the real model
    /// would have been trained to flag (high byte rate, low TTL).
    fn predict_rf(&self, fv: &features::FeatureVector) -> (bool, f64) {
        if self.bundle.rf.is_none() {
            return (false, 0.0);
        }
        let v = RfClassifier.predict(fv);
        (v.positive, v.score)
    }

    /// Stand-in decision surface for the unsupervised anomaly detector.
    fn predict_if(&self, fv: &features::FeatureVector) -> (bool, f64) {
        let Some(model) = &self.bundle.if_model else {
            return (false, 0.0);
        };
        let v = IfClassifier { threshold: model.threshold.unwrap_or(0.5) }.predict(fv);
        (v.positive, v.score)
    }

    /// Stand-in decision surface for the CIC-DarkNet traffic-type
    /// classifier. Returns `(traffic_type, confidence, suspicion_score)`
    /// where `suspicion_score` equals `confidence` when the predicted type
    /// is Tor/VPN, else `(1 - confidence) * 0.3`, exactly as the original
    /// ensemble derives it from `predict_darknet`.
    fn predict_darknet(&self, fv: &features::FeatureVector) -> (DarknetTrafficType, f64, f64) {
        if self.bundle.darknet.is_none() {
            return (DarknetTrafficType::Unknown, 0.0, 0.0);
        }
        let v = DarknetClassifier.predict(fv);
        (v.darknet_label.unwrap_or(DarknetTrafficType::Unknown), v.confidence, v.score)
    }
}

/// Uniform decision-surface interface the ensemble consumes instead of each
/// classifier's native signature (probability vs. decision function vs.
/// multiclass label+confidence) — the three classifiers disagree on shape,
/// this doesn't.
trait Classifier {
    fn predict(&self, fv: &features::FeatureVector) -> ClassifierVerdict;
}

#[derive(Debug, Clone, Copy)]
struct ClassifierVerdict {
    positive: bool,
    /// The value the ensemble weights directly (probability, anomaly score,
    /// or darknet suspicion score).
    score: f64,
    /// Raw class confidence, distinct from `score` only for the darknet
    /// classifier (whose `score` is already transformed into a suspicion
    /// value; `confidence` is what `ml_insights` reports).
    confidence: f64,
    darknet_label: Option<DarknetTrafficType>,
}

struct RfClassifier;

impl Classifier for RfClassifier {
    fn predict(&self, fv: &features::FeatureVector) -> ClassifierVerdict {
        let byte_signal = normalize(fv.sbytes, 0.0, 5000.0);
        let rate_signal = normalize(fv.rate, 0.0, 5000.0);
        let ttl_signal = 1.0 - normalize(fv.sttl, 0.0, 64.0);
        let probability = (0.4 * byte_signal + 0.3 * rate_signal + 0.3 * ttl_signal).clamp(0.0, 1.0);
        ClassifierVerdict { positive: probability >= 0.5, score: probability, confidence: probability, darknet_label: None }
    }
}

struct IfClassifier {
    threshold: f64,
}

impl Classifier for IfClassifier {
    fn predict(&self, fv: &features::FeatureVector) -> ClassifierVerdict {
        let byte_signal = normalize(fv.dbytes, 0.0, 2500.0);
        let ttl_signal = 1.0 - normalize(fv.dttl, 0.0, 64.0);
        let rate_signal = normalize(fv.rate, 0.0, 5000.0);
        let anomaly_score = (0.35 * byte_signal + 0.35 * ttl_signal + 0.30 * rate_signal).clamp(0.0, 1.0);
        ClassifierVerdict {
            positive: anomaly_score >= self.threshold,
            score: anomaly_score,
            confidence: anomaly_score,
            darknet_label: None,
        }
    }
}

struct DarknetClassifier;

impl Classifier for DarknetClassifier {
    fn predict(&self, fv: &features::FeatureVector) -> ClassifierVerdict {
        let (traffic_type, confidence) = if fv.tor_vpn_indicator {
            (DarknetTrafficType::Tor, 0.85)
        } else {
            (DarknetTrafficType::NonTor, 0.6)
        };

        let is_suspicious = matches!(traffic_type, DarknetTrafficType::Tor | DarknetTrafficType::Vpn);
        let score = if is_suspicious { confidence } else { (1.0 - confidence) * 0.3 };

        ClassifierVerdict { positive: is_suspicious, score, confidence, darknet_label: Some(traffic_type) }
    }
}

fn normalize(value: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Additive boost from string-level indicators in the raw event. Distinct
/// from `features::looks_malicious`: this governs the final score, not
/// synthetic feature magnitudes, and its keyword lists are slightly wider.
fn heuristic_boost(action: &str, target_file: &str, payload: &JsonValue, had_flow_fields: bool) -> f64 {
    let action = action.to_lowercase();
    let target_file = target_file.to_lowercase();
    let payload_str = payload_lossy_string(payload).to_lowercase();

    let mut boost = 0.0;

    if [
        "git_push",
        "ci_credentials",
        "bruteforce",
        "malformed",
        "scan",
        "ci_job_run",
        "file_access",
    ]
    .iter()
    .any(|kw| action.contains(kw))
    {
        boost += 0.40;
    }

    if [".env", "secrets", "credentials", "config", ".yml", ".yaml"]
        .iter()
        .any(|kw| target_file.contains(kw))
    {
        boost += 0.30;
    }

    if [
        "backdoor", "malicious", "exploit", "shell", "wget", "curl", "reverse", "miner",
    ]
    .iter()
    .any(|kw| payload_str.contains(kw))
    {
        boost += 0.25;
    }

    if had_flow_fields {
        boost += 0.35;
    }

    boost
}

fn payload_lossy_string(payload: &JsonValue) -> String {
    match payload {
        JsonValue::Null => "{}".to_string(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn predict_attack_type(
    action: &str,
    target_file: &str,
    rf_attack: bool,
    if_anomaly: bool,
    score: f64,
    traffic_type: DarknetTrafficType,
) -> AttackType {
    let action = action.to_lowercase();
    let target_file = target_file.to_lowercase();

    if matches!(traffic_type, DarknetTrafficType::Tor | DarknetTrafficType::Vpn) && score >= 0.50 {
        return AttackType::EvasionAttack;
    }
    if action.contains("git_push") || action.contains("commit") {
        return AttackType::Exploit;
    }
    if action.contains("ci_credentials") || target_file.contains("credentials") {
        return AttackType::Backdoor;
    }
    if target_file.contains(".env") || target_file.contains("secrets") {
        return AttackType::DataExfiltration;
    }
    if action.contains("file_access")
        && [".yml", ".yaml", ".json"].iter().any(|ext| target_file.ends_with(ext))
    {
        return AttackType::Reconnaissance;
    }
    if score >= 0.65 {
        return AttackType::HighSeverityAttack;
    }
    if rf_attack {
        return AttackType::KnownAttack;
    }
    if if_anomaly {
        return AttackType::UnknownAnomaly;
    }
    AttackType::Normal
}

/// The all-three-models-missing path: a minimal keyword-only score,
/// bypassing the weighted ensemble and boost arithmetic entirely (ported
/// from the ingestion service's own non-ML fallback branch, not the
/// predictor's internal degradation path).
fn keyword_only_fallback(malicious: bool) -> ScoringResult {
    let score = if malicious { 0.75 } else { 0.30 };
    let risk_level = RiskLevel::from_score(score);

    ScoringResult {
        score,
        risk_level,
        is_anomaly: malicious,
        predicted_attack_type: if malicious { AttackType::KnownAttack } else { AttackType::Normal },
        darknet_traffic_type: DarknetTrafficType::Unknown,
        detail: ModelDetail {
            rf_is_attack: false,
            rf_probability: 0.0,
            rf_accuracy: None,
            if_is_anomaly: false,
            if_anomaly_score: 0.0,
            if_accuracy: None,
            darknet_traffic_type: DarknetTrafficType::Unknown,
            darknet_confidence: 0.0,
            darknet_accuracy: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(action: &str, target_file: Option<&str>, payload: JsonValue) -> IngestEvent {
        IngestEvent {
            timestamp: None,
            source_ip: "8.8.8.8".to_string(),
            protocol: None,
            target_service: "Fake Git Repository".to_string(),
            action: action.to_string(),
            target_file: target_file.map(|s| s.to_string()),
            payload: Some(payload),
            headers: Some(json!({})),
            session_id: "s1".to_string(),
            user_agent: None,
        }
    }

    fn empty_bundle() -> ModelBundle {
        ModelBundle::default()
    }

    /// rf + if present, darknet absent — enough to keep the ensemble off
    /// the all-missing fallback path while still exercising degradation.
    fn partial_bundle() -> ModelBundle {
        ModelBundle {
            rf: Some(bundle::RfModelInfo {
                accuracy: 0.95,
                feature_columns: vec![],
            }),
            if_model: Some(bundle::IfModelInfo {
                accuracy: 0.89,
                feature_columns: vec![],
                threshold: None,
            }),
            darknet: None,
        }
    }

    #[test]
    fn all_models_missing_uses_keyword_only_fallback() {
        let ensemble = Ensemble::new(empty_bundle());
        let result = ensemble.predict(&event("bruteforce_login", None, json!({})));
        assert!((result.score - 0.75).abs() < 1e-9);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn env_file_access_scores_high_and_exfiltration() {
        let ensemble = Ensemble::new(partial_bundle());
        let result = ensemble.predict(&event("file_access", Some(".env"), json!({})));
        assert!(result.score >= 0.70);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.predicted_attack_type, AttackType::DataExfiltration);
        assert!(result.is_anomaly);
    }

    #[test]
    fn git_push_with_backdoor_payload_is_exploit() {
        let ensemble = Ensemble::new(partial_bundle());
        let result = ensemble.predict(&event(
            "git_push",
            None,
            json!({"commit_message": "Add malicious backdoor"}),
        ));
        assert!(result.score >= 0.75);
        assert_eq!(result.predicted_attack_type, AttackType::Exploit);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn ci_credentials_access_is_backdoor() {
        let ensemble = Ensemble::new(partial_bundle());
        let result = ensemble.predict(&event(
            "ci_credentials_access",
            Some("ci_credentials"),
            json!({}),
        ));
        assert_eq!(result.predicted_attack_type, AttackType::Backdoor);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn benign_index_access_from_private_ip_stays_low() {
        let ensemble = Ensemble::new(partial_bundle());
        let result = ensemble.predict(&event("index_access", None, json!({})));
        assert_eq!(result.risk_level, RiskLevel::Minimal);
        assert!(!result.is_anomaly);
    }

    #[test]
    fn precomputed_flow_features_alone_trigger_boost() {
        let ensemble = Ensemble::new(partial_bundle());
        let result = ensemble.predict(&event(
            "suspicious_probe",
            None,
            json!({"sbytes": 9000.0, "spkts": 400.0, "dur": 0.05, "rate": 8000.0, "sload": 9000.0}),
        ));
        assert!(result.score > 0.0);
    }
}
