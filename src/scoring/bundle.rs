use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;

/// Metadata for the supervised tabular classifier (M₁). There is no trained
/// `.pkl` to deserialize in this deployment, so the metadata file's
/// presence alone determines whether M₁ is enabled; `accuracy` is reported
/// verbatim for the `ml_insights` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RfModelInfo {
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub feature_columns: Vec<String>,
}

/// Metadata for the unsupervised anomaly detector (M₂).
#[derive(Debug, Clone, Deserialize)]
pub struct IfModelInfo {
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub feature_columns: Vec<String>,
    pub threshold: Option<f64>,
}

/// Metadata for the CIC-DarkNet multiclass traffic classifier (M₃).
#[derive(Debug, Clone, Deserialize)]
pub struct DarknetModelInfo {
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default = "default_class_labels")]
    pub class_labels: Vec<String>,
}

fn default_class_labels() -> Vec<String> {
    vec![
        "Non-Tor".to_string(),
        "NonVPN".to_string(),
        "Tor".to_string(),
        "VPN".to_string(),
    ]
}

/// The three classifier handles, loaded once at startup and held immutable
/// for the process lifetime. A model whose metadata file is absent or
/// unparseable is disabled; the ensemble degrades per §4.3 rather than
/// failing startup.
#[derive(Debug, Clone, Default)]
pub struct ModelBundle {
    pub rf: Option<RfModelInfo>,
    pub if_model: Option<IfModelInfo>,
    pub darknet: Option<DarknetModelInfo>,
}

impl ModelBundle {
    pub fn load(dir: &Path) -> Self {
        let rf = load_json::<RfModelInfo>(&dir.join("best_model_info.json"));
        let if_model = load_json::<IfModelInfo>(&dir.join("isolationforest_model_info.json"));
        let darknet = load_json::<DarknetModelInfo>(&dir.join("darknet_model_info.json"));

        info!(
            "model bundle loaded from {}: rf={} if={} darknet={}",
            dir.display(),
            rf.is_some(),
            if_model.is_some(),
            darknet.is_some()
        );

        Self { rf, if_model, darknet }
    }

    pub fn all_missing(&self) -> bool {
        self.rf.is_none() && self.if_model.is_none() && self.darknet.is_none()
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("model metadata at {} failed to parse: {e}", path.display());
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    #[test]
    fn missing_directory_disables_everything() {
        let bundle = ModelBundle::load(Path::new("/nonexistent/path/for/testing"));
        assert!(bundle.all_missing());
    }

    #[test]
    fn loads_present_metadata_files() {
        let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("bundle-test-{}-{}", std::process::id(), unique));
        fs::create_dir_all(&dir).unwrap();
        let mut f = fs::File::create(dir.join("best_model_info.json")).unwrap();
        write!(f, r#"{{"accuracy": 0.95, "feature_columns": ["dur", "proto"]}}"#).unwrap();

        let bundle = ModelBundle::load(&dir);
        assert!(bundle.rf.is_some());
        assert!(bundle.if_model.is_none());
        assert_eq!(bundle.rf.unwrap().accuracy, 0.95);

        let _ = fs::remove_dir_all(&dir);
    }
}
