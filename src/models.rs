use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Document accepted by the ingestion endpoint (`POST /api/v1/log`).
///
/// Matches the authoritative field set of the ingest contract: everything
/// the producer may supply, with server-side defaults filled in before
/// enrichment and scoring run.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEvent {
    pub timestamp: Option<String>,
    pub source_ip: String,
    #[serde(default)]
    pub protocol: Option<String>,
    pub target_service: String,
    pub action: String,
    #[serde(default)]
    pub target_file: Option<String>,
    #[serde(default)]
    pub payload: Option<JsonValue>,
    #[serde(default)]
    pub headers: Option<JsonValue>,
    pub session_id: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// The immutable-after-write record as persisted by the event store.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub timestamp: String,
    pub source_ip: String,
    pub protocol: String,
    pub target_service: String,
    pub action: String,
    pub target_file: Option<String>,
    pub payload: JsonValue,
    pub headers: JsonValue,
    pub session_id: String,
    pub user_agent: String,

    pub geo_country: String,
    pub geo_city: String,
    pub geo_region: String,
    pub geo_latitude: Option<f64>,
    pub geo_longitude: Option<f64>,
    pub geo_timezone: String,
    pub geo_isp: String,
    pub geo_org: String,

    pub log_hash: String,
    pub ml_score: f64,
    pub ml_risk_level: RiskLevel,
    pub is_anomaly: bool,
    pub predicted_attack_type: AttackType,
    pub darknet_traffic_type: DarknetTrafficType,
}

/// Geographic attribution attached by the GeoIP enricher.
#[derive(Debug, Clone)]
pub struct GeoAttribution {
    pub country: String,
    pub city: String,
    pub region: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: String,
    pub isp: String,
    pub org: String,
}

impl GeoAttribution {
    /// The fixed tuple returned for private/loopback addresses without an
    /// outbound lookup.
    pub fn private_network() -> Self {
        Self {
            country: "Private Network".to_string(),
            city: "Local".to_string(),
            region: "Private".to_string(),
            latitude: None,
            longitude: None,
            timezone: "Local".to_string(),
            isp: "Private".to_string(),
            org: "Private Network".to_string(),
        }
    }

    /// Negative-cache sentinel: lookup attempted but unavailable.
    pub fn unknown() -> Self {
        Self {
            country: "Unknown".to_string(),
            city: "Unknown".to_string(),
            region: "Unknown".to_string(),
            latitude: None,
            longitude: None,
            timezone: "Unknown".to_string(),
            isp: "Unknown".to_string(),
            org: "Unknown".to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.country == "Unknown"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Derives the risk band from a final malice score via the fixed
    /// thresholds: HIGH >= 0.60, MEDIUM >= 0.40, LOW >= 0.20, else MINIMAL.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.60 {
            RiskLevel::High
        } else if score >= 0.40 {
            RiskLevel::Medium
        } else if score >= 0.20 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINIMAL" => Ok(RiskLevel::Minimal),
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            _ => Err(()),
        }
    }
}

// Serialized through `Display`/`FromStr` rather than a derive so the wire
// format matches the uppercase strings this value is stored as in SQLite.
impl Serialize for RiskLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RiskLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| serde::de::Error::custom(format!("unknown risk level: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackType {
    Normal,
    Reconnaissance,
    Exploit,
    Backdoor,
    DataExfiltration,
    EvasionAttack,
    KnownAttack,
    UnknownAnomaly,
    HighSeverityAttack,
    Unknown,
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttackType::Normal => "NORMAL",
            AttackType::Reconnaissance => "RECONNAISSANCE",
            AttackType::Exploit => "EXPLOIT",
            AttackType::Backdoor => "BACKDOOR",
            AttackType::DataExfiltration => "DATA_EXFILTRATION",
            AttackType::EvasionAttack => "EVASION_ATTACK",
            AttackType::KnownAttack => "KNOWN_ATTACK",
            AttackType::UnknownAnomaly => "UNKNOWN_ANOMALY",
            AttackType::HighSeverityAttack => "HIGH_SEVERITY_ATTACK",
            AttackType::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AttackType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NORMAL" => AttackType::Normal,
            "RECONNAISSANCE" => AttackType::Reconnaissance,
            "EXPLOIT" => AttackType::Exploit,
            "BACKDOOR" => AttackType::Backdoor,
            "DATA_EXFILTRATION" => AttackType::DataExfiltration,
            "EVASION_ATTACK" => AttackType::EvasionAttack,
            "KNOWN_ATTACK" => AttackType::KnownAttack,
            "UNKNOWN_ANOMALY" => AttackType::UnknownAnomaly,
            "HIGH_SEVERITY_ATTACK" => AttackType::HighSeverityAttack,
            _ => AttackType::Unknown,
        })
    }
}

impl Serialize for AttackType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttackType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(AttackType::Unknown))
    }
}

/// CIC-DarkNet style traffic-type label. Casing is non-uniform by design
/// (matches the label set the classifier was trained against), so
/// `Display`/`FromStr` are hand-written rather than relying on a uniform
/// derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DarknetTrafficType {
    NonTor,
    NonVpn,
    Tor,
    Vpn,
    Unknown,
}

impl fmt::Display for DarknetTrafficType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DarknetTrafficType::NonTor => "Non-Tor",
            DarknetTrafficType::NonVpn => "NonVPN",
            DarknetTrafficType::Tor => "Tor",
            DarknetTrafficType::Vpn => "VPN",
            DarknetTrafficType::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DarknetTrafficType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Non-Tor" => DarknetTrafficType::NonTor,
            "NonVPN" => DarknetTrafficType::NonVpn,
            "Tor" => DarknetTrafficType::Tor,
            "VPN" => DarknetTrafficType::Vpn,
            _ => DarknetTrafficType::Unknown,
        })
    }
}

impl Serialize for DarknetTrafficType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DarknetTrafficType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(DarknetTrafficType::Unknown))
    }
}

/// Per-model detail surfaced by the `ml_insights` query endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDetail {
    pub rf_is_attack: bool,
    pub rf_probability: f64,
    pub rf_accuracy: Option<f64>,
    pub if_is_anomaly: bool,
    pub if_anomaly_score: f64,
    pub if_accuracy: Option<f64>,
    pub darknet_traffic_type: DarknetTrafficType,
    pub darknet_confidence: f64,
    pub darknet_accuracy: Option<f64>,
}

/// Full scoring result returned by the ensemble.
#[derive(Debug, Clone)]
pub struct ScoringResult {
    pub score: f64,
    pub risk_level: RiskLevel,
    pub is_anomaly: bool,
    pub predicted_attack_type: AttackType,
    pub darknet_traffic_type: DarknetTrafficType,
    pub detail: ModelDetail,
}
