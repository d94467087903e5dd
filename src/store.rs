use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::errors::CoreError;
use crate::models::{AttackType, DarknetTrafficType, Event, RiskLevel};

/// Columns added after the original `logs` table, rolled out with
/// "add if missing" migrations rather than a schema version bump.
const MIGRATION_COLUMNS: &[&str] = &[
    "ALTER TABLE logs ADD COLUMN ml_score REAL",
    "ALTER TABLE logs ADD COLUMN ml_risk_level TEXT",
    "ALTER TABLE logs ADD COLUMN is_anomaly INTEGER DEFAULT 0",
    "ALTER TABLE logs ADD COLUMN predicted_attack_type TEXT",
    "ALTER TABLE logs ADD COLUMN darknet_traffic_type TEXT",
];

/// Append-mostly SQLite-backed event store. A single mutex around the
/// connection keeps writes serialized; SQLite itself serializes at the
/// file level, but the mutex is what lets `Connection`'s `&mut self` API
/// be shared across request handlers.
pub struct EventStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Default, Clone)]
pub struct LogFilter {
    pub source_ip: Option<String>,
    pub action: Option<String>,
    pub target_service: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct RiskBucket {
    pub risk_level: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ScoreTrendPoint {
    pub time: String,
    pub avg_score: f64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct Aggregate {
    pub total_logs: i64,
    pub unique_ips: i64,
    pub recent_activity_24h: i64,
    pub top_countries: Vec<CountBucket>,
    pub top_actions: Vec<CountBucket>,
    pub top_services: Vec<CountBucket>,
    pub avg_ml_score: f64,
    pub high_risk_count: i64,
    pub anomaly_count: i64,
    pub risk_distribution: Vec<RiskBucket>,
    pub ml_score_trend: Vec<ScoreTrendPoint>,
}

#[derive(Debug, Serialize)]
pub struct SourceSummary {
    pub source_ip: String,
    pub count: i64,
    pub avg_score: f64,
    pub max_score: f64,
    pub unique_actions: i64,
    pub unique_services: i64,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub events: Vec<Event>,
    pub score_trend: Vec<ScoreTrendPoint>,
}

impl EventStore {
    pub fn open(database_path: &str) -> Result<Self, CoreError> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CoreError::StoreIo(format!("cannot create db directory: {e}")))?;
            }
        }

        let conn = Connection::open(database_path)
            .map_err(|e| CoreError::StoreIo(format!("cannot open database: {e}")))?;

        Self::migrate(&conn)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn migrate(conn: &Connection) -> Result<(), CoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                geo_country TEXT,
                geo_city TEXT,
                geo_region TEXT,
                geo_latitude REAL,
                geo_longitude REAL,
                geo_timezone TEXT,
                geo_isp TEXT,
                geo_org TEXT,
                protocol TEXT NOT NULL,
                target_service TEXT NOT NULL,
                action TEXT NOT NULL,
                target_file TEXT,
                headers TEXT,
                payload TEXT,
                session_id TEXT NOT NULL,
                user_agent TEXT,
                log_hash TEXT UNIQUE NOT NULL,
                ml_score REAL,
                ml_risk_level TEXT,
                is_anomaly INTEGER DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .map_err(|e| CoreError::StoreIo(format!("schema creation failed: {e}")))?;

        for stmt in MIGRATION_COLUMNS {
            // "duplicate column name" is the expected steady-state outcome
            // once a database has already been migrated; every other
            // error is a real problem.
            if let Err(e) = conn.execute(stmt, []) {
                if !e.to_string().contains("duplicate column name") {
                    return Err(CoreError::StoreIo(format!("migration failed ({stmt}): {e}")));
                }
            }
        }

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_source_ip ON logs(source_ip)",
            "CREATE INDEX IF NOT EXISTS idx_timestamp ON logs(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_action ON logs(action)",
            "CREATE INDEX IF NOT EXISTS idx_target_service ON logs(target_service)",
            "CREATE INDEX IF NOT EXISTS idx_ml_score ON logs(ml_score)",
            "CREATE INDEX IF NOT EXISTS idx_is_anomaly ON logs(is_anomaly)",
        ] {
            conn.execute(stmt, [])
                .map_err(|e| CoreError::StoreIo(format!("index creation failed: {e}")))?;
        }

        Ok(())
    }

    pub fn insert(&self, event: &Event) -> Result<i64, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let headers_text = event.headers.to_string();
        let payload_text = event.payload.to_string();

        let result = conn.execute(
            "INSERT INTO logs (
                timestamp, source_ip, geo_country, geo_city, geo_region,
                geo_latitude, geo_longitude, geo_timezone, geo_isp, geo_org,
                protocol, target_service, action, target_file, headers,
                payload, session_id, user_agent, log_hash,
                ml_score, ml_risk_level, is_anomaly, predicted_attack_type, darknet_traffic_type,
                created_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25)",
            params![
                event.timestamp,
                event.source_ip,
                event.geo_country,
                event.geo_city,
                event.geo_region,
                event.geo_latitude,
                event.geo_longitude,
                event.geo_timezone,
                event.geo_isp,
                event.geo_org,
                event.protocol,
                event.target_service,
                event.action,
                event.target_file,
                headers_text,
                payload_text,
                event.session_id,
                event.user_agent,
                event.log_hash,
                event.ml_score,
                event.ml_risk_level.to_string(),
                event.is_anomaly as i64,
                event.predicted_attack_type.to_string(),
                event.darknet_traffic_type.to_string(),
                event.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(CoreError::Duplicate)
            }
            Err(e) => Err(CoreError::StoreIo(e.to_string())),
        }
    }

    pub fn query_logs(&self, filter: &LogFilter, limit: i64, offset: i64) -> Result<Vec<Event>, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let mut sql = String::from("SELECT * FROM logs WHERE 1=1");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ip) = &filter.source_ip {
            sql.push_str(" AND source_ip = ?");
            bound.push(Box::new(ip.clone()));
        }
        if let Some(action) = &filter.action {
            sql.push_str(" AND action = ?");
            bound.push(Box::new(action.clone()));
        }
        if let Some(service) = &filter.target_service {
            sql.push_str(" AND target_service = ?");
            bound.push(Box::new(service.clone()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
        bound.push(Box::new(limit));
        bound.push(Box::new(offset));

        let mut stmt = conn.prepare(&sql).map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_event)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::StoreIo(e.to_string()))
    }

    pub fn since(&self, last_id: i64, limit: i64) -> Result<Vec<Event>, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM logs WHERE id > ?1 ORDER BY id ASC LIMIT ?2")
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        let rows = stmt
            .query_map(params![last_id, limit], row_to_event)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::StoreIo(e.to_string()))
    }

    pub fn aggregate(&self) -> Result<Aggregate, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let total_logs: i64 = conn
            .query_row("SELECT COUNT(*) FROM logs", [], |r| r.get(0))
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let unique_ips: i64 = conn
            .query_row("SELECT COUNT(DISTINCT source_ip) FROM logs", [], |r| r.get(0))
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let recent_activity_24h: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM logs WHERE created_at >= datetime('now', '-1 day')",
                [],
                |r| r.get(0),
            )
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        let top_countries = top_n(
            &conn,
            "SELECT geo_country, COUNT(*) as c FROM logs WHERE geo_country IS NOT NULL AND geo_country != 'Unknown' GROUP BY geo_country ORDER BY c DESC LIMIT 10",
        )?;
        let top_actions = top_n(
            &conn,
            "SELECT action, COUNT(*) as c FROM logs GROUP BY action ORDER BY c DESC LIMIT 10",
        )?;
        let top_services = top_n(
            &conn,
            "SELECT target_service, COUNT(*) as c FROM logs GROUP BY target_service ORDER BY c DESC LIMIT 10",
        )?;

        let avg_ml_score: f64 = conn
            .query_row(
                "SELECT COALESCE(AVG(ml_score), 0.0) FROM logs WHERE ml_score IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let high_risk_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM logs WHERE ml_score >= 0.7", [], |r| r.get(0))
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let anomaly_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM logs WHERE is_anomaly = 1", [], |r| r.get(0))
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        let mut risk_stmt = conn
            .prepare("SELECT ml_risk_level, COUNT(*) as c FROM logs WHERE ml_risk_level IS NOT NULL GROUP BY ml_risk_level")
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let risk_distribution = risk_stmt
            .query_map([], |r| {
                Ok(RiskBucket {
                    risk_level: r.get(0)?,
                    count: r.get(1)?,
                })
            })
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        let mut trend_stmt = conn
            .prepare(
                "SELECT strftime('%Y-%m-%d %H:00:00', created_at) as hour, AVG(ml_score), COUNT(*)
                 FROM logs
                 WHERE created_at >= datetime('now', '-24 hours') AND ml_score IS NOT NULL
                 GROUP BY hour ORDER BY hour ASC",
            )
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let ml_score_trend = trend_stmt
            .query_map([], |r| {
                Ok(ScoreTrendPoint {
                    time: r.get(0)?,
                    avg_score: r.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    count: r.get(2)?,
                })
            })
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        Ok(Aggregate {
            total_logs,
            unique_ips,
            recent_activity_24h,
            top_countries,
            top_actions,
            top_services,
            avg_ml_score,
            high_risk_count,
            anomaly_count,
            risk_distribution,
            ml_score_trend,
        })
    }

    pub fn by_source(&self, ip: &str) -> Result<SourceSummary, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let mut stmt = conn
            .prepare("SELECT * FROM logs WHERE source_ip = ?1 ORDER BY created_at DESC")
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let events = stmt
            .query_map(params![ip], row_to_event)
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        let count = events.len() as i64;
        let avg_score = if events.is_empty() {
            0.0
        } else {
            events.iter().map(|e| e.ml_score).sum::<f64>() / events.len() as f64
        };
        let max_score = events.iter().map(|e| e.ml_score).fold(0.0_f64, f64::max);
        let unique_actions = events
            .iter()
            .map(|e| e.action.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len() as i64;
        let unique_services = events
            .iter()
            .map(|e| e.target_service.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len() as i64;
        let first_seen = events.last().map(|e| e.timestamp.clone());
        let last_seen = events.first().map(|e| e.timestamp.clone());

        let mut trend_stmt = conn
            .prepare(
                "SELECT strftime('%Y-%m-%d %H:00:00', created_at) as hour, AVG(ml_score), COUNT(*)
                 FROM logs
                 WHERE source_ip = ?1 AND created_at >= datetime('now', '-24 hours') AND ml_score IS NOT NULL
                 GROUP BY hour ORDER BY hour ASC",
            )
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let score_trend = trend_stmt
            .query_map(params![ip], |r| {
                Ok(ScoreTrendPoint {
                    time: r.get(0)?,
                    avg_score: r.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    count: r.get(2)?,
                })
            })
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;

        Ok(SourceSummary {
            source_ip: ip.to_string(),
            count,
            avg_score,
            max_score,
            unique_actions,
            unique_services,
            first_seen,
            last_seen,
            events,
            score_trend,
        })
    }

    pub fn row_count(&self) -> Result<i64, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row("SELECT COUNT(*) FROM logs", [], |r| r.get(0))
            .map_err(|e| CoreError::StoreIo(e.to_string()))
    }

    pub fn darknet_distribution(&self) -> Result<Vec<CountBucket>, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        top_n(
            &conn,
            "SELECT darknet_traffic_type, COUNT(*) as c FROM logs WHERE darknet_traffic_type IS NOT NULL GROUP BY darknet_traffic_type ORDER BY c DESC",
        )
    }

    /// Highest-`ml_score` rows, for the `ml_insights` "high-score sources"
    /// view and the `alerts` endpoint.
    pub fn top_by_score(&self, min_score: f64, limit: i64) -> Result<Vec<Event>, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM logs WHERE ml_score >= ?1 ORDER BY ml_score DESC, created_at DESC LIMIT ?2")
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let rows = stmt
            .query_map(params![min_score, limit], row_to_event)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::StoreIo(e.to_string()))
    }

    /// Rows with non-null geo coordinates, newest first, for the `map`
    /// endpoint's attack-point layer.
    pub fn geo_points(&self, limit: i64) -> Result<Vec<Event>, CoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT * FROM logs WHERE geo_latitude IS NOT NULL AND geo_longitude IS NOT NULL
                 ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], row_to_event)
            .map_err(|e| CoreError::StoreIo(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::StoreIo(e.to_string()))
    }
}

fn top_n(conn: &Connection, sql: &str) -> Result<Vec<CountBucket>, CoreError> {
    let mut stmt = conn.prepare(sql).map_err(|e| CoreError::StoreIo(e.to_string()))?;
    stmt.query_map([], |r| {
        Ok(CountBucket {
            key: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
            count: r.get(1)?,
        })
    })
    .and_then(Iterator::collect::<Result<Vec<_>, _>>)
    .map_err(|e| CoreError::StoreIo(e.to_string()))
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let headers_text: Option<String> = row.get("headers")?;
    let payload_text: Option<String> = row.get("payload")?;

    let headers = headers_text
        .and_then(|t| serde_json::from_str::<JsonValue>(&t).ok())
        .unwrap_or_else(|| JsonValue::Object(Default::default()));
    let payload = payload_text
        .and_then(|t| serde_json::from_str::<JsonValue>(&t).ok())
        .unwrap_or_else(|| JsonValue::Object(Default::default()));

    let risk_level: String = row.get("ml_risk_level").unwrap_or_default();
    let attack_type: String = row.get("predicted_attack_type").unwrap_or_default();
    let darknet_type: String = row.get("darknet_traffic_type").unwrap_or_default();
    let created_at_text: Option<String> = row.get("created_at")?;
    let created_at = created_at_text
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Event {
        id: row.get("id")?,
        created_at: created_at.unwrap_or_else(Utc::now),
        timestamp: row.get("timestamp")?,
        source_ip: row.get("source_ip")?,
        protocol: row.get("protocol")?,
        target_service: row.get("target_service")?,
        action: row.get("action")?,
        target_file: row.get("target_file")?,
        payload,
        headers,
        session_id: row.get("session_id")?,
        user_agent: row.get::<_, Option<String>>("user_agent")?.unwrap_or_default(),
        geo_country: row.get::<_, Option<String>>("geo_country")?.unwrap_or_default(),
        geo_city: row.get::<_, Option<String>>("geo_city")?.unwrap_or_default(),
        geo_region: row.get::<_, Option<String>>("geo_region")?.unwrap_or_default(),
        geo_latitude: row.get("geo_latitude")?,
        geo_longitude: row.get("geo_longitude")?,
        geo_timezone: row.get::<_, Option<String>>("geo_timezone")?.unwrap_or_default(),
        geo_isp: row.get::<_, Option<String>>("geo_isp")?.unwrap_or_default(),
        geo_org: row.get::<_, Option<String>>("geo_org")?.unwrap_or_default(),
        log_hash: row.get("log_hash")?,
        ml_score: row.get::<_, Option<f64>>("ml_score")?.unwrap_or(0.0),
        ml_risk_level: risk_level.parse::<RiskLevel>().unwrap_or(RiskLevel::Minimal),
        is_anomaly: row.get::<_, i64>("is_anomaly")? != 0,
        predicted_attack_type: attack_type.parse::<AttackType>().unwrap_or(AttackType::Unknown),
        darknet_traffic_type: darknet_type.parse::<DarknetTrafficType>().unwrap_or(DarknetTrafficType::Unknown),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::canonical_hash;
    use serde_json::json;

    fn sample_event(hash_seed: &str) -> Event {
        Event {
            id: 0,
            created_at: Utc::now(),
            timestamp: Utc::now().to_rfc3339(),
            source_ip: "8.8.8.8".to_string(),
            protocol: "HTTP".to_string(),
            target_service: "Fake Git Repository".to_string(),
            action: "file_access".to_string(),
            target_file: Some(".env".to_string()),
            payload: json!({}),
            headers: json!({}),
            session_id: "s1".to_string(),
            user_agent: "curl/8".to_string(),
            geo_country: "United States".to_string(),
            geo_city: "Mountain View".to_string(),
            geo_region: "CA".to_string(),
            geo_latitude: Some(37.4),
            geo_longitude: Some(-122.0),
            geo_timezone: "America/Los_Angeles".to_string(),
            geo_isp: "Google".to_string(),
            geo_org: "Google".to_string(),
            log_hash: canonical_hash(&json!({ "seed": hash_seed })),
            ml_score: 0.9,
            ml_risk_level: RiskLevel::High,
            is_anomaly: true,
            predicted_attack_type: AttackType::DataExfiltration,
            darknet_traffic_type: DarknetTrafficType::Unknown,
        }
    }

    #[test]
    fn insert_then_query_round_trips() {
        let store = EventStore::open(":memory:").unwrap();
        let id = store.insert(&sample_event("a")).unwrap();
        assert!(id > 0);

        let rows = store.query_logs(&LogFilter::default(), 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_ip, "8.8.8.8");
        assert_eq!(rows[0].predicted_attack_type, AttackType::DataExfiltration);
    }

    #[test]
    fn duplicate_hash_is_rejected() {
        let store = EventStore::open(":memory:").unwrap();
        store.insert(&sample_event("dup")).unwrap();
        let second = store.insert(&sample_event("dup"));
        assert!(matches!(second, Err(CoreError::Duplicate)));

        let rows = store.query_logs(&LogFilter::default(), 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn since_returns_rows_past_watermark() {
        let store = EventStore::open(":memory:").unwrap();
        let first = store.insert(&sample_event("1")).unwrap();
        store.insert(&sample_event("2")).unwrap();

        let rows = store.since(first, 10).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn aggregate_counts_match_inserted_rows() {
        let store = EventStore::open(":memory:").unwrap();
        store.insert(&sample_event("x")).unwrap();
        store.insert(&sample_event("y")).unwrap();

        let agg = store.aggregate().unwrap();
        assert_eq!(agg.total_logs, 2);
        assert_eq!(agg.unique_ips, 1);
        assert_eq!(agg.anomaly_count, 2);
    }
}
