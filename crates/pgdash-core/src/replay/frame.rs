//! The durable unit of a recording, and the redaction applied to it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ReplayError;
use crate::metrics::{MetricStore, StoreSnapshot};
use crate::snapshot::{Category, PollSnapshot, RawFields};

/// Session-variable name fragments that are never recorded.
pub const BUILTIN_REDACT_PATTERNS: [&str; 3] = ["ssl", "password", "key"];

/// One recorded poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub timestamp: DateTime<Utc>,
    /// Raw fields by category name, session variables excluded.
    pub raw_categories: BTreeMap<String, RawFields>,
    /// Redacted session variables.
    pub session_variables: RawFields,
    pub metric_store_snapshot: StoreSnapshot,
    pub cycle_cost_seconds: f64,
}

impl ReplayFrame {
    /// Captures the state a cycle produced. Variables are redacted later, by
    /// the recorder, right before serialization.
    pub fn capture(
        timestamp: DateTime<Utc>,
        snapshot: &PollSnapshot,
        store: &MetricStore,
        cycle_cost_seconds: f64,
    ) -> Self {
        Self {
            timestamp,
            raw_categories: snapshot.named_categories(),
            session_variables: snapshot
                .get(Category::SessionVariables)
                .cloned()
                .unwrap_or_default(),
            metric_store_snapshot: store.snapshot_for_persistence(),
            cycle_cost_seconds,
        }
    }

    /// Serializes the frame as one record, terminated by `\n`.
    pub fn encode(&self) -> Result<Vec<u8>, ReplayError> {
        let mut line = serde_json::to_vec(self).map_err(ReplayError::Encode)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parses one record; `line` is only used for error reporting.
    pub fn decode(record: &[u8], line: usize) -> Result<Self, ReplayError> {
        serde_json::from_slice(record).map_err(|source| ReplayError::Decode { line, source })
    }
}

/// Case-insensitive substring filter over session-variable names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redactor {
    patterns: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl Redactor {
    /// Built-in patterns plus `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns: Vec<String> = BUILTIN_REDACT_PATTERNS.iter().map(|p| p.to_string()).collect();
        for p in extra {
            let p = p.as_ref().trim().to_lowercase();
            if !p.is_empty() && !patterns.contains(&p) {
                patterns.push(p);
            }
        }
        Self { patterns }
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }

    pub fn redact(&self, variables: &RawFields) -> RawFields {
        variables
            .iter()
            .filter(|(name, _)| !self.is_sensitive(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SessionContext;
    use crate::snapshot::fields;
    use serde_json::json;

    #[test]
    fn builtin_patterns_match_any_case() {
        let r = Redactor::default();
        assert!(r.is_sensitive("ssl_cert_file"));
        assert!(r.is_sensitive("SSL_CERT_FILE"));
        assert!(r.is_sensitive("Password_Encryption"));
        assert!(r.is_sensitive("auth_key_path"));
        assert!(!r.is_sensitive("work_mem"));
    }

    #[test]
    fn extra_patterns_are_lowercased() {
        let r = Redactor::new(["Token", "  ", "ssl"]);
        assert_eq!(r.patterns().len(), 4);
        assert!(r.is_sensitive("api_token"));
    }

    #[test]
    fn redact_drops_matching_variables() {
        let vars = fields([
            ("ssl_cert_file", json!("/etc/server.crt")),
            ("work_mem", json!("4MB")),
            ("krb_server_keyfile", json!("FILE:/x")),
        ]);
        let out = Redactor::default().redact(&vars);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("work_mem"));
    }

    #[test]
    fn record_shape() {
        let store = MetricStore::new(SessionContext::Postgres);
        let snap = PollSnapshot::new()
            .with(Category::DatabaseStats, fields([("xact_commit", 5)]))
            .with(Category::SessionVariables, fields([("work_mem", "4MB")]));
        let frame = ReplayFrame::capture(Utc::now(), &snap, &store, 0.25);
        let line = frame.encode().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));

        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "cycle_cost_seconds",
                "metric_store_snapshot",
                "raw_categories",
                "session_variables",
                "timestamp"
            ]
        );
        assert!(value["raw_categories"].get("session_variables").is_none());
        assert_eq!(value["raw_categories"]["database_stats"]["xact_commit"], json!(5));

        let decoded = ReplayFrame::decode(&line[..line.len() - 1], 1).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_reports_line() {
        let err = ReplayFrame::decode(b"{not json", 7).unwrap_err();
        assert!(matches!(err, ReplayError::Decode { line: 7, .. }));
    }
}
