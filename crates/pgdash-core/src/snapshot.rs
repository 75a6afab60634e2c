//! Raw per-cycle input produced by a data source.
//!
//! A `PollSnapshot` groups raw named values by source category. It lives for
//! exactly one poll cycle: the metric store consumes it, the recorder copies
//! it into a replay frame, and then it is dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw field values of one category, keyed by field name.
pub type RawFields = BTreeMap<String, Value>;

/// Raw data category a source can supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Local CPU, memory, disk and network counters.
    SystemUtilization,
    /// Summed `pg_stat_database` counters.
    DatabaseStats,
    /// `pg_stat_bgwriter` / `pg_stat_checkpointer` counters.
    BgwriterStats,
    /// Client backend counts by state.
    ConnectionStats,
    /// Replica lag and receiver status.
    ReplicationStatus,
    /// Aggregated PgBouncer `SHOW POOLS`.
    PgbouncerPools,
    /// Aggregated PgBouncer `SHOW STATS`.
    PgbouncerStats,
    /// Server configuration (`pg_settings` / `SHOW CONFIG`).
    SessionVariables,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::SystemUtilization,
        Category::DatabaseStats,
        Category::BgwriterStats,
        Category::ConnectionStats,
        Category::ReplicationStatus,
        Category::PgbouncerPools,
        Category::PgbouncerStats,
        Category::SessionVariables,
    ];

    /// Stable name used in replay files.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::SystemUtilization => "system_utilization",
            Category::DatabaseStats => "database_stats",
            Category::BgwriterStats => "bgwriter_stats",
            Category::ConnectionStats => "connection_stats",
            Category::ReplicationStatus => "replication_status",
            Category::PgbouncerPools => "pgbouncer_pools",
            Category::PgbouncerStats => "pgbouncer_stats",
            Category::SessionVariables => "session_variables",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring query the server refused for lack of privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDenial {
    /// Category the query was meant to fill.
    pub category: Category,
    /// Query text, used as the query identity.
    pub query: String,
    /// SQLSTATE code.
    pub code: String,
    pub message: String,
}

/// One cycle's raw input from a data source.
///
/// Missing categories are simply absent. Privilege failures on individual
/// queries are carried in `denied` instead of failing the whole fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSnapshot {
    categories: BTreeMap<Category, RawFields>,
    pub denied: Vec<QueryDenial>,
}

impl PollSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with(mut self, category: Category, fields: RawFields) -> Self {
        self.insert(category, fields);
        self
    }

    pub fn insert(&mut self, category: Category, fields: RawFields) {
        self.categories.insert(category, fields);
    }

    pub fn get(&self, category: Category) -> Option<&RawFields> {
        self.categories.get(&category)
    }

    pub fn contains(&self, category: Category) -> bool {
        self.categories.contains_key(&category)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = (Category, &RawFields)> {
        self.categories.iter().map(|(c, f)| (*c, f))
    }

    /// Merges another snapshot into this one. Categories present in both are
    /// merged field by field, `other` winning on conflicts.
    pub fn merge(&mut self, other: PollSnapshot) {
        for (category, fields) in other.categories {
            self.categories.entry(category).or_default().extend(fields);
        }
        self.denied.extend(other.denied);
    }

    /// Raw categories keyed by their stable names, excluding session variables.
    pub fn named_categories(&self) -> BTreeMap<String, RawFields> {
        self.categories
            .iter()
            .filter(|(c, _)| **c != Category::SessionVariables)
            .map(|(c, f)| (c.as_str().to_string(), f.clone()))
            .collect()
    }
}

/// Builds `RawFields` from `(name, value)` pairs.
pub fn fields<I, K, V>(pairs: I) -> RawFields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Reads a numeric field, defaulting to zero for missing or malformed values.
pub fn numeric_field(fields: &RawFields, name: &str) -> f64 {
    fields.get(name).map(value_as_f64).unwrap_or(0.0)
}

/// Interprets a raw value as a number. Numeric strings are parsed, booleans
/// map to 0/1, anything else is zero.
pub fn value_as_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Converts a text value from the wire into the most specific JSON value.
pub fn text_to_value(text: Option<&str>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = text.parse::<f64>()
        && f.is_finite()
    {
        return Value::from(f);
    }
    match text {
        "t" | "true" | "on" => Value::Bool(true),
        "f" | "false" | "off" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_field_defaults_to_zero() {
        let f = fields([
            ("a", json!(12)),
            ("b", json!("7.5")),
            ("c", json!("garbage")),
            ("d", json!(null)),
            ("e", json!(true)),
        ]);
        assert_eq!(numeric_field(&f, "a"), 12.0);
        assert_eq!(numeric_field(&f, "b"), 7.5);
        assert_eq!(numeric_field(&f, "c"), 0.0);
        assert_eq!(numeric_field(&f, "d"), 0.0);
        assert_eq!(numeric_field(&f, "e"), 1.0);
        assert_eq!(numeric_field(&f, "missing"), 0.0);
    }

    #[test]
    fn text_to_value_prefers_integers() {
        assert_eq!(text_to_value(Some("42")), json!(42));
        assert_eq!(text_to_value(Some("0.25")), json!(0.25));
        assert_eq!(text_to_value(Some("on")), json!(true));
        assert_eq!(text_to_value(Some("8MB")), json!("8MB"));
        assert_eq!(text_to_value(None), Value::Null);
    }

    #[test]
    fn merge_combines_fields_and_denials() {
        let mut a = PollSnapshot::new().with(Category::DatabaseStats, fields([("x", 1)]));
        let mut b = PollSnapshot::new()
            .with(Category::DatabaseStats, fields([("y", 2)]))
            .with(Category::SystemUtilization, fields([("CPU_Percent", 5)]));
        b.denied.push(QueryDenial {
            category: Category::BgwriterStats,
            query: "select 1".into(),
            code: "42501".into(),
            message: "denied".into(),
        });
        a.merge(b);

        let db = a.get(Category::DatabaseStats).unwrap();
        assert_eq!(db.len(), 2);
        assert!(a.contains(Category::SystemUtilization));
        assert_eq!(a.denied.len(), 1);
    }

    #[test]
    fn named_categories_excludes_session_variables() {
        let snap = PollSnapshot::new()
            .with(Category::DatabaseStats, fields([("x", 1)]))
            .with(Category::SessionVariables, fields([("work_mem", "4MB")]));
        let named = snap.named_categories();
        assert!(named.contains_key("database_stats"));
        assert!(!named.contains_key("session_variables"));
    }

    #[test]
    fn category_names_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::from_name(c.as_str()), Some(c));
        }
        assert_eq!(Category::from_name("nope"), None);
    }
}
