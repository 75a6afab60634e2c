//! PgBouncer admin-console data source.
//!
//! The admin console (`dbname=pgbouncer`) only speaks the simple query
//! protocol and only understands `SHOW` commands. Per-pool rows are summed
//! into a single set of fields per category.

use postgres::{Client, NoTls};
use serde_json::Value;
use tracing::{debug, warn};

use super::pg_collector::{ConnParams, classify_error, format_postgres_error, rows_to_fields, settings_to_fields};
use super::traits::{AdHocCommand, AdHocOutput, DataSource, SourceError};
use crate::config::Endpoint;
use crate::snapshot::{Category, PollSnapshot, QueryDenial, RawFields, numeric_field};

const SHOW_POOLS: &str = "SHOW POOLS";
const SHOW_STATS: &str = "SHOW STATS";
const SHOW_CONFIG: &str = "SHOW CONFIG";

/// `SHOW POOLS` columns summed into `pgbouncer_pools`.
const POOL_COLUMNS: [&str; 6] = [
    "cl_active",
    "cl_waiting",
    "sv_active",
    "sv_idle",
    "sv_used",
    "maxwait",
];

/// `SHOW STATS` columns summed into `pgbouncer_stats`, with the names they
/// are exposed under.
const STATS_COLUMNS: [(&str, &str); 4] = [
    ("total_xact_count", "xact_count"),
    ("total_query_count", "query_count"),
    ("total_received", "bytes_received"),
    ("total_sent", "bytes_sent"),
];

/// `DataSource` backed by a PgBouncer admin console connection.
pub struct PgBouncerSource {
    params: ConnParams,
    client: Option<Client>,
}

impl PgBouncerSource {
    /// `params.database` is ignored; the admin console is always `pgbouncer`.
    pub fn new(params: ConnParams) -> Self {
        Self {
            params: ConnParams {
                database: "pgbouncer".to_string(),
                ..params
            },
            client: None,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::pgbouncer(self.params.host.clone(), self.params.port)
    }

    fn ensure_connected(&mut self) -> Result<(), SourceError> {
        if self.client.as_ref().is_some_and(|c| !c.is_closed()) {
            return Ok(());
        }
        match Client::connect(&self.params.connection_string(), NoTls) {
            Ok(client) => {
                debug!(endpoint = %self.endpoint(), "connected to pgbouncer");
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                self.client = None;
                Err(SourceError::Connection(format_postgres_error(&e)))
            }
        }
    }

    fn show(&mut self, command: &str) -> Result<Vec<RawFields>, SourceError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SourceError::Connection("not connected".to_string()))?;
        match client.simple_query(command) {
            Ok(messages) => Ok(rows_to_fields(messages)),
            Err(e) => {
                let err = classify_error(command, &e);
                if err.is_connection() {
                    self.client = None;
                }
                Err(err)
            }
        }
    }
}

impl DataSource for PgBouncerSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.ensure_connected()
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }

    fn close(&mut self) {
        self.client = None;
    }

    fn fetch_snapshot(&mut self, categories: &[Category]) -> Result<PollSnapshot, SourceError> {
        self.ensure_connected()?;

        let mut snapshot = PollSnapshot::new();
        for &category in categories {
            let command = match category {
                Category::PgbouncerPools => SHOW_POOLS,
                Category::PgbouncerStats => SHOW_STATS,
                Category::SessionVariables => SHOW_CONFIG,
                _ => continue,
            };
            match self.show(command) {
                Ok(rows) => {
                    let fields = match category {
                        Category::PgbouncerPools => sum_pools(&rows),
                        Category::PgbouncerStats => sum_stats(&rows),
                        _ => settings_to_fields(&rows, "key", "value"),
                    };
                    snapshot.insert(category, fields);
                }
                Err(SourceError::Privilege {
                    query,
                    code,
                    message,
                }) => snapshot.denied.push(QueryDenial {
                    category,
                    query,
                    code,
                    message,
                }),
                Err(e @ SourceError::Connection(_)) => return Err(e),
                Err(e) => warn!(category = %category, error = %e, "admin command failed"),
            }
        }
        Ok(snapshot)
    }

    fn run_ad_hoc(&mut self, command: &AdHocCommand) -> Result<AdHocOutput, SourceError> {
        match command {
            AdHocCommand::Query(sql) => {
                self.ensure_connected()?;
                self.show(sql).map(AdHocOutput::Rows)
            }
            other => Err(SourceError::Query {
                query: other.to_string(),
                code: "0A000".to_string(),
                message: "not supported by the pgbouncer admin console".to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("pgbouncer {}", self.endpoint())
    }
}

fn sum_columns<'a>(rows: &[RawFields], columns: impl Iterator<Item = (&'a str, &'a str)>) -> RawFields {
    columns
        .map(|(column, exposed)| {
            let total: f64 = rows.iter().map(|row| numeric_field(row, column)).sum();
            (exposed.to_string(), Value::from(total as i64))
        })
        .collect()
}

fn sum_pools(rows: &[RawFields]) -> RawFields {
    let mut fields = sum_columns(rows, POOL_COLUMNS.iter().map(|c| (*c, *c)));
    fields.insert("pools".to_string(), Value::from(rows.len() as u64));
    fields
}

fn sum_stats(rows: &[RawFields]) -> RawFields {
    sum_columns(rows, STATS_COLUMNS.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fields;
    use serde_json::json;

    #[test]
    fn pools_are_summed() {
        let rows = vec![
            fields([("database", json!("app")), ("cl_active", json!(3)), ("cl_waiting", json!(1))]),
            fields([("database", json!("pgbouncer")), ("cl_active", json!(2)), ("sv_idle", json!(4))]),
        ];
        let pools = sum_pools(&rows);
        assert_eq!(pools["cl_active"], json!(5));
        assert_eq!(pools["cl_waiting"], json!(1));
        assert_eq!(pools["sv_idle"], json!(4));
        assert_eq!(pools["sv_active"], json!(0));
        assert_eq!(pools["pools"], json!(2));
    }

    #[test]
    fn stats_are_renamed() {
        let rows = vec![fields([
            ("total_xact_count", json!(10)),
            ("total_received", json!(2048)),
        ])];
        let stats = sum_stats(&rows);
        assert_eq!(stats["xact_count"], json!(10));
        assert_eq!(stats["bytes_received"], json!(2048));
        assert!(!stats.contains_key("total_xact_count"));
    }

    #[test]
    fn admin_console_database_is_forced() {
        let source = PgBouncerSource::new(ConnParams {
            host: "pool".into(),
            port: 6432,
            user: "admin".into(),
            password: None,
            database: "app".into(),
        });
        assert_eq!(source.params.database, "pgbouncer");
        assert_eq!(source.endpoint().default_port, 6432);
    }

    #[test]
    fn signals_are_not_supported() {
        let mut source = PgBouncerSource::new(ConnParams::from_env());
        let err = source.run_ad_hoc(&AdHocCommand::TerminateBackend(1)).unwrap_err();
        assert!(matches!(err, SourceError::Query { code, .. } if code == "0A000"));
    }
}
