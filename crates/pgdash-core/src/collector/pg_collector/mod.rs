//! PostgreSQL data source.
//!
//! Serves these categories from the statistics views:
//! - `database_stats` - `pg_stat_database`, summed over all databases
//! - `bgwriter_stats` - `pg_stat_bgwriter` / `pg_stat_checkpointer`
//! - `connection_stats` - client backends in `pg_stat_activity` by state
//! - `replication_status` - recovery state and replay lag
//! - `session_variables` - `pg_settings`
//!
//! Everything goes through the simple query protocol and arrives as text,
//! converted with `text_to_value`. One connection per instance; the
//! scheduler opens a second instance for ad-hoc commands.

mod queries;

use postgres::{Client, NoTls, SimpleQueryMessage, SimpleQueryRow};
use tracing::{debug, warn};

use super::traits::{AdHocCommand, AdHocOutput, DataSource, SourceError};
use crate::config::{DEFAULT_PG_PORT, Endpoint};
use crate::snapshot::{Category, PollSnapshot, QueryDenial, RawFields, text_to_value};

/// SQLSTATE codes treated as "this role may not run this query":
/// insufficient_privilege, syntax_error_or_access_rule_violation and
/// undefined_table (views missing on older versions or without extensions).
pub const PRIVILEGE_SQLSTATES: [&str; 3] = ["42501", "42000", "42P01"];

/// libpq-style connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl ConnParams {
    /// Reads the standard libpq environment:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER, then "postgres")
    /// - PGPASSWORD (default: none)
    /// - PGDATABASE (default: same as the user)
    pub fn from_env() -> Self {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "postgres".to_string());
        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PG_PORT);
        let password = std::env::var("PGPASSWORD").ok().filter(|p| !p.is_empty());
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        Self {
            host,
            port,
            user,
            password,
            database,
        }
    }

    pub fn connection_string(&self) -> String {
        let mut conn = format!(
            "host={} port={} user={} dbname={} application_name=pgdash",
            self.host, self.port, self.user, self.database
        );
        if let Some(password) = &self.password {
            conn.push_str(&format!(" password={}", password));
        }
        conn
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::postgres(self.host.clone(), self.port)
    }
}

/// `DataSource` backed by a PostgreSQL connection.
pub struct PostgresSource {
    params: ConnParams,
    client: Option<Client>,
    server_version_num: Option<i32>,
    last_error: Option<String>,
}

impl PostgresSource {
    pub fn new(params: ConnParams) -> Self {
        Self {
            params,
            client: None,
            server_version_num: None,
            last_error: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ConnParams::from_env())
    }

    /// Returns the last connection error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn server_version_num(&self) -> Option<i32> {
        self.server_version_num
    }

    fn ensure_connected(&mut self) -> Result<(), SourceError> {
        if let Some(client) = &self.client {
            if !client.is_closed() {
                return Ok(());
            }
            self.client = None;
        }

        match Client::connect(&self.params.connection_string(), NoTls) {
            Ok(mut client) => {
                // Determine server version once per (re)connect.
                self.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());
                debug!(
                    endpoint = %self.params.endpoint(),
                    server_version_num = ?self.server_version_num,
                    "connected"
                );
                self.client = Some(client);
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                let msg = format_postgres_error(&e);
                self.last_error = Some(msg.clone());
                self.server_version_num = None;
                Err(SourceError::Connection(msg))
            }
        }
    }

    fn simple(&mut self, query: &str) -> Result<Vec<RawFields>, SourceError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SourceError::Connection("not connected".to_string()))?;
        match client.simple_query(query) {
            Ok(messages) => Ok(rows_to_fields(messages)),
            Err(e) => {
                let err = classify_error(query, &e);
                if err.is_connection() {
                    self.client = None;
                }
                Err(err)
            }
        }
    }
}

impl DataSource for PostgresSource {
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
            let Some(query) = queries::query_for(category, self.server_version_num) else {
                continue;
            };
            match self.simple(&query) {
                Ok(rows) => {
                    let fields = if category == Category::SessionVariables {
                        settings_to_fields(&rows, "name", "setting")
                    } else {
                        rows.into_iter().next().unwrap_or_default()
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
                Err(e) => {
                    warn!(category = %category, error = %e, "query failed, category skipped this cycle");
                }
            }
        }
        Ok(snapshot)
    }

    fn run_ad_hoc(&mut self, command: &AdHocCommand) -> Result<AdHocOutput, SourceError> {
        self.ensure_connected()?;

        let (query, pid) = match command {
            AdHocCommand::Query(sql) => return self.simple(sql).map(AdHocOutput::Rows),
            AdHocCommand::TerminateBackend(pid) => ("SELECT pg_terminate_backend($1)", *pid),
            AdHocCommand::CancelBackend(pid) => ("SELECT pg_cancel_backend($1)", *pid),
        };

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SourceError::Connection("not connected".to_string()))?;
        let result = client
            .query_one(query, &[&pid])
            .and_then(|row| row.try_get::<_, bool>(0));
        match result {
            Ok(done) => Ok(AdHocOutput::Done(done)),
            Err(e) => {
                let err = classify_error(query, &e);
                if err.is_connection() {
                    self.client = None;
                }
                Err(err)
            }
        }
    }

    fn describe(&self) -> String {
        format!("postgres {}", self.params.endpoint())
    }
}

/// Converts simple-query messages into one `RawFields` per row.
pub(crate) fn rows_to_fields(messages: Vec<SimpleQueryMessage>) -> Vec<RawFields> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row_to_fields(&row)),
            _ => None,
        })
        .collect()
}

fn row_to_fields(row: &SimpleQueryRow) -> RawFields {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), text_to_value(row.get(i))))
        .collect()
}

/// Folds `(name, value)` rows into a single map, e.g. `pg_settings`.
pub(crate) fn settings_to_fields(rows: &[RawFields], name_col: &str, value_col: &str) -> RawFields {
    rows.iter()
        .filter_map(|row| {
            let name = row.get(name_col)?.as_str()?.to_string();
            let value = row.get(value_col).cloned().unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

/// Maps a driver error onto the source error taxonomy.
pub(crate) fn classify_error(query: &str, e: &postgres::Error) -> SourceError {
    match e.as_db_error() {
        Some(db_error) => {
            let code = db_error.code().code().to_string();
            let message = db_error.message().to_string();
            if PRIVILEGE_SQLSTATES.contains(&code.as_str()) {
                SourceError::Privilege {
                    query: query.to_string(),
                    code,
                    message,
                }
            } else {
                SourceError::Query {
                    query: query.to_string(),
                    code,
                    message,
                }
            }
        }
        None => SourceError::Connection(format_postgres_error(e)),
    }
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fields;
    use serde_json::json;

    fn params() -> ConnParams {
        ConnParams {
            host: "db1".into(),
            port: 5433,
            user: "app".into(),
            password: None,
            database: "shop".into(),
        }
    }

    #[test]
    fn connection_string_omits_empty_password() {
        let conn = params().connection_string();
        assert_eq!(
            conn,
            "host=db1 port=5433 user=app dbname=shop application_name=pgdash"
        );

        let mut with_pw = params();
        with_pw.password = Some("secret".into());
        assert!(with_pw.connection_string().ends_with(" password=secret"));
    }

    #[test]
    fn endpoint_uses_postgres_default_port() {
        let endpoint = params().endpoint();
        assert_eq!(endpoint.port, 5433);
        assert_eq!(endpoint.default_port, DEFAULT_PG_PORT);
    }

    #[test]
    fn settings_fold_into_one_map() {
        let rows = vec![
            fields([("name", json!("work_mem")), ("setting", json!(4096))]),
            fields([("name", json!("ssl")), ("setting", json!(true))]),
            fields([("setting", json!("orphan"))]),
        ];
        let vars = settings_to_fields(&rows, "name", "setting");
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["work_mem"], json!(4096));
    }

    #[test]
    fn unreachable_server_is_a_connection_error() {
        let mut source = PostgresSource::new(ConnParams {
            host: "127.0.0.1".into(),
            port: 1,
            ..params()
        });
        let err = source.connect().unwrap_err();
        assert!(err.is_connection());
        assert!(source.last_error().is_some());
        assert!(!source.is_connected());
    }
}
