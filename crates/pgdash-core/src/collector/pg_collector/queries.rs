//! SQL for the categories the PostgreSQL source serves.

use crate::snapshot::Category;

/// Cluster-wide counters summed over every database.
pub(super) const DATABASE_STATS: &str = r#"
    SELECT
        COALESCE(SUM(xact_commit), 0)::bigint AS xact_commit,
        COALESCE(SUM(xact_rollback), 0)::bigint AS xact_rollback,
        COALESCE(SUM(blks_read), 0)::bigint AS blks_read,
        COALESCE(SUM(blks_hit), 0)::bigint AS blks_hit,
        COALESCE(SUM(tup_returned), 0)::bigint AS tup_returned,
        COALESCE(SUM(tup_fetched), 0)::bigint AS tup_fetched,
        COALESCE(SUM(tup_inserted), 0)::bigint AS tup_inserted,
        COALESCE(SUM(tup_updated), 0)::bigint AS tup_updated,
        COALESCE(SUM(tup_deleted), 0)::bigint AS tup_deleted,
        COALESCE(SUM(temp_files), 0)::bigint AS temp_files,
        COALESCE(SUM(temp_bytes), 0)::bigint AS temp_bytes,
        COALESCE(SUM(deadlocks), 0)::bigint AS deadlocks
    FROM pg_stat_database
"#;

/// Client backends by state.
pub(super) const CONNECTION_STATS: &str = r#"
    SELECT
        COUNT(*) FILTER (WHERE state = 'active') AS active,
        COUNT(*) FILTER (WHERE state = 'idle') AS idle,
        COUNT(*) FILTER (WHERE state LIKE 'idle in transaction%') AS idle_in_transaction,
        COUNT(*) FILTER (WHERE wait_event_type = 'Lock') AS waiting,
        COUNT(*) AS total
    FROM pg_stat_activity
    WHERE backend_type = 'client backend'
"#;

/// Replay lag in seconds; 0 on a primary.
pub(super) const REPLICATION_STATUS: &str = r#"
    SELECT
        pg_is_in_recovery() AS is_replica,
        CASE WHEN pg_is_in_recovery()
            THEN COALESCE(EXTRACT(EPOCH FROM now() - pg_last_xact_replay_timestamp()), 0)
            ELSE 0
        END AS lag_seconds,
        (SELECT COUNT(*) FROM pg_stat_replication) AS replicas
"#;

pub(super) const SESSION_VARIABLES: &str = "SELECT name, setting FROM pg_settings";

/// Builds version-aware checkpoint query.
///
/// PostgreSQL 17 moved checkpoint counters from `pg_stat_bgwriter` to
/// `pg_stat_checkpointer`; both are exposed under the pre-17 column names.
pub(super) fn build_bgwriter_query(server_version_num: Option<i32>) -> String {
    if server_version_num.unwrap_or(0) >= 170000 {
        r#"
            SELECT
                c.num_timed AS checkpoints_timed,
                c.num_requested AS checkpoints_req,
                c.buffers_written AS buffers_checkpoint,
                b.buffers_clean,
                b.maxwritten_clean
            FROM pg_stat_checkpointer c, pg_stat_bgwriter b
        "#
        .to_string()
    } else {
        r#"
            SELECT
                checkpoints_timed,
                checkpoints_req,
                buffers_checkpoint,
                buffers_clean,
                maxwritten_clean
            FROM pg_stat_bgwriter
        "#
        .to_string()
    }
}

/// Query serving `category`, `None` for categories PostgreSQL does not supply.
pub(super) fn query_for(category: Category, server_version_num: Option<i32>) -> Option<String> {
    match category {
        Category::DatabaseStats => Some(DATABASE_STATS.to_string()),
        Category::BgwriterStats => Some(build_bgwriter_query(server_version_num)),
        Category::ConnectionStats => Some(CONNECTION_STATS.to_string()),
        Category::ReplicationStatus => Some(REPLICATION_STATUS.to_string()),
        Category::SessionVariables => Some(SESSION_VARIABLES.to_string()),
        Category::SystemUtilization | Category::PgbouncerPools | Category::PgbouncerStats => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpointer_view_on_17() {
        assert!(build_bgwriter_query(Some(170002)).contains("pg_stat_checkpointer"));
        assert!(!build_bgwriter_query(Some(160004)).contains("pg_stat_checkpointer"));
        assert!(!build_bgwriter_query(None).contains("pg_stat_checkpointer"));
    }

    #[test]
    fn pool_categories_have_no_query() {
        assert!(query_for(Category::PgbouncerPools, None).is_none());
        assert!(query_for(Category::SystemUtilization, None).is_none());
        assert!(query_for(Category::DatabaseStats, None).is_some());
    }
}
