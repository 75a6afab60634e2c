//! Static metric definitions.
//!
//! A catalog is a list of `MetricGroup`s. Each group reads from one raw
//! category and applies to a set of session contexts; each metric in it names
//! the raw field it consumes and how its value is derived.

use crate::snapshot::Category;

/// Kind of endpoint a session monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionContext {
    /// A PostgreSQL server, monitored directly.
    Postgres,
    /// A PgBouncer admin console.
    PgBouncer,
}

const PG_ONLY: &[SessionContext] = &[SessionContext::Postgres];
const BOUNCER_ONLY: &[SessionContext] = &[SessionContext::PgBouncer];
const ANY: &[SessionContext] = &[SessionContext::Postgres, SessionContext::PgBouncer];

/// RGB color of a graph line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const GRAY: Color = Color(100, 140, 120);
    pub const BLUE: Color = Color(64, 224, 208);
    pub const GREEN: Color = Color(50, 205, 50);
    pub const RED: Color = Color(255, 99, 71);
    pub const YELLOW: Color = Color(218, 165, 32);
    pub const PURPLE: Color = Color(147, 112, 219);
    pub const ORANGE: Color = Color(255, 165, 0);
}

/// How a metric obtains its value each cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Derivation {
    /// Read the metric's field from the group's source category. The first
    /// observation only establishes a baseline.
    Sampled,
    /// Read `field` from `category` and emit it every cycle, no baseline.
    Direct {
        category: Category,
        field: &'static str,
    },
    /// `100 * numerator / (numerator + denominator)` from `category`,
    /// `default_when_empty` when both are zero.
    Ratio {
        category: Category,
        numerator: &'static str,
        denominator: &'static str,
        default_when_empty: f64,
    },
}

/// Immutable description of one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    /// Raw field name, also the metric's name within its group.
    pub field: &'static str,
    pub label: &'static str,
    pub color: Color,
    /// Emit the per-second rate of the raw counter instead of the raw value.
    pub per_second: bool,
    /// Keep a full history aligned with the session clock; otherwise keep
    /// only the latest value.
    pub save_history: bool,
    /// Initially shown in graphs.
    pub visible: bool,
    /// User can toggle visibility.
    pub toggleable: bool,
    /// Suppress single-cycle jumps to 0 or 100.
    pub smooth_boundary: bool,
    pub derivation: Derivation,
}

impl MetricDefinition {
    /// A counter emitted as a per-second rate.
    pub fn rate(field: &'static str, label: &'static str, color: Color) -> Self {
        Self {
            field,
            label,
            color,
            per_second: true,
            save_history: true,
            visible: true,
            toggleable: true,
            smooth_boundary: false,
            derivation: Derivation::Sampled,
        }
    }

    /// An absolute value emitted as sampled.
    pub fn gauge(field: &'static str, label: &'static str, color: Color) -> Self {
        Self {
            per_second: false,
            ..Self::rate(field, label, color)
        }
    }

    pub fn latest_only(self) -> Self {
        Self {
            save_history: false,
            ..self
        }
    }

    pub fn hidden(self) -> Self {
        Self {
            visible: false,
            ..self
        }
    }

    pub fn fixed(self) -> Self {
        Self {
            toggleable: false,
            ..self
        }
    }

    pub fn smoothed(self) -> Self {
        Self {
            smooth_boundary: true,
            ..self
        }
    }

    pub fn direct(self, category: Category, field: &'static str) -> Self {
        Self {
            per_second: false,
            derivation: Derivation::Direct { category, field },
            ..self
        }
    }

    pub fn ratio(
        self,
        category: Category,
        numerator: &'static str,
        denominator: &'static str,
        default_when_empty: f64,
    ) -> Self {
        Self {
            per_second: false,
            derivation: Derivation::Ratio {
                category,
                numerator,
                denominator,
                default_when_empty,
            },
            ..self
        }
    }
}

/// A set of metrics drawn on one graph.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricGroup {
    pub name: &'static str,
    pub title: &'static str,
    /// Category sampled metrics read from. `None` for groups made only of
    /// direct or ratio metrics.
    pub source: Option<Category>,
    pub contexts: &'static [SessionContext],
    pub metrics: Vec<MetricDefinition>,
}

impl MetricGroup {
    pub fn applies_to(&self, context: SessionContext) -> bool {
        self.contexts.contains(&context)
    }
}

/// Fully qualified series name: `<group>.<field>`.
pub fn series_name(group: &str, field: &str) -> String {
    format!("{}.{}", group, field)
}

/// The built-in PostgreSQL / PgBouncer catalog.
pub fn builtin_catalog() -> Vec<MetricGroup> {
    use Category::*;
    use MetricDefinition as M;

    vec![
        MetricGroup {
            name: "system_cpu",
            title: "System",
            source: Some(SystemUtilization),
            contexts: ANY,
            metrics: vec![M::gauge("CPU_Percent", "CPU %", Color::BLUE).fixed().smoothed()],
        },
        MetricGroup {
            name: "system_memory",
            title: "System",
            source: Some(SystemUtilization),
            contexts: ANY,
            metrics: vec![
                M::gauge("Memory_Total", "Total", Color::BLUE)
                    .latest_only()
                    .hidden()
                    .fixed(),
                M::gauge("Memory_Used", "Memory Used", Color::GREEN).fixed(),
            ],
        },
        MetricGroup {
            name: "system_disk_io",
            title: "System",
            source: Some(SystemUtilization),
            contexts: ANY,
            metrics: vec![
                M::rate("Disk_Read", "IOPS Read", Color::BLUE),
                M::rate("Disk_Write", "IOPS Write", Color::YELLOW),
            ],
        },
        MetricGroup {
            name: "system_network",
            title: "System",
            source: Some(SystemUtilization),
            contexts: ANY,
            metrics: vec![
                M::rate("Network_Down", "Net Dn", Color::BLUE),
                M::rate("Network_Up", "Net Up", Color::GRAY),
            ],
        },
        MetricGroup {
            name: "pg_transactions",
            title: "Transactions",
            source: Some(DatabaseStats),
            contexts: PG_ONLY,
            metrics: vec![
                M::rate("xact_commit", "Commits", Color::GREEN),
                M::rate("xact_rollback", "Rollbacks", Color::RED),
            ],
        },
        MetricGroup {
            name: "pg_tuples",
            title: "Tuples",
            source: Some(DatabaseStats),
            contexts: PG_ONLY,
            metrics: vec![
                M::rate("tup_fetched", "Fetched", Color::BLUE),
                M::rate("tup_inserted", "Inserted", Color::GREEN),
                M::rate("tup_updated", "Updated", Color::YELLOW),
                M::rate("tup_deleted", "Deleted", Color::RED),
            ],
        },
        MetricGroup {
            name: "pg_block_io",
            title: "Block I/O",
            source: Some(DatabaseStats),
            contexts: PG_ONLY,
            metrics: vec![
                M::rate("blks_hit", "Buffer Hits", Color::GREEN),
                M::rate("blks_read", "Disk Reads", Color::RED),
            ],
        },
        MetricGroup {
            name: "pg_cache_hit_ratio",
            title: "Cache Hit %",
            source: None,
            contexts: PG_ONLY,
            metrics: vec![
                M::gauge("cache_hit_ratio", "Hit Ratio %", Color::GREEN)
                    .ratio(DatabaseStats, "blks_hit", "blks_read", 100.0)
                    .fixed(),
            ],
        },
        MetricGroup {
            name: "pg_connections",
            title: "Connections",
            source: Some(ConnectionStats),
            contexts: PG_ONLY,
            metrics: vec![
                M::gauge("active", "Active", Color::GREEN),
                M::gauge("idle", "Idle", Color::BLUE),
                M::gauge("idle_in_transaction", "Idle in Txn", Color::YELLOW),
            ],
        },
        MetricGroup {
            name: "pg_checkpoints",
            title: "Checkpoints",
            source: Some(BgwriterStats),
            contexts: PG_ONLY,
            metrics: vec![
                M::rate("checkpoints_timed", "Timed", Color::GREEN),
                M::rate("checkpoints_req", "Requested", Color::YELLOW),
                M::rate("buffers_checkpoint", "Buffers", Color::BLUE),
            ],
        },
        MetricGroup {
            name: "pg_temp_files",
            title: "Temp Files",
            source: Some(DatabaseStats),
            contexts: PG_ONLY,
            metrics: vec![
                M::rate("temp_files", "Temp Files", Color::YELLOW),
                M::rate("temp_bytes", "Temp Bytes", Color::RED),
            ],
        },
        MetricGroup {
            name: "replication_lag",
            title: "Replication",
            source: None,
            contexts: PG_ONLY,
            metrics: vec![
                M::gauge("lag", "Lag", Color::BLUE)
                    .direct(ReplicationStatus, "lag_seconds")
                    .fixed(),
            ],
        },
        MetricGroup {
            name: "pgbouncer_connections",
            title: "Pool Connections",
            source: Some(PgbouncerPools),
            contexts: BOUNCER_ONLY,
            metrics: vec![
                M::gauge("cl_active", "Clients Active", Color::GREEN),
                M::gauge("cl_waiting", "Clients Waiting", Color::YELLOW),
                M::gauge("sv_active", "Servers Active", Color::BLUE),
                M::gauge("sv_idle", "Servers Idle", Color::GRAY),
            ],
        },
        MetricGroup {
            name: "pgbouncer_traffic",
            title: "Pool Traffic",
            source: Some(PgbouncerStats),
            contexts: BOUNCER_ONLY,
            metrics: vec![
                M::rate("xact_count", "Transactions", Color::GREEN),
                M::rate("query_count", "Queries", Color::BLUE),
                M::rate("bytes_received", "Received", Color::YELLOW),
                M::rate("bytes_sent", "Sent", Color::PURPLE),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_series_names_are_unique() {
        let mut seen = HashSet::new();
        for group in builtin_catalog() {
            for m in &group.metrics {
                assert!(seen.insert(series_name(group.name, m.field)));
            }
        }
    }

    #[test]
    fn sampled_metrics_have_a_source() {
        for group in builtin_catalog() {
            for m in &group.metrics {
                if m.derivation == Derivation::Sampled {
                    assert!(group.source.is_some(), "{} has no source", group.name);
                }
            }
        }
    }

    #[test]
    fn builders_compose() {
        let m = MetricDefinition::gauge("x", "X", Color::ORANGE)
            .latest_only()
            .hidden()
            .smoothed();
        assert!(!m.per_second);
        assert!(!m.save_history);
        assert!(!m.visible);
        assert!(m.smooth_boundary);
        assert!(m.toggleable);
    }

    #[test]
    fn pool_groups_only_apply_to_pgbouncer() {
        let catalog = builtin_catalog();
        let pools = catalog
            .iter()
            .find(|g| g.name == "pgbouncer_connections")
            .unwrap();
        assert!(pools.applies_to(SessionContext::PgBouncer));
        assert!(!pools.applies_to(SessionContext::Postgres));
    }
}
