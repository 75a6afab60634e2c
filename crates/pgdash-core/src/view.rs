//! Materialized dashboard state.
//!
//! A `SessionView` is built once per cycle (live) or per frame (replay) and
//! handed to the renderer behind an `Arc`. Rendering never touches the
//! metric store or the data source directly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::metrics::StoreSnapshot;
use crate::scheduler::WorkerState;
use crate::snapshot::RawFields;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub timestamp: DateTime<Utc>,
    /// Completed poll cycles (live) or delivered frames (replay).
    pub cycle: u64,
    pub state: WorkerState,
    /// A reconnect is in progress; `store` shows the last good data.
    pub degraded: bool,
    pub store: StoreSnapshot,
    /// Latest raw fields by category name, session variables excluded.
    pub raw_categories: BTreeMap<String, RawFields>,
    pub session_variables: RawFields,
    pub cycle_cost_seconds: f64,
    /// On-disk size of the recording, when recording.
    pub recording_bytes: Option<u64>,
    /// `(delivered, total)` frames, when replaying.
    pub replay_position: Option<(usize, usize)>,
}

impl SessionView {
    /// Most recent value of a series, if it has any.
    pub fn latest(&self, series: &str) -> Option<f64> {
        self.store.values(series)?.last().copied()
    }

    pub fn raw_field(&self, category: &str, field: &str) -> Option<&serde_json::Value> {
        self.raw_categories.get(category)?.get(field)
    }
}
