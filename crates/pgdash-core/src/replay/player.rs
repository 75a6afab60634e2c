//! Loads a recording and steps through it one frame at a time.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info};

use super::ReplayError;
use super::frame::ReplayFrame;

/// A session variable whose value differs between two consecutive frames.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableChange {
    /// Index of the frame where the new value first appears.
    pub frame_index: usize,
    pub timestamp: DateTime<Utc>,
    pub variable: String,
    /// `None` when the variable first appears.
    pub old_value: Option<Value>,
    /// `None` when the variable disappears.
    pub new_value: Option<Value>,
}

/// An in-memory recording with a forward-only playback cursor.
///
/// Invariant: `0 <= cursor <= frames.len()`.
#[derive(Debug, Clone, Default)]
pub struct ReplayLog {
    frames: Vec<ReplayFrame>,
    cursor: usize,
}

impl ReplayLog {
    /// Loads a recording. Any failure is logged and yields an empty log.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(log) => {
                info!(path = %path.display(), frames = log.len(), "loaded recording");
                log
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load recording");
                Self::default()
            }
        }
    }

    /// Decompresses the whole file and parses every record.
    pub fn try_load(path: &Path) -> Result<Self, ReplayError> {
        let file = File::open(path)?;
        let mut decoder = zstd::stream::read::Decoder::new(file)?;
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;

        let frames = data
            .split(|b| *b == b'\n')
            .filter(|record| !record.iter().all(u8::is_ascii_whitespace))
            .enumerate()
            .map(|(i, record)| ReplayFrame::decode(record, i + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<ReplayFrame>) -> Self {
        Self { frames, cursor: 0 }
    }

    /// Returns the frame at the cursor and advances it, or `None` once every
    /// frame has been delivered. Never wraps around.
    pub fn next_frame(&mut self) -> Option<&ReplayFrame> {
        let frame = self.frames.get(self.cursor)?;
        self.cursor += 1;
        Some(frame)
    }

    /// Number of frames delivered so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.frames.len()
    }

    pub fn frames(&self) -> &[ReplayFrame] {
        &self.frames
    }

    /// Session-variable changes between consecutive frames, over the frames
    /// delivered so far.
    pub fn variable_changes_since_start(&self) -> Vec<VariableChange> {
        let delivered = &self.frames[..self.cursor];
        let mut changes = Vec::new();
        for (offset, pair) in delivered.windows(2).enumerate() {
            let (prev, next) = (&pair[0].session_variables, &pair[1].session_variables);
            let names = prev.keys().chain(next.keys().filter(|k| !prev.contains_key(*k)));
            for name in names {
                let old_value = prev.get(name);
                let new_value = next.get(name);
                if old_value != new_value {
                    changes.push(VariableChange {
                        frame_index: offset + 1,
                        timestamp: pair[1].timestamp,
                        variable: name.clone(),
                        old_value: old_value.cloned(),
                        new_value: new_value.cloned(),
                    });
                }
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use crate::metrics::{MetricDefinition, MetricGroup, MetricStore, SessionContext};
    use crate::metrics::catalog::Color;
    use crate::replay::{Redactor, ReplayRecorder};
    use crate::snapshot::{Category, PollSnapshot, fields};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn frame_with_vars(secs: i64, vars: &[(&str, Value)]) -> ReplayFrame {
        let snap = PollSnapshot::new().with(
            Category::SessionVariables,
            fields(vars.iter().map(|(k, v)| (*k, v.clone()))),
        );
        ReplayFrame::capture(ts(secs), &snap, &MetricStore::new(SessionContext::Postgres), 0.0)
    }

    #[test]
    fn cursor_never_wraps() {
        let mut log = ReplayLog::from_frames((0..3).map(|i| frame_with_vars(i, &[])).collect());
        let mut seen = Vec::new();
        for _ in 0..log.len() {
            seen.push(log.next_frame().unwrap().timestamp);
        }
        assert!(log.next_frame().is_none());
        assert!(log.next_frame().is_none());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(log.cursor(), 3);
        assert!(log.is_exhausted());
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let log = ReplayLog::load(Path::new("/nonexistent/recording.zst"));
        assert!(log.is_empty());
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.zst");
        std::fs::write(&path, b"definitely not zstd").unwrap();
        assert!(ReplayLog::load(&path).is_empty());

        let half_json = zstd::encode_all(&b"{\"timestamp\":"[..], 3).unwrap();
        std::fs::write(&path, half_json).unwrap();
        assert!(matches!(
            ReplayLog::try_load(&path),
            Err(ReplayError::Decode { line: 1, .. })
        ));
    }

    #[test]
    fn variable_changes_follow_cursor() {
        let mut log = ReplayLog::from_frames(vec![
            frame_with_vars(0, &[("work_mem", json!("4MB")), ("jit", json!(true))]),
            frame_with_vars(1, &[("work_mem", json!("8MB")), ("jit", json!(true))]),
            frame_with_vars(2, &[("work_mem", json!("8MB")), ("max_connections", json!(200))]),
        ]);
        assert!(log.variable_changes_since_start().is_empty());

        log.next_frame();
        log.next_frame();
        let changes = log.variable_changes_since_start();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].variable, "work_mem");
        assert_eq!(changes[0].frame_index, 1);
        assert_eq!(changes[0].old_value, Some(json!("4MB")));

        log.next_frame();
        let changes = log.variable_changes_since_start();
        assert_eq!(changes.len(), 3);
        let jit = changes.iter().find(|c| c.variable == "jit").unwrap();
        assert_eq!(jit.new_value, None);
        let max_conn = changes.iter().find(|c| c.variable == "max_connections").unwrap();
        assert_eq!(max_conn.old_value, None);
        assert_eq!(max_conn.timestamp, ts(2));
    }

    /// Records a session and checks every frame replays the exact store
    /// state it was recorded with.
    #[test]
    fn recorded_session_replays_identically() {
        let tmp = TempDir::new().unwrap();
        let catalog = vec![MetricGroup {
            name: "system_cpu",
            title: "CPU",
            source: Some(Category::SystemUtilization),
            contexts: &[SessionContext::Postgres],
            metrics: vec![MetricDefinition::rate("CPU_Percent", "CPU", Color::BLUE).smoothed()],
        }];
        let mut store = MetricStore::with_catalog(catalog.clone(), SessionContext::Postgres);
        let mut recorder = ReplayRecorder::open(
            tmp.path(),
            &Endpoint::postgres("db", 5432),
            Redactor::default(),
        )
        .unwrap();

        let mut recorded = Vec::new();
        for (i, cpu) in [5, 50, 96].iter().enumerate() {
            let snap = PollSnapshot::new()
                .with(Category::SystemUtilization, fields([("CPU_Percent", *cpu)]))
                .with(
                    Category::SessionVariables,
                    fields([("ssl_cert_file", "server.crt"), ("work_mem", "4MB")]),
                );
            store.ingest(&snap, 1.0, ts(i as i64));
            recorded.push(store.snapshot_for_persistence());
            recorder.append(ReplayFrame::capture(ts(i as i64), &snap, &store, 0.01));
        }
        recorder.close();

        let live_values: Vec<f64> = store
            .get_series("system_cpu.CPU_Percent")
            .unwrap()
            .values
            .iter()
            .copied()
            .collect();
        assert_eq!(live_values, vec![45.0, 46.0]);

        let mut log = ReplayLog::load(recorder.path());
        assert_eq!(log.len(), 3);
        let mut replayed = MetricStore::with_catalog(catalog, SessionContext::Postgres);
        let mut index = 0;
        while let Some(frame) = log.next_frame() {
            assert!(!frame.session_variables.contains_key("ssl_cert_file"));
            assert!(frame.session_variables.contains_key("work_mem"));
            replayed.load_from_persistence(&frame.metric_store_snapshot);
            assert_eq!(replayed.snapshot_for_persistence(), recorded[index]);
            index += 1;
        }
        assert_eq!(index, 3);
        assert_eq!(
            replayed.get_series("system_cpu.CPU_Percent").unwrap().values,
            std::collections::VecDeque::from(vec![45.0, 46.0])
        );
    }
}
