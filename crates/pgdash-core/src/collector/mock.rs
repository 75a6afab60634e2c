//! In-memory fakes for testing without a live server or a real `/proc`.
//!
//! - `MockFs` simulates a filesystem, with a `typical_system()` fixture.
//! - `ScriptedSource` is a `DataSource` that plays back queued results.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{AdHocCommand, AdHocOutput, DataSource, FileSystem, SourceError};
use crate::snapshot::{Category, PollSnapshot};

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content, replacing any previous content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Two CPUs, 16 GiB of memory half available, one real disk plus a loop
    /// device, one NIC plus loopback.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();
        fs.add_file(
            "/proc/stat",
            "cpu  100 0 0 900 0 0 0 0 0 0\n\
             cpu0 50 0 0 450 0 0 0 0 0 0\n\
             cpu1 50 0 0 450 0 0 0 0 0 0\n\
             ctxt 123456\n\
             btime 1700000000\n",
        );
        fs.add_file(
            "/proc/meminfo",
            "MemTotal:       16384 kB\n\
             MemFree:         4096 kB\n\
             MemAvailable:    8192 kB\n\
             Buffers:          512 kB\n",
        );
        fs.add_file(
            "/proc/diskstats",
            "   7       0 loop0 50 0 100 10 0 0 0 0 0 10 10\n\
             \x20  8       0 sda 1000 10 8000 500 2000 20 16000 800 0 1200 1300\n",
        );
        fs.add_file(
            "/proc/net/dev",
            "Inter-|   Receive                                                |  Transmit\n \
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n\
             \x20   lo: 500 5 0 0 0 0 0 0 500 5 0 0 0 0 0 0\n\
             \x20 eth0: 1000 10 0 0 0 0 0 0 2000 20 0 0 0 0 0 0\n",
        );
        fs.add_file("/proc/uptime", "3600.55 7000.00\n");
        fs
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();
        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }
        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }
        Ok(entries.into_iter().collect())
    }
}

#[derive(Default)]
struct Script {
    connected: bool,
    connect_results: VecDeque<Result<(), SourceError>>,
    fetch_results: VecDeque<Result<PollSnapshot, SourceError>>,
    ad_hoc_results: VecDeque<Result<AdHocOutput, SourceError>>,
    ad_hoc_gate: Option<Receiver<()>>,
    requested: Vec<Vec<Category>>,
    connect_calls: usize,
    fetch_calls: usize,
    ad_hoc_calls: usize,
}

/// A `DataSource` that replays queued results.
///
/// Clones share the same script, so a test keeps one handle while the
/// scheduler owns another. When a queue runs dry, connects succeed, fetches
/// return an empty snapshot and ad-hoc commands return `Done(true)`.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A panicking test thread must not hide the real failure.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_connect(&self, result: Result<(), SourceError>) -> &Self {
        self.script().connect_results.push_back(result);
        self
    }

    pub fn push_snapshot(&self, snapshot: PollSnapshot) -> &Self {
        self.script().fetch_results.push_back(Ok(snapshot));
        self
    }

    pub fn push_fetch_error(&self, error: SourceError) -> &Self {
        self.script().fetch_results.push_back(Err(error));
        self
    }

    pub fn push_ad_hoc(&self, result: Result<AdHocOutput, SourceError>) -> &Self {
        self.script().ad_hoc_results.push_back(result);
        self
    }

    /// Makes the next ad-hoc command block until the returned sender fires
    /// (or is dropped).
    pub fn gate_next_ad_hoc(&self) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.script().ad_hoc_gate = Some(rx);
        tx
    }

    pub fn connect_calls(&self) -> usize {
        self.script().connect_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.script().fetch_calls
    }

    pub fn ad_hoc_calls(&self) -> usize {
        self.script().ad_hoc_calls
    }

    /// Categories requested by each fetch so far.
    pub fn requested(&self) -> Vec<Vec<Category>> {
        self.script().requested.clone()
    }
}

impl DataSource for ScriptedSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        let mut script = self.script();
        script.connect_calls += 1;
        let result = script.connect_results.pop_front().unwrap_or(Ok(()));
        script.connected = result.is_ok();
        result
    }

    fn is_connected(&self) -> bool {
        self.script().connected
    }

    fn close(&mut self) {
        self.script().connected = false;
    }

    fn fetch_snapshot(&mut self, categories: &[Category]) -> Result<PollSnapshot, SourceError> {
        let mut script = self.script();
        script.fetch_calls += 1;
        script.requested.push(categories.to_vec());
        if !script.connected {
            return Err(SourceError::Connection("not connected".into()));
        }
        let result = script
            .fetch_results
            .pop_front()
            .unwrap_or_else(|| Ok(PollSnapshot::new()));
        if let Err(SourceError::Connection(_)) = &result {
            script.connected = false;
        }
        result
    }

    fn run_ad_hoc(&mut self, _command: &AdHocCommand) -> Result<AdHocOutput, SourceError> {
        let gate = {
            let mut script = self.script();
            script.ad_hoc_calls += 1;
            script.ad_hoc_gate.take()
        };
        if let Some(rx) = gate {
            let _ = rx.recv();
        }
        self.script()
            .ad_hoc_results
            .pop_front()
            .unwrap_or(Ok(AdHocOutput::Done(true)))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fields;

    #[test]
    fn mock_fs_add_file_creates_parents() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal: 16384 kB\n");

        assert!(fs.exists(Path::new("/proc/meminfo")));
        assert!(fs.exists(Path::new("/proc")));
        assert_eq!(
            fs.read_to_string(Path::new("/proc/meminfo")).unwrap(),
            "MemTotal: 16384 kB\n"
        );
    }

    #[test]
    fn mock_fs_read_dir() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/net/dev", "x");
        fs.add_file("/proc/stat", "y");
        assert_eq!(fs.read_dir(Path::new("/proc")).unwrap().len(), 2);
        assert_eq!(
            fs.read_to_string(Path::new("/nonexistent")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn scripted_source_plays_queue() {
        let source = ScriptedSource::new();
        source
            .push_snapshot(PollSnapshot::new().with(Category::DatabaseStats, fields([("x", 1)])))
            .push_fetch_error(SourceError::Connection("reset".into()));

        let mut polled = source.clone();
        assert!(polled.fetch_snapshot(&[]).is_err());
        polled.connect().unwrap();
        let first = polled.fetch_snapshot(&[Category::DatabaseStats]).unwrap();
        assert!(first.contains(Category::DatabaseStats));
        assert!(polled.fetch_snapshot(&[]).is_err());
        assert!(!polled.is_connected());
        assert_eq!(source.fetch_calls(), 3);
        assert_eq!(source.requested()[1], vec![Category::DatabaseStats]);
    }
}
