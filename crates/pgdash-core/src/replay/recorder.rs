//! Appends frames of a live session to a compressed recording.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info};

use super::frame::{Redactor, ReplayFrame};
use super::{COMPRESSION_LEVEL, REPLAY_EXTENSION, ReplayError};
use crate::config::Endpoint;

/// Maximum length of the host part of a recording directory name.
const MAX_HOST_DIR_LEN: usize = 30;

/// Host part used when the endpoint has no host (local socket).
const LOCAL_HOST_DIR: &str = "local";

/// Byte sink under the compressor.
trait RecordSink: Write + Send {
    /// Flushes buffered bytes and makes them durable.
    fn sync(&mut self) -> io::Result<()>;
}

impl RecordSink for BufWriter<File> {
    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_ref().sync_all()
    }
}

type RecordWriter = zstd::stream::write::Encoder<'static, Box<dyn RecordSink>>;

/// Directory name for an endpoint's recordings: the host with every
/// non-alphanumeric character replaced by `_`, cut to 30 characters, plus
/// `_<port>` when the port is not the default one. An empty host is
/// recorded under `local`.
pub fn endpoint_dir_name(endpoint: &Endpoint) -> String {
    let mut name: String = endpoint
        .host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_HOST_DIR_LEN)
        .collect();
    if name.is_empty() {
        name.push_str(LOCAL_HOST_DIR);
    }
    if endpoint.port != endpoint.default_port {
        name.push_str(&format!("_{}", endpoint.port));
    }
    name
}

/// Writes one session's frames into a zstd stream.
///
/// Write failures never reach the live session. A frame that fails to encode
/// is dropped; an I/O failure stops the recording, since the compressor may
/// hold part of the failed record.
pub struct ReplayRecorder {
    path: PathBuf,
    writer: Option<RecordWriter>,
    redactor: Redactor,
    frames_written: usize,
}

impl ReplayRecorder {
    /// Creates `<root>/<endpoint dir>/<timestamp>.zst` and opens a compressor
    /// on it. A second recording started within the same second gets a
    /// numeric suffix instead of overwriting the first.
    pub fn open(root: &Path, endpoint: &Endpoint, redactor: Redactor) -> Result<Self, ReplayError> {
        let dir = root.join(endpoint_dir_name(endpoint));
        fs::create_dir_all(&dir)?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let (path, file) = create_unique(&dir, &stamp)?;
        Self::with_sink(path, Box::new(BufWriter::new(file)), redactor)
    }

    fn with_sink(path: PathBuf, sink: Box<dyn RecordSink>, redactor: Redactor) -> Result<Self, ReplayError> {
        let writer = zstd::stream::write::Encoder::new(sink, COMPRESSION_LEVEL)?;
        info!(path = %path.display(), "recording session");
        Ok(Self {
            path,
            writer: Some(writer),
            redactor,
            frames_written: 0,
        })
    }

    /// Redacts, serializes and writes one frame.
    pub fn append(&mut self, mut frame: ReplayFrame) {
        let Some(writer) = self.writer.as_mut() else {
            debug!("recorder closed, frame dropped");
            return;
        };
        frame.session_variables = self.redactor.redact(&frame.session_variables);

        let result = frame
            .encode()
            .and_then(|line| write_record(writer, &line).map_err(ReplayError::Io));
        match result {
            Ok(()) => self.frames_written += 1,
            Err(ReplayError::Io(e)) => {
                error!(
                    path = %self.path.display(),
                    frames = self.frames_written,
                    error = %e,
                    "failed to write replay frame, recording stopped"
                );
                self.writer = None;
            }
            Err(e) => error!(path = %self.path.display(), error = %e, "failed to encode replay frame"),
        }
    }

    /// Finishes the zstd stream and syncs the file. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let result = writer.finish().and_then(|mut sink| sink.sync());
        match result {
            Ok(()) => info!(
                path = %self.path.display(),
                frames = self.frames_written,
                bytes = self.file_size(),
                "recording closed"
            ),
            Err(e) => error!(path = %self.path.display(), error = %e, "failed to close recording"),
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Current on-disk size of the recording.
    pub fn file_size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ReplayRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

fn create_unique(dir: &Path, stamp: &str) -> io::Result<(PathBuf, File)> {
    let mut suffix = 0;
    loop {
        let name = if suffix == 0 {
            format!("{}.{}", stamp, REPLAY_EXTENSION)
        } else {
            format!("{}_{}.{}", stamp, suffix, REPLAY_EXTENSION)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Writes a record and flushes it through the compressor so the file grows
/// with every frame.
fn write_record(writer: &mut RecordWriter, line: &[u8]) -> io::Result<()> {
    writer.write_all(line)?;
    writer.flush()
}
