//! Side channels for rejected records and per-source logs
//!
//! A [`RecordSink`] is shared by a worker and the completions of its
//! requests, so every write goes through a mutex. In [`SinkFormat::JsonArray`]
//! mode the output is a well-formed JSON array: `"[\n"` before the first
//! record, `",\n"` before each later one, `"\n"` after every record and
//! `"]\n"` at close. A sink that never received a record writes nothing.

use crate::lock;
use cqlbulk_common::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Framing of the records written to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkFormat {
    /// One record per line
    #[default]
    Lines,
    /// Records wrapped in a JSON array
    JsonArray,
}

struct SinkState {
    writer: Box<dyn Write + Send>,
    written: u64,
    closed: bool,
}

pub struct RecordSink {
    state: Mutex<SinkState>,
    format: SinkFormat,
}

impl RecordSink {
    pub fn new(writer: Box<dyn Write + Send>, format: SinkFormat) -> Self {
        Self { state: Mutex::new(SinkState { writer, written: 0, closed: false }), format }
    }

    /// Creates (or truncates) `path` and writes records to it.
    pub fn create(path: &Path, format: SinkFormat) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file)), format))
    }

    /// Appends one record; `record` must not end with a newline.
    pub fn write_record(&self, record: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Ok(());
        }
        if self.format == SinkFormat::JsonArray {
            let prefix: &[u8] = if state.written == 0 { b"[\n" } else { b",\n" };
            state.writer.write_all(prefix)?;
        }
        state.writer.write_all(record.as_bytes())?;
        state.writer.write_all(b"\n")?;
        state.written += 1;
        Ok(())
    }

    /// Records written so far
    pub fn written(&self) -> u64 {
        lock(&self.state).written
    }

    /// Terminates the array (if any) and flushes. Later writes are ignored.
    pub fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if self.format == SinkFormat::JsonArray && state.written > 0 {
            state.writer.write_all(b"]\n")?;
        }
        state.writer.flush()?;
        Ok(())
    }
}

impl Drop for RecordSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close record sink");
        }
    }
}

/// Sinks attached to one load source
#[derive(Clone, Default)]
pub struct LoadSinks {
    pub bad_parse: Option<Arc<RecordSink>>,
    pub bad_insert: Option<Arc<RecordSink>>,
    pub log: Option<Arc<RecordSink>>,
}

impl LoadSinks {
    /// Creates `<stem>.BADPARSE`, `<stem>.BADINSERT` and `<stem>.LOG` in `dir`.
    ///
    /// # Arguments
    ///
    /// * `dir` - Existing directory for the three files
    /// * `stem` - Usually the source file name
    /// * `json_array` - Wrap rejected records in a JSON array (JSON array input)
    pub fn in_dir(dir: &Path, stem: &str, json_array: bool) -> Result<Self> {
        let format = if json_array { SinkFormat::JsonArray } else { SinkFormat::Lines };
        Ok(Self {
            bad_parse: Some(Arc::new(RecordSink::create(&dir.join(format!("{stem}.BADPARSE")), format)?)),
            bad_insert: Some(Arc::new(RecordSink::create(&dir.join(format!("{stem}.BADINSERT")), format)?)),
            log: Some(Arc::new(RecordSink::create(&dir.join(format!("{stem}.LOG")), SinkFormat::Lines)?)),
        })
    }

    /// Writes `line` to the log sink, if any; failures are logged and dropped.
    pub fn log_line(&self, line: &str) {
        if let Some(log) = &self.log {
            if let Err(e) = log.write_record(line) {
                warn!(error = %e, "Failed to write log sink");
            }
        }
    }

    pub fn close(&self) -> Result<()> {
        for sink in [&self.bad_parse, &self.bad_insert, &self.log].into_iter().flatten() {
            sink.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Writer whose bytes stay readable after the sink takes ownership
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_json_array_framing() {
        let out = Shared::default();
        let sink = RecordSink::new(Box::new(out.clone()), SinkFormat::JsonArray);
        sink.write_record(r#"{"a":1}"#).unwrap();
        sink.write_record(r#"{"a":2}"#).unwrap();
        sink.close().unwrap();
        assert_eq!(out.text(), "[\n{\"a\":1}\n,\n{\"a\":2}\n]\n");
        assert_eq!(sink.written(), 2);
    }

    #[test]
    fn test_empty_json_array_writes_nothing() {
        let out = Shared::default();
        drop(RecordSink::new(Box::new(out.clone()), SinkFormat::JsonArray));
        assert_eq!(out.text(), "");
    }

    #[test]
    fn test_lines_and_close_is_final() {
        let out = Shared::default();
        let sink = RecordSink::new(Box::new(out.clone()), SinkFormat::Lines);
        sink.write_record("1,a").unwrap();
        sink.close().unwrap();
        sink.write_record("2,b").unwrap();
        sink.close().unwrap();
        assert_eq!(out.text(), "1,a\n");
    }

    #[test]
    fn test_load_sinks_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = LoadSinks::in_dir(dir.path(), "data.csv", false).unwrap();
        sinks.bad_parse.as_ref().unwrap().write_record("x,y").unwrap();
        sinks.log_line("DONE");
        sinks.close().unwrap();

        let bad = std::fs::read_to_string(dir.path().join("data.csv.BADPARSE")).unwrap();
        assert_eq!(bad, "x,y\n");
        let log = std::fs::read_to_string(dir.path().join("data.csv.LOG")).unwrap();
        assert_eq!(log, "DONE\n");
        assert!(dir.path().join("data.csv.BADINSERT").exists());
    }
}
