//! Append-only JSONL output
//!
//! Each record is written as one JSON object per line and flushed
//! immediately, so a crash loses at most the line being written.

use crate::records::CrawlRecord;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open output file: {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, record: &CrawlRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record).context("Failed to serialize record")?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .with_context(|| format!("Failed to write to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{sample_call, sample_event};
    use tempfile::TempDir;

    #[test]
    fn test_appends_one_line_per_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.jsonl");

        let mut sink = JsonlSink::open(&path).unwrap();
        sink.write(&CrawlRecord::Call(sample_call(1, 1))).unwrap();
        drop(sink);

        // Reopening appends instead of truncating
        let mut sink = JsonlSink::open(&path).unwrap();
        sink.write(&CrawlRecord::Event(sample_event(2, 2, 0))).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: CrawlRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, CrawlRecord::Call(sample_call(1, 1)));
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "event");
    }
}
