//! JSONL record files
//!
//! One `TelemetryRecord` per line. Used to seed a `MemoryStore` and to
//! write enriched batches from the offline CLI.

use crate::error::StorageResult;
use async_trait::async_trait;
use olly_core::plugins::{PluginError, PluginInfo, PluginResult, RecordSink};
use olly_core::telemetry::TelemetryRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// JSONL sink configuration
#[derive(Debug, Clone)]
pub struct JsonlSinkConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to existing file
    pub append: bool,

    /// Flush after each batch
    pub flush_each: bool,
}

impl JsonlSinkConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append: false,
            flush_each: true,
        }
    }
}

/// Writes records to a JSONL file
pub struct JsonlSink {
    config: JsonlSinkConfig,
    writer: Mutex<BufWriter<File>>,
    records_written: AtomicU64,
}

impl JsonlSink {
    pub fn open(config: JsonlSinkConfig) -> PluginResult<Self> {
        let file = if config.append {
            OpenOptions::new().create(true).append(true).open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL sink writing to: {:?}", config.path);

        Ok(Self {
            config,
            writer: Mutex::new(BufWriter::new(file)),
            records_written: AtomicU64::new(0),
        })
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }
}

impl PluginInfo for JsonlSink {
    fn name(&self) -> &str {
        "jsonl-sink"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Writes telemetry records to JSONL files"
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn write_batch(&self, records: &[TelemetryRecord]) -> PluginResult<()> {
        let mut w = self
            .writer
            .lock()
            .map_err(|e| PluginError::OperationFailed(format!("Lock poisoned: {}", e)))?;

        for record in records {
            let json = serde_json::to_string(record)?;
            writeln!(w, "{}", json)?;
        }

        if self.config.flush_each {
            w.flush()?;
        }

        self.records_written
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> PluginResult<()> {
        let mut w = self
            .writer
            .lock()
            .map_err(|e| PluginError::OperationFailed(format!("Lock poisoned: {}", e)))?;
        w.flush()?;
        Ok(())
    }
}

/// Read every record from a JSONL file
///
/// Blank lines are skipped. A malformed line is logged and skipped so one bad
/// record does not hide the rest of the file.
pub fn read_records(path: impl AsRef<Path>) -> StorageResult<Vec<TelemetryRecord>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<TelemetryRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping {:?} line {}: {}", path, idx + 1, e),
        }
    }

    Ok(records)
}
