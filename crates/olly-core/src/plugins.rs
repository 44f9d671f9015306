//! Plugin traits for pipeline stages
//!
//! The ingest pipeline is a chain of batch processors followed by record
//! sinks. Both are traits so the enrichment stage, storage backends and test
//! doubles plug in the same way.

use crate::telemetry::TelemetryRecord;
use async_trait::async_trait;
use thiserror::Error;

/// Plugin error type
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Plugin operation failed: {0}")]
    OperationFailed(String),

    #[error("Plugin configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Basic plugin information
pub trait PluginInfo {
    /// Plugin name
    fn name(&self) -> &str;

    /// Plugin version
    fn version(&self) -> &str;

    /// Plugin description
    fn description(&self) -> &str {
        ""
    }
}

/// Pure batch transform
///
/// A processor must hand back every record it was given; failures are
/// absorbed inside the processor so delivery is never blocked.
pub trait BatchProcessor: PluginInfo + Send + Sync {
    fn process(&self, batch: Vec<TelemetryRecord>) -> Vec<TelemetryRecord>;
}

/// Destination for processed records
#[async_trait]
pub trait RecordSink: PluginInfo + Send + Sync {
    /// Write a batch of records
    async fn write_batch(&self, records: &[TelemetryRecord]) -> PluginResult<()>;

    /// Flush any buffered records
    async fn flush(&self) -> PluginResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PluginError::OperationFailed("sink closed".into());
        assert_eq!(err.to_string(), "Plugin operation failed: sink closed");

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PluginError = io.into();
        assert!(matches!(err, PluginError::IoError(_)));
    }
}
