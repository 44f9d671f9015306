//! Ingest pipeline - runs record batches through processors into sinks

use crate::plugins::{BatchProcessor, PluginError, PluginResult, RecordSink};
use crate::telemetry::TelemetryRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Channel buffer size for incoming batches
    pub batch_buffer_size: usize,

    /// Channel buffer size for the processed-batch broadcast
    pub broadcast_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_buffer_size: 1024,
            broadcast_buffer_size: 256,
        }
    }
}

/// Batch pipeline: processors in registration order, then every sink
pub struct Pipeline {
    config: PipelineConfig,

    processors: Vec<Arc<dyn BatchProcessor>>,

    sinks: Vec<Arc<dyn RecordSink>>,

    /// Broadcast of processed batches (for live views, tests)
    batch_broadcast: broadcast::Sender<Arc<Vec<TelemetryRecord>>>,

    running: Arc<AtomicBool>,

    shutdown_tx: Option<broadcast::Sender<()>>,

    task: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let (batch_broadcast, _) = broadcast::channel(config.broadcast_buffer_size.max(1));

        Self {
            config,
            processors: Vec::new(),
            sinks: Vec::new(),
            batch_broadcast,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Add a processor; processors run in the order they were added
    pub fn add_processor(&mut self, processor: Arc<dyn BatchProcessor>) {
        self.processors.push(processor);
    }

    /// Add a sink
    pub fn add_sink(&mut self, sink: Arc<dyn RecordSink>) {
        self.sinks.push(sink);
    }

    /// Subscribe to processed batches
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<TelemetryRecord>>> {
        self.batch_broadcast.subscribe()
    }

    /// Run one batch synchronously through the pipeline
    pub async fn run_batch(&self, batch: Vec<TelemetryRecord>) -> Vec<TelemetryRecord> {
        let processed = Self::apply_processors(&self.processors, batch);
        Self::deliver(&self.sinks, &processed).await;
        let _ = self.batch_broadcast.send(Arc::new(processed.clone()));
        processed
    }

    /// Start the background loop; returns the sender that feeds it
    pub fn start(&mut self) -> PluginResult<mpsc::Sender<Vec<TelemetryRecord>>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PluginError::OperationFailed("Pipeline already running".into()));
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<TelemetryRecord>>(self.config.batch_buffer_size.max(1));

        let processors = self.processors.clone();
        let sinks = self.sinks.clone();
        let batch_broadcast = self.batch_broadcast.clone();
        let running = self.running.clone();

        info!(
            "Starting pipeline: {} processors, {} sinks",
            processors.len(),
            sinks.len()
        );

        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_batch = batch_rx.recv() => {
                        match maybe_batch {
                            Some(batch) => {
                                Self::handle(batch, &processors, &sinks, &batch_broadcast).await;
                            }
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Pipeline shutdown signal received");
                        while let Ok(batch) = batch_rx.try_recv() {
                            Self::handle(batch, &processors, &sinks, &batch_broadcast).await;
                        }
                        break;
                    }
                }
            }

            for sink in &sinks {
                if let Err(e) = sink.flush().await {
                    warn!("Error flushing sink {}: {}", sink.name(), e);
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("Pipeline stopped");
        }));

        Ok(batch_tx)
    }

    /// Stop the loop, draining queued batches and flushing sinks
    pub async fn stop(&mut self) -> PluginResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| PluginError::OperationFailed(format!("pipeline task failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn handle(
        batch: Vec<TelemetryRecord>,
        processors: &[Arc<dyn BatchProcessor>],
        sinks: &[Arc<dyn RecordSink>],
        batch_broadcast: &broadcast::Sender<Arc<Vec<TelemetryRecord>>>,
    ) {
        debug!("Received batch of {} records", batch.len());
        let processed = Self::apply_processors(processors, batch);
        Self::deliver(sinks, &processed).await;
        let _ = batch_broadcast.send(Arc::new(processed));
    }

    fn apply_processors(processors: &[Arc<dyn BatchProcessor>], batch: Vec<TelemetryRecord>) -> Vec<TelemetryRecord> {
        processors
            .iter()
            .fold(batch, |batch, processor| processor.process(batch))
    }

    async fn deliver(sinks: &[Arc<dyn RecordSink>], records: &[TelemetryRecord]) {
        if records.is_empty() {
            return;
        }
        for sink in sinks {
            if let Err(e) = sink.write_batch(records).await {
                warn!("Sink {} failed: {}", sink.name(), e);
            }
        }
    }
}
