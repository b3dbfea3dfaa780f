//! Per-port ingestion pipeline
//!
//! Raw chunks read from a port are pushed into an unbounded FIFO queue and
//! consumed by a single worker thread, which hands each chunk to a
//! [`ChunkHandler`]. One chunk becomes one message; chunks containing
//! several lines are not re-split.
//!
//! # Shutdown
//!
//! [`IngestionPipeline::stop`] closes the queue (later enqueues are rejected
//! with `PipelineClosed`), signals cancellation, and joins the worker. Chunks
//! that were accepted before the close are still delivered, so nothing that
//! was enqueued successfully is lost.

use crate::error::{Result, SerialBenchError};
use crate::sync;
use crate::types::PortName;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Consumer side of a pipeline
pub trait ChunkHandler: Send + 'static {
    /// Process one chunk, in queue order
    fn on_chunk(&mut self, chunk: String);

    /// Called when the queue has been idle for the configured tick
    fn on_idle(&mut self, _now: Instant) {}
}

/// Producer handle used by the port reader
#[derive(Debug, Clone)]
pub struct PipelineProducer {
    port: PortName,
    sender: Arc<Mutex<Option<Sender<String>>>>,
}

impl PipelineProducer {
    /// Queue a chunk; never blocks
    pub fn enqueue(&self, chunk: String) -> Result<()> {
        let guard = sync::lock(&self.sender);
        match guard.as_ref() {
            Some(tx) => tx
                .send(chunk)
                .map_err(|_| SerialBenchError::PipelineClosed(self.port.to_string())),
            None => Err(SerialBenchError::PipelineClosed(self.port.to_string())),
        }
    }

    /// Stop accepting chunks
    pub fn close(&self) {
        sync::lock(&self.sender).take();
    }

    /// Whether the queue still accepts chunks
    pub fn is_open(&self) -> bool {
        sync::lock(&self.sender).is_some()
    }
}

/// Queue plus single consumer thread for one port
#[derive(Debug)]
pub struct IngestionPipeline {
    producer: PipelineProducer,
    cancel: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl IngestionPipeline {
    /// Start the consumer thread
    pub fn start<H: ChunkHandler>(
        port: PortName,
        idle_tick: Duration,
        handler: H,
    ) -> Result<Self> {
        let (tx, rx) = unbounded::<String>();
        let (cancel, cancel_rx) = bounded::<()>(1);

        let worker_port = port.clone();
        let worker = std::thread::Builder::new()
            .name(format!("ingest-{}", port))
            .spawn(move || consume(worker_port, rx, cancel_rx, idle_tick, handler))?;

        Ok(Self {
            producer: PipelineProducer {
                port,
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            cancel,
            worker: Some(worker),
        })
    }

    /// A producer handle for the reader thread
    pub fn producer(&self) -> PipelineProducer {
        self.producer.clone()
    }

    /// Whether the consumer thread is still running
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Close the queue, cancel, and wait for the consumer to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.producer.close();
        let _ = self.cancel.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Ingestion worker for {} panicked", self.producer.port);
            }
        }
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consume<H: ChunkHandler>(
    port: PortName,
    rx: Receiver<String>,
    cancel_rx: Receiver<()>,
    idle_tick: Duration,
    mut handler: H,
) {
    tracing::debug!("Ingestion pipeline for {} started", port);
    let mut delivered: u64 = 0;

    loop {
        select! {
            recv(cancel_rx) -> _ => {
                // Deliver whatever was accepted before the queue closed
                while let Ok(chunk) = rx.try_recv() {
                    handler.on_chunk(chunk);
                    delivered += 1;
                }
                break;
            }
            recv(rx) -> msg => match msg {
                Ok(chunk) => {
                    handler.on_chunk(chunk);
                    delivered += 1;
                }
                // Queue closed and fully drained
                Err(_) => break,
            },
            default(idle_tick) => handler.on_idle(Instant::now()),
        }
    }

    tracing::debug!(
        "Ingestion pipeline for {} stopped after {} chunks",
        port,
        delivered
    );
}
