//! Port session: one open port, its reader thread and its pipeline
//!
//! A [`PortSession`] owns everything that belongs to a single open port:
//!
//! - the write half, behind a mutex shared with senders ([`SessionWriter`])
//! - a reader thread that polls the read half and feeds the pipeline
//! - the [`IngestionPipeline`] that turns chunks into messages
//!
//! # Reader Loop
//!
//! The reader asks the transport for whatever is buffered. When nothing is
//! pending it waits `poll_interval` on its stop channel, so shutdown is
//! observed within one interval. A read error marks the session faulted,
//! closes the pipeline queue and calls the fault hook; the session then stays
//! registered (but not connected) until it is torn down.
//!
//! # Shutdown Order
//!
//! 1. stop and join the reader thread
//! 2. stop and join the pipeline consumer (queued chunks are still delivered)
//! 3. close the write half, releasing the OS handle

use super::pipeline::{ChunkHandler, IngestionPipeline, PipelineProducer};
use super::transport::{PortLink, PortReader, PortWriter};
use crate::error::{Result, SerialBenchError};
use crate::sync;
use crate::types::{PortName, SerialSettings};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Called from the reader thread when the transport fails
pub type FaultHook = Box<dyn Fn(&PortName, &SerialBenchError) + Send + 'static>;

/// Timing knobs for a session's threads
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Wait between reads when nothing is buffered
    pub poll_interval: Duration,
    /// Idle tick for the pipeline consumer
    pub idle_tick: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            idle_tick: Duration::from_millis(250),
        }
    }
}

/// Counters for one session
#[derive(Debug, Default)]
struct SessionCounters {
    chunks_read: AtomicU64,
    bytes_read: AtomicU64,
    lines_written: AtomicU64,
    write_failures: AtomicU64,
}

/// Snapshot of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub chunks_read: u64,
    pub bytes_read: u64,
    pub lines_written: u64,
    pub write_failures: u64,
}

/// Shared write half of a session
///
/// Cloned into senders (manual send, auto-send) so a write never holds the
/// registry's session map. Closing takes the writer out under the same lock,
/// so a send racing with disconnect either completes or sees `NotConnected`.
#[derive(Clone)]
pub struct SessionWriter {
    port: PortName,
    inner: Arc<Mutex<Option<Box<dyn PortWriter>>>>,
    counters: Arc<SessionCounters>,
}

impl SessionWriter {
    /// Write one line
    pub fn send_line(&self, text: &str) -> Result<()> {
        let mut guard = sync::lock(&self.inner);
        let writer = guard
            .as_mut()
            .ok_or_else(|| SerialBenchError::NotConnected(self.port.to_string()))?;

        match writer.write_line(text) {
            Ok(()) => {
                self.counters.lines_written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn close(&self) {
        if let Some(mut writer) = sync::lock(&self.inner).take() {
            writer.close();
        }
    }

    pub fn is_open(&self) -> bool {
        sync::lock(&self.inner).is_some()
    }
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWriter")
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}

/// One open port
#[derive(Debug)]
pub struct PortSession {
    port: PortName,
    settings: SerialSettings,
    opened_at: DateTime<Utc>,
    writer: SessionWriter,
    counters: Arc<SessionCounters>,
    faulted: Arc<AtomicBool>,
    reader_stop: Option<Sender<()>>,
    reader: Option<JoinHandle<()>>,
    pipeline: Option<IngestionPipeline>,
}

impl PortSession {
    /// Start the pipeline and the reader thread on an opened link
    ///
    /// If a thread cannot be spawned the link is closed and nothing keeps
    /// running.
    pub fn start<H: ChunkHandler>(
        port: PortName,
        settings: SerialSettings,
        link: PortLink,
        handler: H,
        options: SessionOptions,
        on_fault: FaultHook,
    ) -> Result<Self> {
        let PortLink { reader, mut writer } = link;
        let counters = Arc::new(SessionCounters::default());

        let pipeline = match IngestionPipeline::start(port.clone(), options.idle_tick, handler) {
            Ok(p) => p,
            Err(e) => {
                writer.close();
                return Err(e);
            }
        };

        let writer = SessionWriter {
            port: port.clone(),
            inner: Arc::new(Mutex::new(Some(writer))),
            counters: counters.clone(),
        };

        let faulted = Arc::new(AtomicBool::new(false));
        let (reader_stop, stop_rx) = bounded::<()>(1);

        let reader_loop = ReaderLoop {
            port: port.clone(),
            reader,
            producer: pipeline.producer(),
            stop_rx,
            poll_interval: options.poll_interval,
            counters: counters.clone(),
            faulted: faulted.clone(),
            on_fault,
            pending: Vec::new(),
        };

        let reader = match std::thread::Builder::new()
            .name(format!("reader-{}", port))
            .spawn(move || reader_loop.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                pipeline.stop();
                writer.close();
                return Err(e.into());
            }
        };

        Ok(Self {
            port,
            settings,
            opened_at: Utc::now(),
            writer,
            counters,
            faulted,
            reader_stop: Some(reader_stop),
            reader: Some(reader),
            pipeline: Some(pipeline),
        })
    }

    pub fn port(&self) -> &PortName {
        &self.port
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Handle for writing to this port
    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    /// Whether the reader hit a transport error
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            chunks_read: self.counters.chunks_read.load(Ordering::Relaxed),
            bytes_read: self.counters.bytes_read.load(Ordering::Relaxed),
            lines_written: self.counters.lines_written.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop every thread and release the port
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(stop) = self.reader_stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::error!("Reader thread for {} panicked", self.port);
            }
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        self.writer.close();
    }
}

impl Drop for PortSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReaderLoop {
    port: PortName,
    reader: Box<dyn PortReader>,
    producer: PipelineProducer,
    stop_rx: Receiver<()>,
    poll_interval: Duration,
    counters: Arc<SessionCounters>,
    faulted: Arc<AtomicBool>,
    on_fault: FaultHook,
    /// Start of a UTF-8 sequence cut off by the previous read
    pending: Vec<u8>,
}

impl ReaderLoop {
    fn run(mut self) {
        tracing::debug!("Reader for {} started", self.port);

        loop {
            match self.stop_rx.try_recv() {
                Ok(()) | Err(crossbeam_channel::TryRecvError::Disconnected) => break,
                Err(crossbeam_channel::TryRecvError::Empty) => {}
            }

            match self.reader.read_available() {
                Ok(Some(bytes)) if !bytes.is_empty() => {
                    self.counters.chunks_read.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .bytes_read
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);

                    let chunk = decode_chunk(&mut self.pending, &bytes);
                    if chunk.is_empty() {
                        continue;
                    }
                    if self.producer.enqueue(chunk).is_err() {
                        tracing::debug!("Pipeline for {} closed, reader exiting", self.port);
                        break;
                    }
                }
                Ok(_) => match self.stop_rx.recv_timeout(self.poll_interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                },
                Err(e) => {
                    tracing::error!("Read failed on {}, stopping its pipeline: {}", self.port, e);
                    self.faulted.store(true, Ordering::SeqCst);
                    self.producer.close();
                    (self.on_fault)(&self.port, &e);
                    break;
                }
            }
        }

        tracing::debug!("Reader for {} stopped", self.port);
    }
}

/// Decode `bytes` behind any carried-over prefix
///
/// A multi-byte character split across reads is held back in `pending` until
/// the rest arrives. Other invalid sequences are replaced with U+FFFD.
fn decode_chunk(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);
    let complete = pending.len() - incomplete_tail(pending);
    let text = String::from_utf8_lossy(&pending[..complete]).into_owned();
    pending.drain(..complete);
    text
}

/// Length of a truncated UTF-8 sequence at the end of `bytes`, or 0
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return 0,
        };
        return if width > back { back } else { 0 };
    }
    0
}
