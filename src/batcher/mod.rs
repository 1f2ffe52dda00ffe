//! Windowed batching buffer
//!
//! The batcher coalesces many small payloads into fewer, larger ones.
//!
//! ## Flush Triggers
//!
//! - **Time trigger**: a timer actor flushes every `interval` (zero disables it)
//! - **Size trigger**: `add` flushes from the caller once the buffered bytes
//!   exceed `max_bytes` (zero disables it)
//!
//! ## Message Flow
//!
//! ```text
//! add(payload) → [buffer + byte counter] ──┬── size trigger ──┐
//!                                           └── timer tick ────┴→ swap buffer → combine → deliver (in order)
//!     ↑
//!     └─── Commands to the timer actor (UpdateInterval, Exit)
//! ```
//!
//! Only the buffer swap holds the lock. Combining and delivery run outside of
//! it, so producers keep adding while a flush is in progress and two flushes
//! may overlap. The size check in `add` happens after the lock is released;
//! concurrent adds may therefore both flush, in which case the later flush
//! finds an empty buffer and does nothing.

mod combine;
mod deliver;
mod messages;

pub use combine::{Combine, Concat, JsonArray};
pub use deliver::Deliver;
pub use messages::{BatcherCommand, BatcherStats};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::BatchConfig;

/// Handle to a running batcher
///
/// The handle can be cloned and shared across tasks. When every clone is
/// dropped, the timer actor flushes what is left and stops.
#[derive(Clone)]
pub struct Batcher {
    shared: Arc<Shared>,
    sender: mpsc::Sender<BatcherCommand>,
}

/// Payloads waiting for the next flush
#[derive(Debug, Default)]
struct Buffer {
    payloads: Vec<Bytes>,

    /// Always the sum of `payloads` lengths
    bytes: usize,
}

struct Shared {
    buffer: Mutex<Buffer>,
    max_bytes: AtomicUsize,

    /// Set by `exit`; disables the size trigger
    exited: AtomicBool,

    combine: Box<dyn Combine>,
    deliver: Box<dyn Deliver>,

    flush_count: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn buffered_bytes(&self) -> usize {
        self.buffer.lock().bytes
    }

    async fn flush(&self) {
        let batch = std::mem::take(&mut *self.buffer.lock());

        if batch.payloads.is_empty() {
            return;
        }

        let count = batch.payloads.len();
        let outputs = self.combine.combine(batch.payloads);
        self.flush_count.fetch_add(1, Ordering::Relaxed);

        debug!(
            payloads = count,
            bytes = batch.bytes,
            outputs = outputs.len(),
            "flushing batch"
        );

        for output in outputs.into_iter().filter(|output| !output.is_empty()) {
            let size = output.len();

            match self.deliver.deliver(output).await {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    trace!("delivered {size} bytes");
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    error!("failed to deliver batch of {size} bytes: {e:#}");
                }
            }
        }
    }
}

impl Batcher {
    /// Create a batcher and spawn its timer actor
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        combine: impl Combine + 'static,
        deliver: impl Deliver + 'static,
        interval: Duration,
        max_bytes: usize,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let shared = Arc::new(Shared {
            buffer: Mutex::new(Buffer::default()),
            max_bytes: AtomicUsize::new(max_bytes),
            exited: AtomicBool::new(false),
            combine: Box::new(combine),
            deliver: Box::new(deliver),
            flush_count: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let actor = BatcherActor {
            shared: shared.clone(),
            command_rx: cmd_rx,
            interval,
        };

        tokio::spawn(actor.run());

        Self {
            shared,
            sender: cmd_tx,
        }
    }

    /// Create a batcher from configuration
    pub fn from_config(
        combine: impl Combine + 'static,
        deliver: impl Deliver + 'static,
        config: &BatchConfig,
    ) -> Self {
        Self::spawn(combine, deliver, config.interval(), config.max_bytes)
    }

    /// Buffer a payload, flushing right away if the threshold is exceeded
    pub async fn add(&self, payload: Bytes) {
        {
            let mut buffer = self.shared.buffer.lock();
            buffer.bytes += payload.len();
            buffer.payloads.push(payload);
        }

        if self.shared.exited.load(Ordering::Acquire) {
            return;
        }

        let max_bytes = self.shared.max_bytes.load(Ordering::Acquire);
        if max_bytes == 0 {
            return;
        }

        let buffered = self.shared.buffered_bytes();
        if buffered > max_bytes {
            trace!("size-based flush triggered ({buffered} > {max_bytes} bytes)");
            self.shared.flush().await;
        }
    }

    /// Combine and deliver everything buffered so far
    ///
    /// Does nothing when the buffer is empty.
    pub async fn flush(&self) {
        self.shared.flush().await;
    }

    /// Flush pending payloads, then switch to a new interval and threshold
    ///
    /// Zero disables the respective trigger.
    pub async fn reset(&self, interval: Duration, max_bytes: usize) {
        self.shared.flush().await;
        self.shared.max_bytes.store(max_bytes, Ordering::Release);

        let (tx, rx) = oneshot::channel();
        let cmd = BatcherCommand::UpdateInterval {
            interval,
            respond_to: tx,
        };

        if self.sender.send(cmd).await.is_err() || rx.await.is_err() {
            trace!("batcher timer already stopped, interval not applied");
        }
    }

    /// Flush one last time and stop automatic flushing
    ///
    /// Afterwards `add` still buffers payloads, but only an explicit
    /// [`Batcher::flush`] drains them.
    pub async fn exit(&self) {
        self.shared.exited.store(true, Ordering::Release);

        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(BatcherCommand::Exit { respond_to: tx })
            .await
            .is_err()
            || rx.await.is_err()
        {
            trace!("batcher timer already stopped");
        }
    }

    /// Current buffer occupancy and delivery counters
    pub fn stats(&self) -> BatcherStats {
        let (buffered_payloads, buffered_bytes) = {
            let buffer = self.shared.buffer.lock();
            (buffer.payloads.len(), buffer.bytes)
        };

        BatcherStats {
            buffered_payloads,
            buffered_bytes,
            flush_count: self.shared.flush_count.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

/// Actor driving the periodic flush
struct BatcherActor {
    shared: Arc<Shared>,
    command_rx: mpsc::Receiver<BatcherCommand>,
    interval: Duration,
}

impl BatcherActor {
    #[instrument(skip(self), fields(interval = ?self.interval))]
    async fn run(mut self) {
        debug!("starting batcher timer");

        let mut ticker = flush_ticker(self.interval);

        loop {
            tokio::select! {
                _ = tick(&mut ticker) => {
                    trace!("time-based flush triggered");
                    self.shared.flush().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(BatcherCommand::UpdateInterval { interval, respond_to }) => {
                            debug!("updating flush interval to {interval:?}");
                            self.interval = interval;
                            ticker = flush_ticker(interval);
                            let _ = respond_to.send(());
                        }

                        Some(BatcherCommand::Exit { respond_to }) => {
                            debug!("received exit command, final flush");
                            self.shared.flush().await;
                            let _ = respond_to.send(());
                            break;
                        }

                        None => {
                            warn!("command channel closed, final flush");
                            self.shared.flush().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("batcher timer stopped");
    }
}

/// Interval whose first tick is one period away, or `None` when disabled
fn flush_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }

    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
