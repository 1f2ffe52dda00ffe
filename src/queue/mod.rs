//! Bounded task-dispatch queue
//!
//! The queue serializes named units of work onto a single worker task.
//!
//! ## Flow
//!
//! ```text
//! push_async(subject, args) ──► [slot check + index + history] ──► worker ──► handler
//!        │                                                           │
//!        └── CapacityExhausted + history snapshot (on_full)          ├── alarm (slow task)
//!                                                                    └── completion ──► TaskHandle
//! ```
//!
//! ## Guarantees
//!
//! 1. **Total order**: tasks run strictly in enqueue order, one at a time
//! 2. **Non-blocking producers**: a full queue rejects work instead of waiting
//! 3. **Exactly-once completion**: every accepted task yields one result
//!
//! Capacity counts every task that has been accepted and has not finished yet,
//! including the one the worker is currently running.

mod error;
mod handler;
mod ring;
mod task;

pub use error::{QueueError, QueueResult};
pub use handler::{AlarmFn, DiagnosticFn, TaskHandler};
pub use ring::RingHistory;
pub use task::{Task, TaskHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::QueueConfig;

use handler::Alarm;
use task::Job;

/// Default number of concurrently pending tasks
pub const DEFAULT_CAPACITY: usize = 8;

/// Largest capacity a queue is built with
pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Handle to a running task queue
///
/// The handle can be cloned and shared across tasks; all clones feed the same
/// worker. The worker stops once [`TaskQueue::shutdown`] is called or every
/// clone has been dropped.
pub struct TaskQueue<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for TaskQueue<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<A> {
    /// Immutable subject → handler registry
    handlers: HashMap<String, Arc<dyn TaskHandler<A>>>,

    /// One permit per pending task
    slots: Arc<Semaphore>,

    capacity: usize,

    /// Everything that must change together on enqueue
    intake: Mutex<Intake<A>>,

    on_full: Option<DiagnosticFn<A>>,

    /// Flips to `true` once the worker has drained and exited
    stopped: watch::Receiver<bool>,
}

struct Intake<A> {
    /// `None` once the queue has been shut down
    sender: Option<mpsc::UnboundedSender<Job<A>>>,
    next_index: u8,
    history: RingHistory<Task<A>>,
}

impl<A> TaskQueue<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Start configuring a new queue
    pub fn builder() -> TaskQueueBuilder<A> {
        TaskQueueBuilder::new()
    }

    /// Enqueue a task without waiting for it to run
    ///
    /// Fails with [`QueueError::UnknownSubject`] if no handler is registered
    /// for `subject`, and with [`QueueError::CapacityExhausted`] if `capacity`
    /// tasks are already pending. In the latter case the diagnostic callback,
    /// if any, is called with the history snapshot before returning.
    pub fn push_async(&self, subject: &str, args: Vec<A>) -> QueueResult<TaskHandle<A>> {
        let handler = self
            .inner
            .handlers
            .get(subject)
            .cloned()
            .ok_or_else(|| QueueError::UnknownSubject(subject.to_string()))?;

        let mut intake = self.inner.intake.lock();

        let Some(sender) = intake.sender.as_ref() else {
            return Err(QueueError::Closed);
        };

        let Ok(permit) = self.inner.slots.clone().try_acquire_owned() else {
            let snapshot = intake.history.snapshot();
            drop(intake);

            warn!(
                subject,
                capacity = self.inner.capacity,
                "task queue full, rejecting task"
            );

            if let Some(on_full) = &self.inner.on_full {
                on_full(&snapshot);
            }

            return Err(QueueError::CapacityExhausted {
                capacity: self.inner.capacity,
            });
        };

        let task = Task::new(subject.to_string(), args, intake.next_index);
        let (respond_to, completion) = oneshot::channel();

        let job = Job {
            task: task.clone(),
            handler,
            respond_to,
            permit,
        };

        if sender.send(job).is_err() {
            error!("task queue worker is gone, rejecting task");
            return Err(QueueError::Closed);
        }

        intake.next_index = intake.next_index.wrapping_add(1);
        intake.history.push(task.clone());

        trace!(subject, index = task.index, "task enqueued");

        Ok(TaskHandle::new(task, completion))
    }

    /// Enqueue a task and wait for its handler to finish
    ///
    /// Returns the enqueue error, or the handler's own error wrapped in
    /// [`QueueError::Handler`].
    pub async fn push_sync(&self, subject: &str, args: Vec<A>) -> QueueResult<()> {
        self.push_async(subject, args)?.wait().await
    }

    /// Stop accepting tasks and wait until every pending task has run
    ///
    /// Every caller, on any clone, returns only after the worker has exited.
    pub async fn shutdown(&self) {
        if self.inner.intake.lock().sender.take().is_some() {
            debug!("waiting for task queue worker to drain");
        }

        let mut stopped = self.inner.stopped.clone();
        if stopped.wait_for(|stopped| *stopped).await.is_err() {
            error!("task queue worker exited without draining");
        }
    }

    /// Snapshot of recently enqueued tasks, oldest first
    pub fn history(&self) -> Vec<Task<A>> {
        self.inner.intake.lock().history.snapshot()
    }
}

impl<A> TaskQueue<A> {
    /// Maximum number of pending tasks
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of accepted tasks that have not finished yet
    pub fn pending(&self) -> usize {
        self.inner.capacity - self.inner.slots.available_permits()
    }

    /// Whether the queue still accepts tasks
    pub fn is_closed(&self) -> bool {
        self.inner.intake.lock().sender.is_none()
    }

    /// Registered subjects, in no particular order
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.inner.handlers.keys().map(String::as_str)
    }
}

/// Builder for [`TaskQueue`]
pub struct TaskQueueBuilder<A> {
    capacity: usize,
    handlers: HashMap<String, Arc<dyn TaskHandler<A>>>,
    alarm: Option<Alarm<A>>,
    on_full: Option<DiagnosticFn<A>>,
}

impl<A> Default for TaskQueueBuilder<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> TaskQueueBuilder<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            handlers: HashMap::new(),
            alarm: None,
            on_full: None,
        }
    }

    /// Seed a builder from configuration
    ///
    /// A configured alarm duration gets a callback that logs the slow task;
    /// call [`TaskQueueBuilder::alarm`] afterwards to replace it.
    pub fn from_config(config: &QueueConfig) -> Self {
        let builder = Self::new().capacity(config.capacity);

        match config.alarm() {
            Some(after) => builder.alarm(after, move |task: &Task<A>| {
                warn!(
                    subject = %task.subject,
                    index = task.index,
                    "task is still running after {after:?}"
                );
            }),
            None => builder,
        }
    }

    /// Maximum number of pending tasks, clamped to `1..=MAX_CAPACITY`
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.clamp(1, MAX_CAPACITY);
        self
    }

    /// Register the handler for `subject`, replacing any previous one
    pub fn handler(
        mut self,
        subject: impl Into<String>,
        handler: impl TaskHandler<A> + 'static,
    ) -> Self {
        self.handlers.insert(subject.into(), Arc::new(handler));
        self
    }

    /// Call `callback` when a handler runs longer than `after`
    ///
    /// The alarm is purely observational; the handler keeps running.
    pub fn alarm(
        mut self,
        after: Duration,
        callback: impl Fn(&Task<A>) + Send + Sync + 'static,
    ) -> Self {
        self.alarm = Some(Alarm {
            after,
            callback: Arc::new(callback),
        });
        self
    }

    /// Call `callback` with the history snapshot whenever a push is rejected
    /// because the queue is full
    pub fn on_full(mut self, callback: impl Fn(&[Task<A>]) + Send + Sync + 'static) -> Self {
        self.on_full = Some(Arc::new(callback));
        self
    }

    /// Start the worker and return the queue handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> TaskQueue<A> {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (stopped_tx, stopped_rx) = watch::channel(false);

        let worker = Worker {
            jobs: job_rx,
            alarm: self.alarm,
            stopped: stopped_tx,
        };

        debug!(
            capacity = self.capacity,
            subjects = self.handlers.len(),
            "spawning task queue"
        );

        tokio::spawn(worker.run());

        TaskQueue {
            inner: Arc::new(Inner {
                handlers: self.handlers,
                slots: Arc::new(Semaphore::new(self.capacity)),
                capacity: self.capacity,
                intake: Mutex::new(Intake {
                    sender: Some(job_tx),
                    next_index: 0,
                    history: RingHistory::new(self.capacity),
                }),
                on_full: self.on_full,
                stopped: stopped_rx,
            }),
        }
    }
}

/// Single consumer running one handler at a time
struct Worker<A> {
    jobs: mpsc::UnboundedReceiver<Job<A>>,
    alarm: Option<Alarm<A>>,
    stopped: watch::Sender<bool>,
}

impl<A> Worker<A>
where
    A: Clone + Send + Sync + 'static,
{
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting task queue worker");

        while let Some(job) = self.jobs.recv().await {
            self.process(job).await;
        }

        debug!("task queue worker stopped");
        self.stopped.send_replace(true);
    }

    async fn process(&self, job: Job<A>) {
        let Job {
            task,
            handler,
            respond_to,
            permit,
        } = job;

        trace!(subject = %task.subject, index = task.index, "running task");

        let alarm = self.alarm.as_ref().map(|alarm| arm(alarm, &task));

        let result = handler.handle(task.args).await;

        if let Some(cancel) = alarm {
            let _ = cancel.send(());
        }

        // Free the slot before completing, so a caller woken by the result can
        // enqueue again right away.
        drop(permit);

        if respond_to.send(result).is_err() {
            trace!(
                subject = %task.subject,
                index = task.index,
                "task handle dropped before completion"
            );
        }
    }
}

/// Start the alarm timer for `task`, returning the sender that cancels it
fn arm<A>(alarm: &Alarm<A>, task: &Task<A>) -> oneshot::Sender<()>
where
    A: Clone + Send + Sync + 'static,
{
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    let after = alarm.after;
    let callback = alarm.callback.clone();
    let task = task.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;

            _ = cancel_rx => {}

            _ = tokio::time::sleep(after) => {
                trace!(subject = %task.subject, index = task.index, "alarm fired");
                callback(&task);
            }
        }
    });

    cancel_tx
}
