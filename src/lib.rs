//! Concurrency core of the monitoring relay agent
//!
//! Two independent primitives turn bursty producer activity into controlled,
//! ordered and aggregated work:
//!
//! - [`TaskQueue`]: serializes named tasks onto a single worker, flags tasks
//!   that run too long and keeps a short history for diagnostics when full
//! - [`Batcher`]: coalesces small payloads into larger ones on a time/size
//!   window and hands them to a delivery callback
//!
//! Neither depends on the other. Connectors typically push incoming scrapes
//! through a queue whose handlers feed a batcher that talks to the backend.

pub mod batcher;
pub mod config;
pub mod queue;
pub mod util;

pub use batcher::{Batcher, BatcherStats, Combine, Concat, Deliver, JsonArray};
pub use queue::{QueueError, QueueResult, Task, TaskHandle, TaskHandler, TaskQueue};
