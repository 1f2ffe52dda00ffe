//! Message types for the batcher's timer actor

use std::time::Duration;

use tokio::sync::oneshot;

/// Commands that can be sent to the timer actor
#[derive(Debug)]
pub enum BatcherCommand {
    /// Replace the flush interval
    ///
    /// A zero interval disables periodic flushing.
    UpdateInterval {
        interval: Duration,
        respond_to: oneshot::Sender<()>,
    },

    /// Flush one last time and stop the timer
    Exit { respond_to: oneshot::Sender<()> },
}

/// Batcher statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Payloads waiting for the next flush
    pub buffered_payloads: usize,

    /// Sum of the lengths of buffered payloads
    pub buffered_bytes: usize,

    /// Number of flushes that found data to combine
    pub flush_count: u64,

    /// Combined payloads handed to the delivery callback successfully
    pub delivered: u64,

    /// Combined payloads the delivery callback failed on
    pub failed: u64,
}
