//! In-process sink for [`FulfillmentEvent`]s.
//!
//! Every claimed fulfillment run ends with exactly one event: confirmed,
//! fraud flagged or aborted. Operators and tests subscribe here instead of
//! scraping logs.

use tokio::sync::broadcast;

use super::FulfillmentEvent;

/// Fan-out of fulfillment outcomes to any number of listeners.
///
/// Slow listeners miss the oldest outcomes once `capacity` is exceeded and
/// see `RecvError::Lagged`. Publishing never blocks the pipeline.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FulfillmentEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` outcomes (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Hands an outcome to current listeners and returns how many got it.
    /// Zero listeners is normal.
    pub fn publish(&self, event: FulfillmentEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Listens for outcomes published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FulfillmentEvent> {
        self.sender.subscribe()
    }

    /// Number of live listeners.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
