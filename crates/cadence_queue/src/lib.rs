//! Activity-aware batching and single-flight dispatch.
//!
//! Inbound messages are buffered per conversation by the [`BatchScheduler`]
//! until the counterpart has been quiet for a while, then flushed as one
//! [`DispatchTask`](cadence_core::DispatchTask) into a global FIFO. A single
//! [`Dispatcher`] drains that FIFO and runs the humanized
//! [`ResponseSequence`] for each task, one at a time.

mod activity;
mod buffer;
mod dispatcher;
mod scheduler;
mod sequence;
mod stats;
#[cfg(test)]
mod testing;

pub use activity::{ActivityState, ActivityTracker, ActivityTransition, PresenceSignal};
pub use buffer::{ConversationBuffer, FlushTimer};
pub use dispatcher::{dispatch_channel, DispatchReceiver, DispatchSender, Dispatcher};
pub use scheduler::BatchScheduler;
pub use sequence::{ResponseSequence, SequenceOutcome};
pub use stats::{QueueStats, StatsSnapshot};

use cadence_core::{CadenceConfig, ChatTransport, ReplyBackend};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running engine: the scheduler handle, shared stats, and the dispatcher task.
pub struct Engine {
    pub scheduler: BatchScheduler,
    pub stats: Arc<QueueStats>,
    pub dispatcher: JoinHandle<()>,
}

impl Engine {
    /// Spawn the scheduler actor and its dispatcher.
    pub fn start(
        config: &CadenceConfig,
        transport: Arc<dyn ChatTransport>,
        backend: Arc<dyn ReplyBackend>,
    ) -> Self {
        let stats = Arc::new(QueueStats::new());
        let (scheduler, queue) = BatchScheduler::spawn(config, Arc::clone(&stats));
        let dispatcher =
            Dispatcher::new(config, queue, transport, backend, Arc::clone(&stats)).spawn();
        tracing::info!(
            worker = %config.worker.id,
            "Engine started (batching {})",
            if config.batching.enabled { "on" } else { "off" }
        );
        Self {
            scheduler,
            stats,
            dispatcher,
        }
    }
}
