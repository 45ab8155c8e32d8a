use crate::sequence::{ResponseSequence, SequenceOutcome};
use crate::stats::QueueStats;
use cadence_core::config::BatchingConfig;
use cadence_core::{
    CadenceConfig, CadenceError, ChatTransport, ConversationKey, DispatchTask, ReplyBackend,
};
use cadence_expression::{capped_sleep, PresenceSimulator};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const CONTEXT_SWITCH_CAP: Duration = Duration::from_millis(5000);
const INTER_TASK_CAP: Duration = Duration::from_millis(3000);

// ============================================================================
// Dispatch FIFO
// ============================================================================

/// Creates the global FIFO between the scheduler and the dispatcher. The
/// queue depth is mirrored in `stats`.
pub fn dispatch_channel(stats: Arc<QueueStats>) -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        DispatchSender {
            tx,
            stats: Arc::clone(&stats),
        },
        DispatchReceiver { rx, stats },
    )
}

pub struct DispatchSender {
    tx: mpsc::UnboundedSender<DispatchTask>,
    stats: Arc<QueueStats>,
}

impl DispatchSender {
    pub fn push(&self, task: DispatchTask) -> Result<(), CadenceError> {
        self.stats.queue_pushed();
        self.tx.send(task).map_err(|_| {
            self.stats.queue_popped();
            CadenceError::SchedulerClosed
        })
    }
}

pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<DispatchTask>,
    stats: Arc<QueueStats>,
}

impl DispatchReceiver {
    /// Next task in flush order; `None` once the scheduler is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<DispatchTask> {
        let task = self.rx.recv().await?;
        self.stats.queue_popped();
        Some(task)
    }

    /// Like `recv`, but flags the engine busy before the task leaves the
    /// queue, so observers never see an idle engine with work in hand.
    async fn recv_for_processing(&mut self) -> Option<DispatchTask> {
        let task = self.rx.recv().await?;
        self.stats.set_processing(true);
        self.stats.queue_popped();
        Some(task)
    }

    pub fn is_empty(&self) -> bool {
        self.stats.queue_depth() == 0
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Single global consumer of the dispatch FIFO.
///
/// At most one task is in flight at any time, across all conversations.
pub struct Dispatcher {
    worker: String,
    batching: BatchingConfig,
    timeout: Duration,
    queue: DispatchReceiver,
    sequence: ResponseSequence,
    stats: Arc<QueueStats>,
    rng: StdRng,
    last_conversation: Option<ConversationKey>,
}

impl Dispatcher {
    pub fn new(
        config: &CadenceConfig,
        queue: DispatchReceiver,
        transport: Arc<dyn ChatTransport>,
        backend: Arc<dyn ReplyBackend>,
        stats: Arc<QueueStats>,
    ) -> Self {
        Self {
            worker: config.worker.id.clone(),
            batching: config.batching.clone(),
            timeout: config.processing.timeout(),
            queue,
            sequence: ResponseSequence::new(config, transport, backend, Arc::clone(&stats)),
            stats,
            rng: StdRng::from_entropy(),
            last_conversation: None,
        }
    }

    /// Deterministic randomness, for tests and replays.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.sequence = self.sequence.with_seed(seed.wrapping_add(1));
        self
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!(worker = %self.worker, "Dispatcher started");
        while let Some(task) = self.queue.recv_for_processing().await {
            self.dispatch(task).await;
            self.stats.set_processing(false);

            if !self.queue.is_empty() {
                let pause = self.batching.inter_task_pause_ms.sample(&mut self.rng);
                capped_sleep(pause, INTER_TASK_CAP).await;
            }
        }
        tracing::info!(worker = %self.worker, "Dispatch queue closed, dispatcher stopped");
    }

    async fn dispatch(&mut self, task: DispatchTask) {
        let switching = self
            .last_conversation
            .as_ref()
            .is_some_and(|last| *last != task.conversation);
        if switching {
            let delay = self.batching.context_switch_delay_ms.sample(&mut self.rng);
            tracing::info!(
                worker = %self.worker,
                conversation = %task.conversation.short(),
                "Switching conversation ({}ms)",
                delay.min(CONTEXT_SWITCH_CAP).as_millis()
            );
            capped_sleep(delay, CONTEXT_SWITCH_CAP).await;
            self.stats.record_context_switch();
        }
        self.last_conversation = Some(task.conversation.clone());

        let mut presence: Option<PresenceSimulator> = None;
        let result =
            tokio::time::timeout(self.timeout, self.sequence.run(&task, &mut presence)).await;

        match result {
            Ok(Ok(SequenceOutcome::Delivered { replies, audio })) => {
                tracing::debug!(
                    conversation = %task.conversation.short(),
                    "Delivered {} repl{}{}",
                    replies,
                    if replies == 1 { "y" } else { "ies" },
                    if audio { " (voice note)" } else { "" }
                );
            }
            Ok(Ok(SequenceOutcome::NoReply)) => {}
            Ok(Err(e)) => {
                self.stats.record_failure();
                tracing::error!(
                    worker = %self.worker,
                    conversation = %task.conversation.short(),
                    "Processing failed: {:#}",
                    e
                );
            }
            Err(_) => {
                self.stats.record_timeout();
                tracing::warn!(
                    worker = %self.worker,
                    conversation = %task.conversation.short(),
                    "Processing timed out after {}s, abandoning task",
                    self.timeout.as_secs()
                );
            }
        }

        // Covers the timeout path, a no-op otherwise.
        if let Some(simulator) = presence.take() {
            simulator.stop().await;
        }
        self.stats.record_processed(task.cross_worker);
    }
}
