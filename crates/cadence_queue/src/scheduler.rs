use crate::activity::{ActivityTracker, ActivityTransition, PresenceSignal};
use crate::buffer::ConversationBuffer;
use crate::dispatcher::{dispatch_channel, DispatchReceiver, DispatchSender};
use crate::stats::QueueStats;
use cadence_core::config::BatchingConfig;
use cadence_core::{CadenceConfig, CadenceError, ConversationKey, DispatchTask, InboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug)]
enum Command {
    Enqueue {
        message: InboundMessage,
        conversation: ConversationKey,
        external_address: String,
        cross_worker: bool,
    },
    Activity {
        conversation: ConversationKey,
        signal: PresenceSignal,
    },
    TimerFired {
        conversation: ConversationKey,
        generation: u64,
    },
    FlushAll {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Debug, Clone, Copy)]
enum FlushReason {
    BatchFull,
    MaxWait,
    Inactivity,
    Shutdown,
}

// ============================================================================
// BatchScheduler (handle)
// ============================================================================

/// Handle to the scheduler actor.
///
/// The actor is the only owner of the buffer map and the activity tracker;
/// enqueues, activity signals and timer fires are applied one at a time in
/// arrival order, so a timer racing an enqueue always sees a consistent buffer.
/// The actor stops when every handle has been dropped.
#[derive(Clone)]
pub struct BatchScheduler {
    commands: mpsc::UnboundedSender<Command>,
}

impl BatchScheduler {
    /// Start the actor. The returned receiver is the global FIFO of flushed
    /// tasks, meant to be handed to a single `Dispatcher`.
    pub fn spawn(config: &CadenceConfig, stats: Arc<QueueStats>) -> (Self, DispatchReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = dispatch_channel(Arc::clone(&stats));
        let actor = SchedulerActor {
            worker: config.worker.id.clone(),
            batching: config.batching.clone(),
            buffers: HashMap::new(),
            activity: ActivityTracker::new(),
            dispatch: dispatch_tx,
            stats,
            commands: tx.downgrade(),
            next_generation: 0,
        };
        tokio::spawn(actor.run(rx));
        (Self { commands: tx }, dispatch_rx)
    }

    pub fn enqueue(
        &self,
        message: InboundMessage,
        conversation: impl Into<ConversationKey>,
        external_address: impl Into<String>,
        cross_worker: bool,
    ) -> Result<(), CadenceError> {
        self.send(Command::Enqueue {
            message,
            conversation: conversation.into(),
            external_address: external_address.into(),
            cross_worker,
        })
    }

    /// Feed a raw chat-state signal. Unknown states count as "available".
    pub fn notify_activity(
        &self,
        conversation: impl Into<ConversationKey>,
        raw_state: &str,
    ) -> Result<(), CadenceError> {
        self.send(Command::Activity {
            conversation: conversation.into(),
            signal: PresenceSignal::parse(raw_state),
        })
    }

    /// Force-flush every buffered conversation, ignoring activity. Returns the
    /// number of tasks that were queued.
    pub async fn flush_all(&self) -> Result<usize, CadenceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::FlushAll { reply })?;
        rx.await.map_err(|_| CadenceError::SchedulerClosed)
    }

    fn send(&self, command: Command) -> Result<(), CadenceError> {
        self.commands
            .send(command)
            .map_err(|_| CadenceError::SchedulerClosed)
    }
}

// ============================================================================
// SchedulerActor
// ============================================================================

struct SchedulerActor {
    worker: String,
    batching: BatchingConfig,
    buffers: HashMap<ConversationKey, ConversationBuffer>,
    activity: ActivityTracker,
    dispatch: DispatchSender,
    stats: Arc<QueueStats>,
    /// Weak so that timers alone don't keep the actor alive.
    commands: mpsc::WeakUnboundedSender<Command>,
    next_generation: u64,
}

impl SchedulerActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
            self.stats
                .set_conversation_gauges(self.buffers.len(), self.activity.active_count());
        }
        tracing::debug!(worker = %self.worker, "Batch scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue {
                message,
                conversation,
                external_address,
                cross_worker,
            } => self.on_enqueue(message, conversation, external_address, cross_worker),
            Command::Activity {
                conversation,
                signal,
            } => self.on_activity(conversation, signal),
            Command::TimerFired {
                conversation,
                generation,
            } => self.on_timer(conversation, generation),
            Command::FlushAll { reply } => {
                let flushed = self.flush_all();
                let _ = reply.send(flushed);
            }
        }
    }

    fn on_enqueue(
        &mut self,
        message: InboundMessage,
        conversation: ConversationKey,
        external_address: String,
        cross_worker: bool,
    ) {
        let now = Instant::now();
        let kind = message.kind;

        if !self.batching.enabled {
            let mut single = ConversationBuffer::new(external_address, cross_worker, now);
            single.push(message);
            let task = single.take_task(conversation, now);
            self.dispatch(task);
            return;
        }

        let buffer = self
            .buffers
            .entry(conversation.clone())
            .or_insert_with(|| ConversationBuffer::new(external_address, cross_worker, now));
        buffer.push(message);

        let len = buffer.len();
        tracing::debug!(
            worker = %self.worker,
            conversation = %conversation.short(),
            "Buffered {} message(s), latest {}{}",
            len,
            kind,
            if cross_worker { " [cross-worker]" } else { "" }
        );

        let reason = if len >= self.batching.max_batch_size {
            Some(FlushReason::BatchFull)
        } else if buffer.waited(now) > self.batching.max_wait() {
            Some(FlushReason::MaxWait)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.flush(&conversation, reason);
        } else if self.activity.is_active(&conversation) {
            buffer.pause();
            tracing::debug!(
                worker = %self.worker,
                conversation = %conversation.short(),
                "Counterpart active, holding batch"
            );
        } else {
            self.arm(&conversation);
        }
    }

    fn on_activity(&mut self, conversation: ConversationKey, signal: PresenceSignal) {
        let transition = self.activity.update(&conversation, signal, Instant::now());
        if signal.is_active() {
            self.stats.record_activity_detection();
        }

        let Some(buffer) = self.buffers.get_mut(&conversation) else {
            return;
        };
        tracing::debug!(
            worker = %self.worker,
            conversation = %conversation.short(),
            "Counterpart {:?}",
            signal
        );

        match transition {
            ActivityTransition::Started => {
                if buffer.pause() {
                    self.stats.record_activity_pause();
                    tracing::info!(
                        worker = %self.worker,
                        conversation = %conversation.short(),
                        "Flush paused, counterpart active"
                    );
                }
            }
            ActivityTransition::Stopped => self.arm(&conversation),
            ActivityTransition::Unchanged => {}
        }
    }

    fn on_timer(&mut self, conversation: ConversationKey, generation: u64) {
        let Some(buffer) = self.buffers.get(&conversation) else {
            return;
        };
        if buffer.armed_generation() != Some(generation) {
            tracing::trace!(conversation = %conversation.short(), "Ignoring stale flush timer");
            return;
        }
        // Activity may have resumed after the timer was armed: keep waiting.
        if self.activity.is_active(&conversation) {
            tracing::debug!(
                worker = %self.worker,
                conversation = %conversation.short(),
                "Counterpart active again, rescheduling flush"
            );
            self.arm(&conversation);
            return;
        }
        self.flush(&conversation, FlushReason::Inactivity);
    }

    /// (Re)arm the inactivity timer; any previous timer is cancelled.
    fn arm(&mut self, conversation: &ConversationKey) {
        let Some(buffer) = self.buffers.get_mut(conversation) else {
            return;
        };
        let window = buffer.window(&self.batching);
        self.next_generation += 1;
        let generation = self.next_generation;

        let commands = self.commands.clone();
        let key = conversation.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::TimerFired {
                    conversation: key,
                    generation,
                });
            }
        });
        buffer.arm(generation, handle);

        tracing::debug!(
            worker = %self.worker,
            conversation = %conversation.short(),
            "Flush in {}ms",
            window.as_millis()
        );
    }

    /// Remove the buffer and queue its task in the same step.
    fn flush(&mut self, conversation: &ConversationKey, reason: FlushReason) -> bool {
        let Some(mut buffer) = self.buffers.remove(conversation) else {
            return false;
        };
        if buffer.is_empty() {
            return false;
        }
        let task = buffer.take_task(conversation.clone(), Instant::now());
        tracing::info!(
            worker = %self.worker,
            conversation = %conversation.short(),
            "Flushing {} message(s) after {}ms ({:?})",
            task.batch_size(),
            task.wait.as_millis(),
            reason
        );
        self.dispatch(task);
        true
    }

    fn flush_all(&mut self) -> usize {
        let keys: Vec<ConversationKey> = self.buffers.keys().cloned().collect();
        keys.iter()
            .filter(|key| self.flush(key, FlushReason::Shutdown))
            .count()
    }

    fn dispatch(&mut self, task: DispatchTask) {
        self.stats.record_flush(task.batch_size(), task.has_media);
        if let Err(e) = self.dispatch.push(task) {
            tracing::warn!(worker = %self.worker, "Dropping task: {}", e);
        }
    }
}
