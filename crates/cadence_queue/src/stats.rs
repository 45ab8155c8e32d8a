//! Read-only counters for the batching and dispatch engine.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct QueueStats {
    total_processed: AtomicU64,
    total_batched: AtomicU64,
    context_switches: AtomicU64,
    cross_worker_tasks: AtomicU64,
    media_tasks: AtomicU64,
    reactions: AtomicU64,
    audio_replies: AtomicU64,
    activity_detections: AtomicU64,
    activity_pauses: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
    queue_depth: AtomicUsize,
    is_processing: AtomicBool,
    buffered_conversations: AtomicUsize,
    active_conversations: AtomicUsize,
}

/// Point-in-time copy of [`QueueStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_processed: u64,
    /// Extra messages absorbed into an earlier message's task.
    pub total_batched: u64,
    pub context_switches: u64,
    pub cross_worker_tasks: u64,
    pub media_tasks: u64,
    pub reactions: u64,
    pub audio_replies: u64,
    pub activity_detections: u64,
    pub activity_pauses: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub queue_depth: usize,
    pub is_processing: bool,
    pub buffered_conversations: usize,
    pub active_conversations: usize,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_batched: self.total_batched.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            cross_worker_tasks: self.cross_worker_tasks.load(Ordering::Relaxed),
            media_tasks: self.media_tasks.load(Ordering::Relaxed),
            reactions: self.reactions.load(Ordering::Relaxed),
            audio_replies: self.audio_replies.load(Ordering::Relaxed),
            activity_detections: self.activity_detections.load(Ordering::Relaxed),
            activity_pauses: self.activity_pauses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Acquire),
            is_processing: self.is_processing.load(Ordering::Acquire),
            buffered_conversations: self.buffered_conversations.load(Ordering::Relaxed),
            active_conversations: self.active_conversations.load(Ordering::Relaxed),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }

    /// A task was flushed carrying `batch_size` messages.
    pub(crate) fn record_flush(&self, batch_size: usize, has_media: bool) {
        if batch_size > 1 {
            self.total_batched
                .fetch_add(batch_size as u64 - 1, Ordering::Relaxed);
        }
        if has_media {
            bump(&self.media_tasks);
        }
    }

    pub(crate) fn record_processed(&self, cross_worker: bool) {
        bump(&self.total_processed);
        if cross_worker {
            bump(&self.cross_worker_tasks);
        }
    }

    pub(crate) fn record_context_switch(&self) {
        bump(&self.context_switches);
    }

    pub(crate) fn record_reaction(&self) {
        bump(&self.reactions);
    }

    pub(crate) fn record_audio_reply(&self) {
        bump(&self.audio_replies);
    }

    pub(crate) fn record_activity_detection(&self) {
        bump(&self.activity_detections);
    }

    pub(crate) fn record_activity_pause(&self) {
        bump(&self.activity_pauses);
    }

    pub(crate) fn record_timeout(&self) {
        bump(&self.timeouts);
    }

    pub(crate) fn record_failure(&self) {
        bump(&self.failures);
    }

    pub(crate) fn queue_pushed(&self) {
        self.queue_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn queue_popped(&self) {
        // Saturating: never wraps if a pop races a failed push.
        let _ = self
            .queue_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
    }

    pub(crate) fn set_processing(&self, processing: bool) {
        self.is_processing.store(processing, Ordering::Release);
    }

    pub(crate) fn set_conversation_gauges(&self, buffered: usize, active: usize) {
        self.buffered_conversations.store(buffered, Ordering::Relaxed);
        self.active_conversations.store(active, Ordering::Relaxed);
    }
}
