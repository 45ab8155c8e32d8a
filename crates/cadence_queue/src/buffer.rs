//! Per-conversation accumulation of not-yet-dispatched messages.

use cadence_core::config::BatchingConfig;
use cadence_core::{ConversationKey, DispatchTask, InboundMessage, MediaKind};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Flush timer state of a buffer. A buffer holds at most one armed timer.
#[derive(Debug, Default)]
pub enum FlushTimer {
    /// Freshly created, no decision made yet.
    #[default]
    Unarmed,
    /// Counterpart is typing or recording; waiting for them to stop.
    Paused,
    Armed {
        generation: u64,
        handle: JoinHandle<()>,
    },
}

impl FlushTimer {
    fn cancel(&mut self) {
        if let FlushTimer::Armed { handle, .. } = self {
            handle.abort();
        }
        *self = FlushTimer::Unarmed;
    }
}

#[derive(Debug)]
pub struct ConversationBuffer {
    messages: Vec<InboundMessage>,
    first_enqueued_at: Instant,
    timer: FlushTimer,
    has_media: bool,
    has_audio: bool,
    /// Taken from the message that opened the buffer.
    cross_worker: bool,
    external_address: String,
}

impl ConversationBuffer {
    pub fn new(external_address: impl Into<String>, cross_worker: bool, now: Instant) -> Self {
        Self {
            messages: Vec::new(),
            first_enqueued_at: now,
            timer: FlushTimer::Unarmed,
            has_media: false,
            has_audio: false,
            cross_worker,
            external_address: external_address.into(),
        }
    }

    pub fn push(&mut self, message: InboundMessage) {
        if message.kind.is_media() {
            self.has_media = true;
        }
        if message.kind == MediaKind::Audio {
            self.has_audio = true;
        }
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_media(&self) -> bool {
        self.has_media
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_enqueued_at)
    }

    /// Inactivity window for this buffer: longer once media is involved.
    pub fn window(&self, batching: &BatchingConfig) -> Duration {
        if self.has_media {
            batching.media_window()
        } else {
            batching.base_window()
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.timer, FlushTimer::Paused)
    }

    pub fn armed_generation(&self) -> Option<u64> {
        match &self.timer {
            FlushTimer::Armed { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    /// Replace whatever timer was armed with a new one.
    pub(crate) fn arm(&mut self, generation: u64, handle: JoinHandle<()>) {
        self.timer.cancel();
        self.timer = FlushTimer::Armed { generation, handle };
    }

    /// Cancel any armed timer and wait for the counterpart. Returns whether a
    /// timer was actually armed.
    pub(crate) fn pause(&mut self) -> bool {
        let was_armed = self.armed_generation().is_some();
        self.timer.cancel();
        self.timer = FlushTimer::Paused;
        was_armed
    }

    /// Finalize into an immutable task. The buffer is left empty.
    pub(crate) fn take_task(
        &mut self,
        conversation: ConversationKey,
        now: Instant,
    ) -> DispatchTask {
        self.timer.cancel();
        DispatchTask {
            conversation,
            external_address: std::mem::take(&mut self.external_address),
            messages: std::mem::take(&mut self.messages).into(),
            enqueued_at: now,
            cross_worker: self.cross_worker,
            has_media: self.has_media,
            has_audio: self.has_audio,
            wait: self.waited(now),
        }
    }
}

impl Drop for ConversationBuffer {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}
