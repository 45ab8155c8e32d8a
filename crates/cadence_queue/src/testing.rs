//! Shared fixtures for unit tests.

use async_trait::async_trait;
use cadence_core::config::MsRange;
use cadence_core::{
    AudioReply, CadenceConfig, ChatTransport, ConversationKey, DispatchTask, InboundMessage,
    PresenceTransport, ReplyBackend, ReplyBatch,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Defaults with every humanizing delay and random behaviour switched off.
pub fn quiet_config() -> CadenceConfig {
    let mut c = CadenceConfig::default();
    c.schedule.enabled = false;
    c.reactions.enabled = false;
    c.variation.spread = 0.0;

    c.reading.base_ms = 0;
    c.reading.per_char_ms = 0;
    c.reading.jitter = 0.0;
    c.reading.image_view_ms = MsRange(0, 0);
    c.reading.video_view_ms = MsRange(0, 0);
    c.reading.audio_listen_ms = MsRange(0, 0);
    c.reading.other_view_ms = MsRange(0, 0);

    c.typing.per_char_ms = 0;
    c.typing.min_ms = 0;
    c.typing.jitter = 0.0;

    c.response.absolute_minimum_ms = 0;
    c.response.short_min_ms = 0;
    c.response.medium_min_ms = 0;
    c.response.long_min_ms = 0;
    c.response.jitter_ms = MsRange(0, 0);

    c.typing_indicator.initial_delay_ms = MsRange(0, 0);
    c.typing_indicator.think_probability = 0.0;
    c.typing_indicator.pause_probability = 0.0;
    c.recording_indicator.pause_probability = 0.0;

    c.reply.between_messages_ms = MsRange(0, 0);
    c.reply.quote_probability = 0.0;
    c.seen.delay_after_ms = MsRange(0, 0);

    c.processing.settle_ms = MsRange(0, 0);
    c.processing.after_presence_ms = MsRange(0, 0);
    c.processing.apology_delay_ms = MsRange(0, 0);
    c
}

pub fn task(conversation: &str, texts: &[&str]) -> DispatchTask {
    let messages: Vec<InboundMessage> = texts.iter().map(|t| InboundMessage::text(*t)).collect();
    DispatchTask {
        conversation: conversation.into(),
        external_address: format!("+{conversation}"),
        messages: messages.into(),
        enqueued_at: Instant::now(),
        cross_worker: false,
        has_media: false,
        has_audio: false,
        wait: Duration::ZERO,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Typing,
    Recording,
    Clear,
    Seen,
    Reaction(String),
    Text { text: String, quote: Option<String> },
    Audio(String),
}

#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<Sent>>,
    pub fail_audio: bool,
    /// Number of `mark_seen` calls that fail before one succeeds.
    pub seen_failures: AtomicUsize,
}

impl MockTransport {
    fn push(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PresenceTransport for MockTransport {
    async fn send_typing(&self, _conversation: &ConversationKey) -> anyhow::Result<()> {
        self.push(Sent::Typing);
        Ok(())
    }

    async fn send_recording(&self, _conversation: &ConversationKey) -> anyhow::Result<()> {
        self.push(Sent::Recording);
        Ok(())
    }

    async fn clear_presence(&self, _conversation: &ConversationKey) -> anyhow::Result<()> {
        self.push(Sent::Clear);
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn mark_seen(
        &self,
        _conversation: &ConversationKey,
        _message_id: &str,
    ) -> anyhow::Result<()> {
        self.push(Sent::Seen);
        let remaining = self.seen_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.seen_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("seen rejected");
        }
        Ok(())
    }

    async fn react(
        &self,
        _conversation: &ConversationKey,
        _message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<()> {
        self.push(Sent::Reaction(emoji.to_string()));
        Ok(())
    }

    async fn send_text(
        &self,
        _conversation: &ConversationKey,
        text: &str,
        quote: Option<&str>,
    ) -> anyhow::Result<()> {
        self.push(Sent::Text {
            text: text.to_string(),
            quote: quote.map(str::to_string),
        });
        Ok(())
    }

    async fn send_audio(
        &self,
        _conversation: &ConversationKey,
        audio: &AudioReply,
    ) -> anyhow::Result<()> {
        if self.fail_audio {
            anyhow::bail!("voice notes unsupported");
        }
        self.push(Sent::Audio(audio.filename.clone()));
        Ok(())
    }
}

pub enum StaticBackend {
    Reply(ReplyBatch),
    Empty,
    Failing,
}

impl StaticBackend {
    pub fn reply(batch: ReplyBatch) -> Self {
        StaticBackend::Reply(batch)
    }

    pub fn empty() -> Self {
        StaticBackend::Empty
    }

    pub fn failing() -> Self {
        StaticBackend::Failing
    }
}

#[async_trait]
impl ReplyBackend for StaticBackend {
    async fn process(&self, _task: &DispatchTask) -> anyhow::Result<Option<ReplyBatch>> {
        match self {
            StaticBackend::Reply(batch) => Ok(Some(batch.clone())),
            StaticBackend::Empty => Ok(None),
            StaticBackend::Failing => anyhow::bail!("backend unavailable"),
        }
    }
}
