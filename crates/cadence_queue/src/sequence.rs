//! The humanized response sequence run for every dispatched task.
//!
//! seen → (reaction) → read → typing/recording → backend → wait → deliver.
//! Every transport call is best-effort; only a backend failure makes the
//! sequence fail, after an apology has been sent.

use crate::stats::QueueStats;
use anyhow::Context;
use async_trait::async_trait;
use cadence_core::config::{ProcessingConfig, ReplyConfig, SeenConfig};
use cadence_core::{
    CadenceConfig, ChatTransport, ConversationKey, DispatchTask, InboundMessage, PresenceTransport,
    ReplyBackend, ReplyBatch, ReplyKind,
};
use cadence_expression::{
    capped_sleep, DaySchedule, PacingCalculator, PacingFactors, PresenceMode, PresenceSettings,
    PresenceSimulator, ReactionPicker, VariationTracker,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const SETTLE_CAP: Duration = Duration::from_millis(500);
const SEEN_DELAY_CAP: Duration = Duration::from_millis(2000);
const REACTION_DELAY_CAP: Duration = Duration::from_millis(2000);
const AFTER_PRESENCE_CAP: Duration = Duration::from_millis(1000);
const BETWEEN_REPLIES_CAP: Duration = Duration::from_millis(5000);
const APOLOGY_DELAY_CAP: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// `replies` messages went out; `audio` if one of them was a voice note.
    Delivered { replies: usize, audio: bool },
    /// The backend had nothing to say.
    NoReply,
}

/// Lets the presence simulator drive a full chat transport.
struct PresenceBridge(Arc<dyn ChatTransport>);

#[async_trait]
impl PresenceTransport for PresenceBridge {
    async fn send_typing(&self, conversation: &ConversationKey) -> anyhow::Result<()> {
        self.0.send_typing(conversation).await
    }

    async fn send_recording(&self, conversation: &ConversationKey) -> anyhow::Result<()> {
        self.0.send_recording(conversation).await
    }

    async fn clear_presence(&self, conversation: &ConversationKey) -> anyhow::Result<()> {
        self.0.clear_presence(conversation).await
    }
}

pub struct ResponseSequence {
    worker: String,
    pacing: PacingCalculator,
    schedule: DaySchedule,
    reactions: ReactionPicker,
    variation: VariationTracker,
    seen: SeenConfig,
    reply: ReplyConfig,
    processing: ProcessingConfig,
    typing_presence: PresenceSettings,
    recording_presence: PresenceSettings,
    transport: Arc<dyn ChatTransport>,
    presence_transport: Arc<dyn PresenceTransport>,
    backend: Arc<dyn ReplyBackend>,
    stats: Arc<QueueStats>,
    rng: StdRng,
}

impl ResponseSequence {
    pub fn new(
        config: &CadenceConfig,
        transport: Arc<dyn ChatTransport>,
        backend: Arc<dyn ReplyBackend>,
        stats: Arc<QueueStats>,
    ) -> Self {
        Self {
            worker: config.worker.id.clone(),
            pacing: PacingCalculator::new(config),
            schedule: DaySchedule::new(&config.schedule),
            reactions: ReactionPicker::new(&config.reactions),
            variation: VariationTracker::new(&config.variation),
            seen: config.seen.clone(),
            reply: config.reply.clone(),
            processing: config.processing.clone(),
            typing_presence: PresenceSettings::from_config(config, PresenceMode::Typing),
            recording_presence: PresenceSettings::from_config(config, PresenceMode::Recording),
            presence_transport: Arc::new(PresenceBridge(Arc::clone(&transport))),
            transport,
            backend,
            stats,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run the full sequence for `task`.
    ///
    /// The presence simulator is published through `presence` as soon as it
    /// exists, so a caller that abandons this future (timeout) can still stop it.
    pub async fn run(
        &mut self,
        task: &DispatchTask,
        presence: &mut Option<PresenceSimulator>,
    ) -> anyhow::Result<SequenceOutcome> {
        let started = Instant::now();
        let conversation = &task.conversation;
        let Some(last) = task.last_message() else {
            return Ok(SequenceOutcome::NoReply);
        };
        let combined = task.combined_text();

        tracing::info!(
            worker = %self.worker,
            conversation = %conversation.short(),
            "Processing {} message(s), {} chars, {} media{}",
            task.batch_size(),
            combined.chars().count(),
            task.media().count(),
            if task.cross_worker { " [cross-worker]" } else { "" }
        );

        let variation = self.variation.factor(conversation, &mut self.rng);
        let phase = self.schedule.phase();
        let factors = PacingFactors::new(self.schedule.factor_for(phase), variation);

        if let Some(delay) = self.schedule.sleep_delay(phase, &mut self.rng) {
            tracing::info!(
                worker = %self.worker,
                "Sleep hours, waiting {}s before looking at the phone",
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }
        capped_sleep(self.processing.settle_ms.sample(&mut self.rng), SETTLE_CAP).await;

        // Seen
        if self.seen.enabled {
            let seen = self.mark_seen(conversation, &last.message_id).await;
            tracing::debug!(conversation = %conversation.short(), "Seen: {}", seen);
            capped_sleep(self.seen.delay_after_ms.sample(&mut self.rng), SEEN_DELAY_CAP).await;
        }

        // Occasional reaction
        if let Some(emoji) = self
            .reactions
            .pick(task.primary_kind(), &combined, &mut self.rng)
        {
            capped_sleep(self.reactions.delay(&mut self.rng), REACTION_DELAY_CAP).await;
            match self
                .transport
                .react(conversation, &last.message_id, &emoji)
                .await
            {
                Ok(()) => {
                    self.stats.record_reaction();
                    tracing::debug!(conversation = %conversation.short(), "Reacted {}", emoji);
                }
                Err(e) => tracing::debug!(
                    conversation = %conversation.short(),
                    "Reaction failed: {}",
                    e
                ),
            }
        }

        // Reading
        let reading = self.pacing.batch_reading_time(task, factors, &mut self.rng);
        tracing::debug!(
            conversation = %conversation.short(),
            "Reading for {}ms",
            reading.as_millis()
        );
        capped_sleep(reading, self.pacing.reading_cap()).await;

        // Presence
        let mode = if task.has_audio {
            PresenceMode::Recording
        } else {
            PresenceMode::Typing
        };
        let settings = match mode {
            PresenceMode::Typing => self.typing_presence.clone(),
            PresenceMode::Recording => self.recording_presence.clone(),
        };
        let simulator = PresenceSimulator::with_rng(
            conversation.clone(),
            mode,
            settings,
            Arc::clone(&self.presence_transport),
            StdRng::seed_from_u64(self.rng.gen()),
        );
        *presence = Some(simulator.clone());
        simulator.start().await;

        // Backend. Spawned so that abandoning this sequence does not cancel
        // the call itself.
        let backend = Arc::clone(&self.backend);
        let call = task.clone();
        let backend_started = Instant::now();
        let result = match tokio::spawn(async move { backend.process(&call).await }).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("reply backend task aborted: {}", e)),
        };
        tracing::debug!(
            conversation = %conversation.short(),
            "Backend answered in {}ms",
            backend_started.elapsed().as_millis()
        );

        let reply = match result {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                simulator.stop().await;
                tracing::warn!(
                    worker = %self.worker,
                    conversation = %conversation.short(),
                    "Backend produced no reply"
                );
                return Ok(SequenceOutcome::NoReply);
            }
            Err(e) => {
                simulator.stop().await;
                self.apologize(conversation).await;
                return Err(e.context("reply backend failed"));
            }
        };

        // Pad up to a believable response time
        let wait = self.pacing.additional_wait(
            reply.first_reply(),
            started.elapsed(),
            factors,
            &mut self.rng,
        );
        if !wait.is_zero() {
            tracing::debug!(
                conversation = %conversation.short(),
                "Waiting {}ms more",
                wait.as_millis()
            );
            tokio::time::sleep(wait).await;
        }

        simulator.stop().await;
        capped_sleep(
            self.processing.after_presence_ms.sample(&mut self.rng),
            AFTER_PRESENCE_CAP,
        )
        .await;

        let outcome = self.deliver(task, &reply, &combined, last).await?;
        tracing::info!(
            worker = %self.worker,
            conversation = %conversation.short(),
            "Replied in {}ms ({:?})",
            started.elapsed().as_millis(),
            outcome
        );
        Ok(outcome)
    }

    async fn deliver(
        &mut self,
        task: &DispatchTask,
        reply: &ReplyBatch,
        combined: &str,
        last: &InboundMessage,
    ) -> anyhow::Result<SequenceOutcome> {
        let conversation = &task.conversation;

        if reply.kind == ReplyKind::Audio {
            if let Some(audio) = &reply.audio {
                match self.transport.send_audio(conversation, audio).await {
                    Ok(()) => {
                        self.stats.record_audio_reply();
                        return Ok(SequenceOutcome::Delivered {
                            replies: 1,
                            audio: true,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            conversation = %conversation.short(),
                            "Voice note failed, falling back to text: {}",
                            e
                        );
                        let first = reply.first_reply();
                        if first.is_empty() {
                            anyhow::bail!("voice note failed and there is no text fallback");
                        }
                        self.transport
                            .send_text(conversation, first, None)
                            .await
                            .context("text fallback failed")?;
                        return Ok(SequenceOutcome::Delivered {
                            replies: 1,
                            audio: false,
                        });
                    }
                }
            }
        }

        let pending = reply.replies.iter().filter(|r| !r.is_empty()).count();
        let mut sent = 0;
        for (i, text) in reply.replies.iter().enumerate() {
            if text.is_empty() {
                continue;
            }
            if i > 0 {
                if self.reply.typing_between {
                    if let Err(e) = self.transport.send_typing(conversation).await {
                        tracing::debug!(
                            conversation = %conversation.short(),
                            "Presence signal failed: {}",
                            e
                        );
                    }
                }
                capped_sleep(
                    self.reply.between_messages_ms.sample(&mut self.rng),
                    BETWEEN_REPLIES_CAP,
                )
                .await;
            }

            let quote = i == 0 && self.pacing.quote_decision(combined, &mut self.rng);
            let quoted = quote.then_some(last.message_id.as_str());
            match self.transport.send_text(conversation, text, quoted).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(
                    conversation = %conversation.short(),
                    "Reply {}/{} failed: {}",
                    i + 1,
                    reply.replies.len(),
                    e
                ),
            }
        }

        if pending > 0 && sent == 0 {
            anyhow::bail!("none of {} replies could be delivered", pending);
        }
        if sent == 0 {
            return Ok(SequenceOutcome::NoReply);
        }
        Ok(SequenceOutcome::Delivered {
            replies: sent,
            audio: false,
        })
    }

    async fn mark_seen(&self, conversation: &ConversationKey, message_id: &str) -> bool {
        let attempts = self.seen.retry_attempts + 1;
        for attempt in 1..=attempts {
            match self.transport.mark_seen(conversation, message_id).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::debug!(
                        conversation = %conversation.short(),
                        "Seen attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(self.seen.retry_delay_ms)).await;
                    }
                }
            }
        }
        false
    }

    async fn apologize(&mut self, conversation: &ConversationKey) {
        if self.processing.apology_text.is_empty() {
            return;
        }
        capped_sleep(
            self.processing.apology_delay_ms.sample(&mut self.rng),
            APOLOGY_DELAY_CAP,
        )
        .await;
        if let Err(e) = self
            .transport
            .send_text(conversation, &self.processing.apology_text, None)
            .await
        {
            tracing::debug!(conversation = %conversation.short(), "Apology failed: {}", e);
        }
    }
}
