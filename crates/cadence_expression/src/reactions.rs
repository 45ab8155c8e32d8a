//! Occasional emoji reactions to inbound messages.

use cadence_core::config::ReactionConfig;
use cadence_core::MediaKind;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReactionPicker {
    config: ReactionConfig,
}

impl ReactionPicker {
    pub fn new(config: &ReactionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Pick a reaction for a message of `kind` with `text`, or `None` most of the time.
    pub fn pick<R: Rng + ?Sized>(
        &self,
        kind: MediaKind,
        text: &str,
        rng: &mut R,
    ) -> Option<String> {
        if !self.config.enabled || !self.config.kinds.contains(&kind) {
            return None;
        }
        if !rng.gen_bool(self.config.probability.clamp(0.0, 1.0)) {
            return None;
        }

        let lowered = text.to_lowercase();
        let positive = matches!(kind, MediaKind::Image | MediaKind::Video)
            || self
                .config
                .positive_keywords
                .iter()
                .any(|k| lowered.contains(&k.to_lowercase()));

        let pool = if positive {
            &self.config.positive
        } else {
            &self.config.acknowledgment
        };
        pool.choose(rng).cloned()
    }

    /// Delay between deciding to react and sending the reaction.
    pub fn delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.config.delay_ms.sample(rng)
    }
}

impl Default for ReactionPicker {
    fn default() -> Self {
        Self::new(&ReactionConfig::default())
    }
}
