//! Per-conversation behaviour variation.
//!
//! Every N messages a conversation gets a fresh random scaling factor, so the
//! pacing for one person drifts slightly over time instead of being perfectly
//! predictable.

use cadence_core::config::VariationConfig;
use cadence_core::ConversationKey;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariationEntry {
    pub message_count: u64,
    pub factor: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct VariationTracker {
    every_n_messages: u64,
    spread: f64,
    entries: HashMap<ConversationKey, VariationEntry>,
}

impl VariationTracker {
    pub fn new(config: &VariationConfig) -> Self {
        Self {
            every_n_messages: config.every_n_messages.max(1),
            spread: config.spread.abs(),
            entries: HashMap::new(),
        }
    }

    /// Count one message for `conversation` and return its current factor.
    ///
    /// A new factor in `[1 - spread, 1 + spread]` is drawn on the first message
    /// and then on every Nth one; in between the stored factor is returned.
    pub fn factor<R: Rng + ?Sized>(&mut self, conversation: &ConversationKey, rng: &mut R) -> f64 {
        let entry = self
            .entries
            .entry(conversation.clone())
            .or_insert(VariationEntry {
                message_count: 0,
                factor: None,
            });

        let count = entry.message_count;
        entry.message_count += 1;

        if count % self.every_n_messages == 0 {
            let factor = if self.spread > 0.0 && self.spread.is_finite() {
                rng.gen_range((1.0 - self.spread)..=(1.0 + self.spread))
            } else {
                1.0
            };
            entry.factor = Some(factor);
        }

        entry.factor.unwrap_or(1.0)
    }

    pub fn reset(&mut self, conversation: &ConversationKey) {
        self.entries.remove(conversation);
    }

    pub fn entry(&self, conversation: &ConversationKey) -> Option<VariationEntry> {
        self.entries.get(conversation).copied()
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

impl Default for VariationTracker {
    fn default() -> Self {
        Self::new(&VariationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_first_message_draws_factor() {
        let mut tracker = VariationTracker::default();
        let mut rng = StdRng::seed_from_u64(1);
        let key = ConversationKey::new("a");
        let f = tracker.factor(&key, &mut rng);
        assert!((0.85..=1.15).contains(&f));
        assert_eq!(tracker.entry(&key).unwrap().message_count, 1);
    }

    #[test]
    fn test_factor_changes_only_at_period_boundary() {
        let mut tracker = VariationTracker::new(&VariationConfig {
            every_n_messages: 5,
            spread: 0.15,
        });
        let mut rng = StdRng::seed_from_u64(2);
        let key = ConversationKey::new("a");
        let factors: Vec<f64> = (0..11).map(|_| tracker.factor(&key, &mut rng)).collect();

        // Calls 1..=5 share one factor, 6..=10 the next, 11 starts a third window
        assert!(factors[0..5].iter().all(|f| *f == factors[0]));
        assert!(factors[5..10].iter().all(|f| *f == factors[5]));
        assert_ne!(factors[0], factors[5]);
        assert_ne!(factors[5], factors[10]);
    }

    #[test]
    fn test_conversations_are_independent() {
        let mut tracker = VariationTracker::default();
        let mut rng = StdRng::seed_from_u64(3);
        let a = ConversationKey::new("a");
        let b = ConversationKey::new("b");
        tracker.factor(&a, &mut rng);
        tracker.factor(&a, &mut rng);
        tracker.factor(&b, &mut rng);
        assert_eq!(tracker.entry(&a).unwrap().message_count, 2);
        assert_eq!(tracker.entry(&b).unwrap().message_count, 1);
        assert_eq!(tracker.tracked(), 2);
    }

    #[test]
    fn test_reset_clears_counter_and_factor() {
        let mut tracker = VariationTracker::default();
        let mut rng = StdRng::seed_from_u64(4);
        let key = ConversationKey::new("a");
        tracker.factor(&key, &mut rng);
        tracker.reset(&key);
        assert!(tracker.entry(&key).is_none());
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_zero_spread_is_neutral() {
        let mut tracker = VariationTracker::new(&VariationConfig {
            every_n_messages: 3,
            spread: 0.0,
        });
        let mut rng = StdRng::seed_from_u64(5);
        let key = ConversationKey::new("a");
        for _ in 0..7 {
            assert_eq!(tracker.factor(&key, &mut rng), 1.0);
        }
    }

    #[test]
    fn test_non_finite_spread_is_neutral() {
        let mut tracker = VariationTracker::new(&VariationConfig {
            every_n_messages: 1,
            spread: f64::INFINITY,
        });
        let mut rng = StdRng::seed_from_u64(3);
        let key = ConversationKey::new("a");
        assert_eq!(tracker.factor(&key, &mut rng), 1.0);
    }
}
