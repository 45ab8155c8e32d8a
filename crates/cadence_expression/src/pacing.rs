//! Pacing calculator
//!
//! Maps message content to realistic human delays: how long it takes to read
//! what arrived, look at attached media, type the answer, and the floor below
//! which no reply should ever go out.

use cadence_core::config::{ReadingConfig, ReplyConfig, ResponseConfig, TypingConfig};
use cadence_core::{CadenceConfig, DispatchTask, MediaKind};
use rand::Rng;
use std::time::Duration;

/// Jitter draws are clamped to this many standard deviations.
const JITTER_SIGMA_CLAMP: f64 = 3.0;

/// Multipliers applied on top of a computed delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingFactors {
    /// Slow-hours multiplier (>= 1.0), see `DaySchedule::time_of_day_factor`.
    pub time_of_day: f64,
    /// Per-conversation factor, see `VariationTracker`.
    pub variation: f64,
}

impl PacingFactors {
    pub const NEUTRAL: PacingFactors = PacingFactors {
        time_of_day: 1.0,
        variation: 1.0,
    };

    pub fn new(time_of_day: f64, variation: f64) -> Self {
        Self {
            time_of_day,
            variation,
        }
    }

    fn scale(&self) -> f64 {
        self.time_of_day * self.variation
    }
}

impl Default for PacingFactors {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Stateless delay calculations. All functions are total: empty text counts as length 0.
#[derive(Debug, Clone)]
pub struct PacingCalculator {
    reading: ReadingConfig,
    typing: TypingConfig,
    response: ResponseConfig,
    reply: ReplyConfig,
}

impl PacingCalculator {
    pub fn new(config: &CadenceConfig) -> Self {
        Self {
            reading: config.reading.clone(),
            typing: config.typing.clone(),
            response: config.response.clone(),
            reply: config.reply.clone(),
        }
    }

    /// Time to read `text`: capped linear estimate, jittered, then scaled.
    pub fn reading_time<R: Rng + ?Sized>(
        &self,
        text: &str,
        factors: PacingFactors,
        rng: &mut R,
    ) -> Duration {
        let chars = text.chars().count() as u64;
        let base = chars
            .saturating_mul(self.reading.per_char_ms)
            .saturating_add(self.reading.base_ms)
            .min(self.reading.max_ms);
        let jittered = apply_jitter(base as f64, self.reading.jitter, rng);
        millis(jittered * factors.scale())
    }

    /// Time spent looking at (or listening to) one media item.
    pub fn media_view_time<R: Rng + ?Sized>(
        &self,
        kind: MediaKind,
        factors: PacingFactors,
        rng: &mut R,
    ) -> Duration {
        let range = self.reading.view_range(kind);
        let drawn = rng.gen_range(range.min()..=range.max()) as f64;
        millis(drawn * factors.time_of_day)
    }

    /// Reading time for a whole batch: the combined text, stretched for every
    /// extra message, plus a view time per media item.
    pub fn batch_reading_time<R: Rng + ?Sized>(
        &self,
        task: &DispatchTask,
        factors: PacingFactors,
        rng: &mut R,
    ) -> Duration {
        let mut reading = self.reading_time(&task.combined_text(), factors, rng);
        let extra = task.batch_size().saturating_sub(1) as f64;
        if extra > 0.0 {
            let stretch = 1.0 + extra * self.reading.batch_extra_per_message;
            reading = millis(reading.as_millis() as f64 * stretch);
        }
        for message in task.media() {
            reading = reading.saturating_add(self.media_view_time(message.kind, factors, rng));
        }
        reading
    }

    /// Upper bound used when sleeping for a batch's reading time.
    pub fn reading_cap(&self) -> Duration {
        Duration::from_millis(self.reading.cap_ms)
    }

    /// Time to type `response`: clamped linear estimate, jittered, scaled,
    /// then hard-capped regardless of scaling.
    pub fn typing_time<R: Rng + ?Sized>(
        &self,
        response: &str,
        factors: PacingFactors,
        rng: &mut R,
    ) -> Duration {
        let chars = response.chars().count() as u64;
        // max-then-min: an inverted min/max pair yields max instead of panicking
        let base = chars
            .saturating_mul(self.typing.per_char_ms)
            .max(self.typing.min_ms)
            .min(self.typing.max_ms);
        let jittered = apply_jitter(base as f64, self.typing.jitter, rng);
        let scaled = millis(jittered * factors.scale());
        scaled.min(Duration::from_millis(self.typing.absolute_max_ms))
    }

    /// Floor for the total time between receiving a batch and replying.
    pub fn minimum_response_time<R: Rng + ?Sized>(
        &self,
        response: &str,
        factors: PacingFactors,
        rng: &mut R,
    ) -> Duration {
        let chars = response.chars().count();
        let tier = if chars < 50 {
            self.response.short_min_ms
        } else if chars < 200 {
            self.response.medium_min_ms
        } else {
            self.response.long_min_ms
        };
        let floor = tier.max(self.response.absolute_minimum_ms);
        let jitter = rng.gen_range(self.response.jitter_ms.min()..=self.response.jitter_ms.max());
        millis(floor.saturating_add(jitter) as f64 * factors.scale())
    }

    /// How much longer to wait before sending `reply`, given `elapsed` since
    /// processing started. Never more than `max_additional_wait_ms`.
    pub fn additional_wait<R: Rng + ?Sized>(
        &self,
        reply: &str,
        elapsed: Duration,
        factors: PacingFactors,
        rng: &mut R,
    ) -> Duration {
        let typing = self.typing_time(reply, factors, rng);
        let floor = self.minimum_response_time(reply, factors, rng);
        typing
            .max(floor)
            .saturating_sub(elapsed)
            .min(Duration::from_millis(self.response.max_additional_wait_ms))
    }

    /// Whether the first reply should quote the inbound message.
    pub fn quote_decision<R: Rng + ?Sized>(&self, original: &str, rng: &mut R) -> bool {
        let len = original.chars().count();
        if len > self.reply.quote_if_longer_than {
            return true;
        }
        if len < self.reply.never_quote_if_shorter_than {
            return false;
        }
        rng.gen_bool(self.reply.quote_probability.clamp(0.0, 1.0))
    }
}

impl Default for PacingCalculator {
    fn default() -> Self {
        Self::new(&CadenceConfig::default())
    }
}

/// Gaussian jitter centred on `value` with a standard deviation of `value * percent`.
fn apply_jitter<R: Rng + ?Sized>(value: f64, percent: f64, rng: &mut R) -> f64 {
    let z = standard_normal(rng).clamp(-JITTER_SIGMA_CLAMP, JITTER_SIGMA_CLAMP);
    (value + z * value * percent).max(0.0)
}

/// Box-Muller transform.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // gen::<f64>() is in [0, 1); flip it so ln() never sees zero
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn millis(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_millis(ms.floor() as u64)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::InboundMessage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn calculator() -> PacingCalculator {
        PacingCalculator::default()
    }

    fn no_jitter() -> PacingCalculator {
        let mut cfg = CadenceConfig::default();
        cfg.reading.jitter = 0.0;
        cfg.typing.jitter = 0.0;
        cfg.response.jitter_ms = cadence_core::config::MsRange(0, 0);
        PacingCalculator::new(&cfg)
    }

    #[test]
    fn test_reading_time_linear_then_capped() {
        let calc = no_jitter();
        let mut rng = StdRng::seed_from_u64(1);
        let short = calc.reading_time("hola", PacingFactors::NEUTRAL, &mut rng);
        assert_eq!(short, Duration::from_millis(920 + 4 * 52));

        let long = "x".repeat(500);
        let capped = calc.reading_time(&long, PacingFactors::NEUTRAL, &mut rng);
        assert_eq!(capped, Duration::from_millis(4600));
    }

    #[test]
    fn test_reading_time_empty_text_is_base() {
        let calc = no_jitter();
        let mut rng = StdRng::seed_from_u64(2);
        let d = calc.reading_time("", PacingFactors::NEUTRAL, &mut rng);
        assert_eq!(d, Duration::from_millis(920));
    }

    #[test]
    fn test_time_of_day_factor_scales_reading() {
        let calc = no_jitter();
        let mut rng = StdRng::seed_from_u64(3);
        let night = calc.reading_time("", PacingFactors::new(2.5, 1.0), &mut rng);
        assert_eq!(night, Duration::from_millis(2300));
    }

    #[test]
    fn test_reading_jitter_varies() {
        let calc = calculator();
        let mut rng = StdRng::seed_from_u64(4);
        let delays: Vec<_> = (0..10)
            .map(|_| calc.reading_time("test message", PacingFactors::NEUTRAL, &mut rng))
            .collect();
        let all_same = delays.windows(2).all(|w| w[0] == w[1]);
        assert!(!all_same, "Delays should have random variation");
    }

    #[test]
    fn test_typing_time_clamped_to_min() {
        let calc = no_jitter();
        let mut rng = StdRng::seed_from_u64(5);
        let d = calc.typing_time("ok", PacingFactors::NEUTRAL, &mut rng);
        assert_eq!(d, Duration::from_millis(2300));
    }

    #[test]
    fn test_typing_time_absolute_ceiling_beats_scaling() {
        let calc = no_jitter();
        let mut rng = StdRng::seed_from_u64(6);
        let long = "y".repeat(5000);
        let d = calc.typing_time(&long, PacingFactors::new(2.0, 1.5), &mut rng);
        assert_eq!(d, Duration::from_millis(156_000));
        let d = calc.typing_time(&long, PacingFactors::new(4.0, 1.0), &mut rng);
        assert_eq!(d, Duration::from_millis(180_000));
    }

    #[test]
    fn test_minimum_response_time_tiers() {
        let calc = no_jitter();
        let mut rng = StdRng::seed_from_u64(7);
        let f = PacingFactors::NEUTRAL;
        assert_eq!(calc.minimum_response_time("", f, &mut rng), Duration::from_millis(4600));
        let medium = "m".repeat(120);
        assert_eq!(calc.minimum_response_time(&medium, f, &mut rng), Duration::from_millis(6900));
        let long = "l".repeat(200);
        assert_eq!(calc.minimum_response_time(&long, f, &mut rng), Duration::from_millis(11_500));
    }

    #[test]
    fn test_minimum_response_time_respects_absolute_floor() {
        let mut cfg = CadenceConfig::default();
        cfg.response.short_min_ms = 1000;
        cfg.response.jitter_ms = cadence_core::config::MsRange(0, 0);
        let calc = PacingCalculator::new(&cfg);
        let mut rng = StdRng::seed_from_u64(8);
        let d = calc.minimum_response_time("hi", PacingFactors::NEUTRAL, &mut rng);
        assert_eq!(d, Duration::from_millis(4025));
    }

    #[test]
    fn test_quote_decision_thresholds() {
        let calc = calculator();
        let mut rng = StdRng::seed_from_u64(9);
        let long = "a".repeat(101);
        let trivial = "a".repeat(14);
        for _ in 0..50 {
            assert!(calc.quote_decision(&long, &mut rng));
            assert!(!calc.quote_decision(&trivial, &mut rng));
            assert!(!calc.quote_decision("", &mut rng));
        }
    }

    #[test]
    fn test_quote_decision_is_probabilistic_between_thresholds() {
        let calc = calculator();
        let mut rng = StdRng::seed_from_u64(10);
        let middle = "a".repeat(50);
        let quoted = (0..500).filter(|_| calc.quote_decision(&middle, &mut rng)).count();
        assert!(quoted > 0 && quoted < 500, "expected a mix, got {quoted}/500");
    }

    #[test]
    fn test_media_view_time_uses_kind_range() {
        let calc = calculator();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let video = calc.media_view_time(MediaKind::Video, PacingFactors::NEUTRAL, &mut rng);
            assert!(video >= Duration::from_millis(3000) && video <= Duration::from_millis(6000));
            let doc = calc.media_view_time(MediaKind::Document, PacingFactors::NEUTRAL, &mut rng);
            assert!(doc >= Duration::from_millis(1000) && doc <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn test_batch_reading_time_grows_with_batch() {
        let calc = no_jitter();
        let make = |messages: Vec<InboundMessage>| DispatchTask {
            conversation: "c".into(),
            external_address: "+1".into(),
            messages: Arc::from(messages),
            enqueued_at: Instant::now(),
            cross_worker: false,
            has_media: false,
            has_audio: false,
            wait: Duration::ZERO,
        };
        let mut rng = StdRng::seed_from_u64(12);
        let single = calc.batch_reading_time(
            &make(vec![InboundMessage::text("")]),
            PacingFactors::NEUTRAL,
            &mut rng,
        );
        let triple = calc.batch_reading_time(
            &make(vec![
                InboundMessage::text(""),
                InboundMessage::text(""),
                InboundMessage::text(""),
            ]),
            PacingFactors::NEUTRAL,
            &mut rng,
        );
        assert_eq!(single, Duration::from_millis(920));
        let expected = 920.0 * (1.0 + 2.0 * 0.3);
        assert!((triple.as_millis() as f64 - expected).abs() <= 1.0, "got {triple:?}");

        let with_image = calc.batch_reading_time(
            &make(vec![InboundMessage::media(MediaKind::Image, None, "")]),
            PacingFactors::NEUTRAL,
            &mut rng,
        );
        assert!(with_image >= Duration::from_millis(920 + 2000));
    }

    #[test]
    fn test_extreme_per_char_rates_saturate() {
        let mut cfg = CadenceConfig::default();
        cfg.reading.per_char_ms = u64::MAX / 2;
        cfg.reading.jitter = 0.0;
        cfg.typing.per_char_ms = u64::MAX / 2;
        cfg.typing.jitter = 0.0;
        cfg.response.short_min_ms = u64::MAX;
        cfg.response.jitter_ms = cadence_core::config::MsRange(1, 1);
        let calc = PacingCalculator::new(&cfg);
        let mut rng = StdRng::seed_from_u64(14);
        let f = PacingFactors::NEUTRAL;

        assert_eq!(calc.reading_time("abc", f, &mut rng), Duration::from_millis(4600));
        assert_eq!(calc.typing_time("abc", f, &mut rng), Duration::from_millis(52_000));
        assert!(calc.minimum_response_time("abc", f, &mut rng) > Duration::from_secs(3600));
    }

    #[test]
    fn test_inverted_typing_bounds_do_not_panic() {
        let mut cfg = CadenceConfig::default();
        cfg.typing.min_ms = 5000;
        cfg.typing.max_ms = 100;
        cfg.typing.jitter = 0.0;
        let calc = PacingCalculator::new(&cfg);
        let mut rng = StdRng::seed_from_u64(15);
        let d = calc.typing_time("abc", PacingFactors::NEUTRAL, &mut rng);
        assert_eq!(d, Duration::from_millis(100));
    }

    #[test]
    fn test_negative_batch_stretch_floors_at_zero() {
        let mut cfg = CadenceConfig::default();
        cfg.reading.jitter = 0.0;
        cfg.reading.batch_extra_per_message = -10.0;
        let calc = PacingCalculator::new(&cfg);
        let task = DispatchTask {
            conversation: "c".into(),
            external_address: "+1".into(),
            messages: Arc::from(vec![InboundMessage::text("a"), InboundMessage::text("b")]),
            enqueued_at: Instant::now(),
            cross_worker: false,
            has_media: false,
            has_audio: false,
            wait: Duration::ZERO,
        };
        let mut rng = StdRng::seed_from_u64(16);
        let d = calc.batch_reading_time(&task, PacingFactors::NEUTRAL, &mut rng);
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn test_additional_wait_subtracts_elapsed_and_caps() {
        let calc = no_jitter();
        let mut rng = StdRng::seed_from_u64(13);
        let f = PacingFactors::NEUTRAL;
        // typing 2300 vs floor 4600 → 4600 needed
        assert_eq!(
            calc.additional_wait("ok", Duration::from_millis(1000), f, &mut rng),
            Duration::from_millis(3600)
        );
        assert_eq!(
            calc.additional_wait("ok", Duration::from_secs(60), f, &mut rng),
            Duration::ZERO
        );
        let huge = "z".repeat(2000);
        assert_eq!(
            calc.additional_wait(&huge, Duration::ZERO, f, &mut rng),
            Duration::from_millis(30_000)
        );
    }
}
