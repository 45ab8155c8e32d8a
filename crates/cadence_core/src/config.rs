use anyhow::{Context, Result};
use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::CadenceError;
use crate::MediaKind;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub worker: WorkerConfig,
    pub batching: BatchingConfig,
    pub reading: ReadingConfig,
    pub typing: TypingConfig,
    pub response: ResponseConfig,
    pub typing_indicator: TypingIndicatorConfig,
    pub recording_indicator: RecordingIndicatorConfig,
    pub reply: ReplyConfig,
    pub seen: SeenConfig,
    pub reactions: ReactionConfig,
    pub schedule: ScheduleConfig,
    pub variation: VariationConfig,
    pub processing: ProcessingConfig,
}

impl CadenceConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result is validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: CadenceConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, return defaults
    /// with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                if let Err(e) = cfg.validate() {
                    tracing::warn!("Env overrides rejected ({}), using plain defaults", e);
                    return Self::default();
                }
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CADENCE_WORKER_ID") {
            self.worker.id = v;
        }
        if let Ok(v) = std::env::var("CADENCE_BATCHING_ENABLED") {
            if let Ok(b) = v.parse() {
                self.batching.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("CADENCE_BASE_WINDOW_MS") {
            if let Ok(n) = v.parse() {
                self.batching.base_window_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CADENCE_MEDIA_WINDOW_MS") {
            if let Ok(n) = v.parse() {
                self.batching.media_window_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CADENCE_MAX_WAIT_MS") {
            if let Ok(n) = v.parse() {
                self.batching.max_wait_ms = n;
            }
        }
        if let Ok(v) = std::env::var("CADENCE_MAX_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.batching.max_batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("CADENCE_UTC_OFFSET_MINUTES") {
            if let Ok(n) = v.parse() {
                self.schedule.utc_offset_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("CADENCE_PROCESSING_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.processing.timeout_ms = n;
            }
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> std::result::Result<(), CadenceError> {
        if self.batching.max_batch_size == 0 {
            return Err(CadenceError::Config(
                "batching.max_batch_size must be at least 1".into(),
            ));
        }
        if self.variation.every_n_messages == 0 {
            return Err(CadenceError::Config(
                "variation.every_n_messages must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.variation.spread) {
            return Err(CadenceError::Config(
                "variation.spread must be in [0, 1)".into(),
            ));
        }
        if self.schedule.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(CadenceError::Config(
                "schedule.utc_offset_minutes must be within one day".into(),
            ));
        }
        let probabilities = [
            ("typing_indicator.pause_probability", self.typing_indicator.pause_probability),
            ("typing_indicator.think_probability", self.typing_indicator.think_probability),
            ("recording_indicator.pause_probability", self.recording_indicator.pause_probability),
            ("reply.quote_probability", self.reply.quote_probability),
            ("reactions.probability", self.reactions.probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(CadenceError::Config(format!("{name} must be in [0, 1]")));
            }
        }
        if self.processing.timeout_ms == 0 {
            return Err(CadenceError::Config(
                "processing.timeout_ms must be at least 1".into(),
            ));
        }
        let jitters = [
            ("reading.jitter", self.reading.jitter),
            ("typing.jitter", self.typing.jitter),
        ];
        for (name, j) in jitters {
            if !j.is_finite() || j < 0.0 {
                return Err(CadenceError::Config(format!(
                    "{name} must be a non-negative number"
                )));
            }
        }
        if self.typing.min_ms > self.typing.max_ms {
            return Err(CadenceError::Config(
                "typing.min_ms must not exceed typing.max_ms".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Ranges
// ============================================================================

/// Inclusive millisecond range, written as `[min, max]` in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MsRange(pub u64, pub u64);

impl MsRange {
    pub fn min(&self) -> u64 {
        self.0.min(self.1)
    }

    pub fn max(&self) -> u64 {
        self.0.max(self.1)
    }

    /// Uniform draw from the range.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_millis(rng.gen_range(self.min()..=self.max()))
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Appears in every log line so multi-instance logs can be told apart.
    pub id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: "worker-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub base_window_ms: u64,
    pub media_window_ms: u64,
    pub max_wait_ms: u64,
    pub max_batch_size: usize,
    pub context_switch_delay_ms: MsRange,
    pub inter_task_pause_ms: MsRange,
}

impl BatchingConfig {
    pub fn base_window(&self) -> Duration {
        Duration::from_millis(self.base_window_ms)
    }

    pub fn media_window(&self) -> Duration {
        Duration::from_millis(self.media_window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_window_ms: 4000,
            media_window_ms: 5000,
            max_wait_ms: 30_000,
            max_batch_size: 8,
            context_switch_delay_ms: MsRange(1500, 3500),
            inter_task_pause_ms: MsRange(800, 1500),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    pub base_ms: u64,
    pub per_char_ms: u64,
    pub max_ms: u64,
    pub jitter: f64,
    pub image_view_ms: MsRange,
    pub video_view_ms: MsRange,
    pub audio_listen_ms: MsRange,
    pub other_view_ms: MsRange,
    /// Extra reading share per additional message in a batch.
    pub batch_extra_per_message: f64,
    pub cap_ms: u64,
}

impl ReadingConfig {
    pub fn view_range(&self, kind: MediaKind) -> MsRange {
        match kind {
            MediaKind::Image => self.image_view_ms,
            MediaKind::Video => self.video_view_ms,
            MediaKind::Audio => self.audio_listen_ms,
            _ => self.other_view_ms,
        }
    }
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            base_ms: 920,
            per_char_ms: 52,
            max_ms: 4600,
            jitter: 0.3,
            image_view_ms: MsRange(2000, 4000),
            video_view_ms: MsRange(3000, 6000),
            audio_listen_ms: MsRange(1500, 3500),
            other_view_ms: MsRange(1000, 2000),
            batch_extra_per_message: 0.3,
            cap_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    pub per_char_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub jitter: f64,
    /// Ceiling applied after every scaling factor.
    pub absolute_max_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            per_char_ms: 40,
            min_ms: 2300,
            max_ms: 52_000,
            jitter: 0.25,
            absolute_max_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub absolute_minimum_ms: u64,
    pub short_min_ms: u64,
    pub medium_min_ms: u64,
    pub long_min_ms: u64,
    pub jitter_ms: MsRange,
    pub max_additional_wait_ms: u64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            absolute_minimum_ms: 4025,
            short_min_ms: 4600,
            medium_min_ms: 6900,
            long_min_ms: 11_500,
            jitter_ms: MsRange(575, 2875),
            max_additional_wait_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypingIndicatorConfig {
    pub refresh_interval_ms: u64,
    /// Enables the one-shot "pause to think" behaviour.
    pub intermittent: bool,
    pub pause_probability: f64,
    pub pause_ms: MsRange,
    pub think_probability: f64,
    pub think_ms: MsRange,
    pub initial_delay_ms: MsRange,
    pub max_duration_ms: u64,
    pub max_short_pauses: u32,
}

impl Default for TypingIndicatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 8000,
            intermittent: true,
            pause_probability: 0.40,
            pause_ms: MsRange(920, 2875),
            think_probability: 0.15,
            think_ms: MsRange(1500, 4000),
            initial_delay_ms: MsRange(345, 1380),
            max_duration_ms: 180_000,
            max_short_pauses: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingIndicatorConfig {
    pub refresh_interval_ms: u64,
    pub pause_probability: f64,
    pub pause_ms: MsRange,
}

impl Default for RecordingIndicatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5000,
            pause_probability: 0.25,
            pause_ms: MsRange(500, 1500),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    pub quote_probability: f64,
    pub quote_if_longer_than: usize,
    pub never_quote_if_shorter_than: usize,
    pub between_messages_ms: MsRange,
    pub typing_between: bool,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            quote_probability: 0.65,
            quote_if_longer_than: 100,
            never_quote_if_shorter_than: 15,
            between_messages_ms: MsRange(1500, 4000),
            typing_between: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeenConfig {
    pub enabled: bool,
    pub delay_after_ms: MsRange,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SeenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_after_ms: MsRange(460, 1725),
            retry_attempts: 2,
            retry_delay_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactionConfig {
    pub enabled: bool,
    pub probability: f64,
    pub kinds: Vec<MediaKind>,
    pub positive: Vec<String>,
    pub acknowledgment: Vec<String>,
    pub positive_keywords: Vec<String>,
    pub delay_ms: MsRange,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: 0.08,
            kinds: vec![MediaKind::Text, MediaKind::Image, MediaKind::Video],
            positive: ["👍", "😊", "🙌", "✨", "💚"].map(String::from).to_vec(),
            acknowledgment: ["👀", "🤔", "📝"].map(String::from).to_vec(),
            positive_keywords: [
                "gracias",
                "genial",
                "perfecto",
                "excelente",
                "thanks",
                "great",
                "perfect",
            ]
            .map(String::from)
            .to_vec(),
            delay_ms: MsRange(300, 1200),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Offset of the simulated person's local time from UTC.
    pub utc_offset_minutes: i32,
    pub sleep_start_hour: u32,
    pub sleep_end_hour: u32,
    pub sleep_slowdown: f64,
    pub sleep_initial_delay_ms: MsRange,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub night_slowdown: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_minutes: -360,
            sleep_start_hour: 1,
            sleep_end_hour: 5,
            sleep_slowdown: 2.5,
            sleep_initial_delay_ms: MsRange(15_000, 45_000),
            night_start_hour: 22,
            night_end_hour: 7,
            night_slowdown: 1.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VariationConfig {
    pub every_n_messages: u64,
    /// Factor is drawn from `[1 - spread, 1 + spread]`.
    pub spread: f64,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            every_n_messages: 5,
            spread: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub timeout_ms: u64,
    pub settle_ms: MsRange,
    pub after_presence_ms: MsRange,
    pub apology_delay_ms: MsRange,
    pub apology_text: String,
}

impl ProcessingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 180_000,
            settle_ms: MsRange(150, 350),
            after_presence_ms: MsRange(200, 600),
            apology_delay_ms: MsRange(2300, 4600),
            apology_text: "Sorry, something went wrong. Please try again.".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
