//! Presence simulation ("typing…" / "recording…")
//!
//! One simulator is created per processing session and bound to one
//! conversation. It shows the indicator after a short hesitation, keeps it
//! refreshed, and occasionally pauses the way a person does while composing.
//! A safety timer always stops it eventually.

use cadence_core::config::MsRange;
use cadence_core::{CadenceConfig, ConversationKey, PresenceTransport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const INITIAL_DELAY_CAP: Duration = Duration::from_millis(2000);
const THINK_PAUSE_CAP: Duration = Duration::from_millis(5000);
const SHORT_PAUSE_CAP: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceMode {
    Typing,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Idle,
    Starting,
    Active,
    /// Indicator cleared while "thinking"; only reachable in typing mode.
    Paused,
    Stopped,
}

impl PresenceState {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            PresenceState::Starting | PresenceState::Active | PresenceState::Paused
        )
    }
}

#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub refresh_interval: Duration,
    pub initial_delay: MsRange,
    pub max_duration: Duration,
    pub think_enabled: bool,
    pub think_probability: f64,
    pub think_pause: MsRange,
    pub pause_probability: f64,
    pub pause: MsRange,
    pub max_short_pauses: u32,
}

impl PresenceSettings {
    /// Typing uses the typing indicator settings; recording borrows its
    /// cadence from the recording indicator and never "thinks".
    pub fn from_config(config: &CadenceConfig, mode: PresenceMode) -> Self {
        let typing = &config.typing_indicator;
        match mode {
            PresenceMode::Typing => Self {
                refresh_interval: Duration::from_millis(typing.refresh_interval_ms),
                initial_delay: typing.initial_delay_ms,
                max_duration: Duration::from_millis(typing.max_duration_ms),
                think_enabled: typing.intermittent,
                think_probability: typing.think_probability,
                think_pause: typing.think_ms,
                pause_probability: typing.pause_probability,
                pause: typing.pause_ms,
                max_short_pauses: typing.max_short_pauses,
            },
            PresenceMode::Recording => {
                let recording = &config.recording_indicator;
                Self {
                    refresh_interval: Duration::from_millis(recording.refresh_interval_ms),
                    initial_delay: typing.initial_delay_ms,
                    max_duration: Duration::from_millis(typing.max_duration_ms),
                    think_enabled: false,
                    think_probability: 0.0,
                    think_pause: typing.think_ms,
                    pause_probability: recording.pause_probability,
                    pause: recording.pause_ms,
                    max_short_pauses: typing.max_short_pauses,
                }
            }
        }
    }
}

struct Session {
    state: PresenceState,
    started_at: Option<Instant>,
    /// One-shot "pause to think"; consumed at most once per session.
    think_pause_used: bool,
    short_pauses: u32,
    refresh: Option<JoinHandle<()>>,
    safety: Option<JoinHandle<()>>,
    rng: StdRng,
}

/// Which task asked for the stop, so it does not abort itself mid-cleanup.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Refresh,
    Safety,
}

enum Step {
    Expire,
    Think(Duration),
    Pause(Duration),
    Refresh,
}

struct Shared {
    conversation: ConversationKey,
    mode: PresenceMode,
    settings: PresenceSettings,
    transport: Arc<dyn PresenceTransport>,
    session: Mutex<Session>,
}

/// Cheap-to-clone handle; all clones drive the same session.
#[derive(Clone)]
pub struct PresenceSimulator {
    shared: Arc<Shared>,
}

impl PresenceSimulator {
    pub fn new(
        conversation: ConversationKey,
        mode: PresenceMode,
        settings: PresenceSettings,
        transport: Arc<dyn PresenceTransport>,
    ) -> Self {
        Self::with_rng(conversation, mode, settings, transport, StdRng::from_entropy())
    }

    pub fn with_rng(
        conversation: ConversationKey,
        mode: PresenceMode,
        settings: PresenceSettings,
        transport: Arc<dyn PresenceTransport>,
        rng: StdRng,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                conversation,
                mode,
                settings,
                transport,
                session: Mutex::new(Session {
                    state: PresenceState::Idle,
                    started_at: None,
                    think_pause_used: false,
                    short_pauses: 0,
                    refresh: None,
                    safety: None,
                    rng,
                }),
            }),
        }
    }

    pub fn mode(&self) -> PresenceMode {
        self.shared.mode
    }

    pub fn state(&self) -> PresenceState {
        self.shared.session().state
    }

    pub fn think_pause_used(&self) -> bool {
        self.shared.session().think_pause_used
    }

    pub fn short_pauses(&self) -> u32 {
        self.shared.session().short_pauses
    }

    /// Show the indicator after a short hesitation and keep it refreshed.
    /// Returns once the first signal went out (or the session was stopped).
    pub async fn start(&self) {
        let initial_delay = {
            let mut session = self.shared.session();
            if session.state.is_running() {
                return;
            }
            session.state = PresenceState::Starting;
            session.started_at = Some(Instant::now());
            session.think_pause_used = false;
            session.short_pauses = 0;

            if let Some(old) = session.safety.take() {
                old.abort();
            }
            let shared = Arc::clone(&self.shared);
            let max = self.shared.settings.max_duration;
            session.safety = Some(tokio::spawn(async move {
                tokio::time::sleep(max).await;
                tracing::warn!(
                    conversation = %shared.conversation.short(),
                    "Presence {:?} reached its {}s ceiling, stopping",
                    shared.mode,
                    max.as_secs()
                );
                shared.finish(Origin::Safety).await;
            }));

            let range = self.shared.settings.initial_delay;
            range.sample(&mut session.rng).min(INITIAL_DELAY_CAP)
        };

        tokio::time::sleep(initial_delay).await;
        if self.state() != PresenceState::Starting {
            return;
        }

        self.shared.send_signal().await;

        let mut session = self.shared.session();
        if session.state != PresenceState::Starting {
            return;
        }
        session.state = PresenceState::Active;
        let shared = Arc::clone(&self.shared);
        session.refresh = Some(tokio::spawn(Shared::refresh_loop(shared)));
    }

    /// Idempotent. Safe before `start()` and from any state.
    pub async fn stop(&self) {
        self.shared.finish(Origin::Caller).await;
    }
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_running(&self) -> bool {
        self.session().state.is_running()
    }

    async fn send_signal(&self) {
        let result = match self.mode {
            PresenceMode::Typing => self.transport.send_typing(&self.conversation).await,
            PresenceMode::Recording => self.transport.send_recording(&self.conversation).await,
        };
        if let Err(e) = result {
            tracing::debug!(
                conversation = %self.conversation.short(),
                "Presence signal failed: {}",
                e
            );
        }
    }

    async fn clear_signal(&self) {
        if let Err(e) = self.transport.clear_presence(&self.conversation).await {
            tracing::debug!(
                conversation = %self.conversation.short(),
                "Presence clear failed: {}",
                e
            );
        }
    }

    async fn finish(&self, origin: Origin) {
        let (refresh, safety) = {
            let mut session = self.session();
            if session.state == PresenceState::Stopped {
                return;
            }
            session.state = PresenceState::Stopped;
            (session.refresh.take(), session.safety.take())
        };
        if origin != Origin::Refresh {
            if let Some(handle) = &refresh {
                handle.abort();
            }
        }
        if origin != Origin::Safety {
            if let Some(handle) = &safety {
                handle.abort();
            }
        }
        self.clear_signal().await;
    }

    fn next_step(&self) -> Option<Step> {
        let settings = &self.settings;
        let mut session = self.session();
        if !session.state.is_running() {
            return None;
        }
        let expired = session
            .started_at
            .map(|t| t.elapsed() > settings.max_duration)
            .unwrap_or(false);
        if expired {
            return Some(Step::Expire);
        }

        if self.mode == PresenceMode::Typing
            && settings.think_enabled
            && !session.think_pause_used
            && session.rng.gen_bool(settings.think_probability.clamp(0.0, 1.0))
        {
            session.think_pause_used = true;
            session.state = PresenceState::Paused;
            let pause = settings.think_pause.sample(&mut session.rng).min(THINK_PAUSE_CAP);
            return Some(Step::Think(pause));
        }

        if session.short_pauses < settings.max_short_pauses
            && session.rng.gen_bool(settings.pause_probability.clamp(0.0, 1.0))
        {
            session.short_pauses += 1;
            let pause = settings.pause.sample(&mut session.rng).min(SHORT_PAUSE_CAP);
            return Some(Step::Pause(pause));
        }

        Some(Step::Refresh)
    }

    fn resume_after_think(&self) -> bool {
        let mut session = self.session();
        if session.state == PresenceState::Paused {
            session.state = PresenceState::Active;
            true
        } else {
            false
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        let period = self.settings.refresh_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(step) = self.next_step() else {
                return;
            };
            match step {
                Step::Expire => {
                    self.finish(Origin::Refresh).await;
                    return;
                }
                Step::Think(pause) => {
                    tracing::debug!(
                        conversation = %self.conversation.short(),
                        "Typing paused (thinking)"
                    );
                    self.clear_signal().await;
                    tokio::time::sleep(pause).await;
                    if !self.resume_after_think() {
                        return;
                    }
                    self.send_signal().await;
                    tracing::debug!(conversation = %self.conversation.short(), "Typing resumed");
                }
                Step::Pause(pause) => {
                    tokio::time::sleep(pause).await;
                    if !self.is_running() {
                        return;
                    }
                    self.send_signal().await;
                }
                Step::Refresh => self.send_signal().await,
            }
        }
    }
}
