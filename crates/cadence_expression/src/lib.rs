use std::time::Duration;

mod pacing;
mod presence;
mod reactions;
mod schedule;
mod variation;
pub use pacing::{PacingCalculator, PacingFactors};
pub use presence::{PresenceMode, PresenceSettings, PresenceSimulator, PresenceState};
pub use reactions::ReactionPicker;
pub use schedule::{DayPhase, DaySchedule};
pub use variation::{VariationEntry, VariationTracker};

/// Sleep for `duration`, but never longer than `cap`.
///
/// Every humanized wait goes through this so a misconfigured range can't
/// stall a conversation.
pub async fn capped_sleep(duration: Duration, cap: Duration) {
    let duration = duration.min(cap);
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_capped_sleep_respects_cap() {
        let start = Instant::now();
        capped_sleep(Duration::from_secs(30), Duration::from_secs(2)).await;
        assert_eq!(start.elapsed().as_secs(), 2);

        let start = Instant::now();
        capped_sleep(Duration::from_millis(500), Duration::from_secs(2)).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_secs(1));
    }
}
