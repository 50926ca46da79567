use std::{fmt, time::Duration};

use tokio::time::Instant;

use crate::{level::BacklightLevel, schedule::ScheduleConfig};

/// Everything the reconciliation decisions depend on.
///
/// Owned by the engine behind a single async mutex.
#[derive(Debug, Clone)]
pub struct ReconciliationState {
    /// Last level read from (or successfully applied to) hardware.
    pub last_observed: Option<BacklightLevel>,
    /// In-memory copy of the persisted preference.
    pub preferred_cached: BacklightLevel,
    /// Latched by wake-class and suspend triggers, cleared by user input only.
    pub post_resume_guard: bool,
    pub quiesce_until: Option<Instant>,
    pub last_user_input_at: Option<Instant>,
    /// Set once the first hardware read after start succeeded.
    pub initial_sync_done: bool,
    pub schedule: ScheduleConfig,
}

/// Outcome of a learn candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnVerdict {
    Learn,
    NotSynced,
    Quiescing,
    PostResumeGuard,
    /// Auto mode owns the preference; user drift is not learned.
    AutoOwned,
    /// Off without recent user input is not trusted.
    UnconfirmedOff,
    Unchanged,
}

impl fmt::Display for LearnVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Learn => "learning",
            Self::NotSynced => "initial hardware sync pending",
            Self::Quiescing => "inside quiesce window",
            Self::PostResumeGuard => "post-resume guard active",
            Self::AutoOwned => "auto schedule owns the preference",
            Self::UnconfirmedOff => "Off without recent user input",
            Self::Unchanged => "already the preferred level",
        };
        f.write_str(reason)
    }
}

impl ReconciliationState {
    pub fn new(preferred: BacklightLevel, schedule: ScheduleConfig) -> Self {
        Self {
            last_observed: None,
            preferred_cached: preferred,
            post_resume_guard: false,
            quiesce_until: None,
            last_user_input_at: None,
            initial_sync_done: false,
            schedule,
        }
    }

    pub fn is_quiescing(&self, now: Instant) -> bool {
        self.quiesce_until.is_some_and(|until| now < until)
    }

    /// Decides whether an observed hardware level may become the preference.
    pub fn learn_verdict(
        &self,
        observed: BacklightLevel,
        now: Instant,
        off_window: Duration,
    ) -> LearnVerdict {
        if !self.initial_sync_done {
            return LearnVerdict::NotSynced;
        }
        if self.is_quiescing(now) {
            return LearnVerdict::Quiescing;
        }
        if self.post_resume_guard {
            return LearnVerdict::PostResumeGuard;
        }
        if self.schedule.auto_enabled {
            return LearnVerdict::AutoOwned;
        }
        if observed == BacklightLevel::Off {
            let recent_input = self
                .last_user_input_at
                .is_some_and(|at| now.saturating_duration_since(at) <= off_window);
            if !recent_input {
                return LearnVerdict::UnconfirmedOff;
            }
        }
        if observed == self.preferred_cached {
            return LearnVerdict::Unchanged;
        }
        LearnVerdict::Learn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OFF_WINDOW: Duration = Duration::from_secs(3);

    fn synced() -> ReconciliationState {
        let mut state = ReconciliationState::new(BacklightLevel::High, ScheduleConfig::default());
        state.initial_sync_done = true;
        state
    }

    #[test]
    fn nothing_is_learned_before_initial_sync() {
        let state = ReconciliationState::new(BacklightLevel::High, ScheduleConfig::default());
        assert_eq!(
            state.learn_verdict(BacklightLevel::Low, Instant::now(), OFF_WINDOW),
            LearnVerdict::NotSynced
        );
    }

    #[test]
    fn quiesce_window_blocks_learning_until_it_ends() {
        let now = Instant::now();
        let mut state = synced();
        state.quiesce_until = Some(now + Duration::from_millis(800));

        assert_eq!(
            state.learn_verdict(BacklightLevel::Low, now, OFF_WINDOW),
            LearnVerdict::Quiescing
        );
        assert_eq!(
            state.learn_verdict(BacklightLevel::Low, now + Duration::from_millis(800), OFF_WINDOW),
            LearnVerdict::Learn
        );
    }

    #[test]
    fn guard_blocks_learning_regardless_of_elapsed_time() {
        let now = Instant::now();
        let mut state = synced();
        state.post_resume_guard = true;

        assert_eq!(
            state.learn_verdict(BacklightLevel::Low, now + Duration::from_secs(3600), OFF_WINDOW),
            LearnVerdict::PostResumeGuard
        );
    }

    #[test]
    fn auto_mode_owns_the_preference() {
        let mut state = synced();
        state.schedule.auto_enabled = true;
        assert_eq!(
            state.learn_verdict(BacklightLevel::Low, Instant::now(), OFF_WINDOW),
            LearnVerdict::AutoOwned
        );
    }

    #[test]
    fn off_needs_recent_user_input() {
        let input_at = Instant::now();
        let mut state = synced();

        assert_eq!(
            state.learn_verdict(BacklightLevel::Off, input_at, OFF_WINDOW),
            LearnVerdict::UnconfirmedOff
        );

        state.last_user_input_at = Some(input_at);
        assert_eq!(
            state.learn_verdict(BacklightLevel::Off, input_at + Duration::from_secs(3), OFF_WINDOW),
            LearnVerdict::Learn
        );
        assert_eq!(
            state.learn_verdict(
                BacklightLevel::Off,
                input_at + Duration::from_millis(3001),
                OFF_WINDOW
            ),
            LearnVerdict::UnconfirmedOff
        );
    }

    #[test]
    fn non_off_levels_need_no_input() {
        let state = synced();
        assert_eq!(
            state.learn_verdict(BacklightLevel::Low, Instant::now(), OFF_WINDOW),
            LearnVerdict::Learn
        );
        assert_eq!(
            state.learn_verdict(BacklightLevel::High, Instant::now(), OFF_WINDOW),
            LearnVerdict::Unchanged
        );
    }
}
