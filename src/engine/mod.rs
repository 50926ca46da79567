//! Adaptive backlight reconciliation engine.
//!
//! Every decision runs under one async mutex, including the hardware I/O it
//! triggers, so concurrent triggers never interleave a read-modify-write of
//! [`ReconciliationState`]. Cancellable background work (the staggered
//! wake reapply and the post-input burst poll) lives in [`CoalescedTask`]
//! slots.

mod coalesced;
mod state;

pub use coalesced::CoalescedTask;
pub use state::{LearnVerdict, ReconciliationState};

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    sync::Mutex,
    time::{Instant, sleep, sleep_until},
};

use crate::{
    drivers::BacklightController,
    error::Result,
    event::Trigger,
    level::BacklightLevel,
    night_flag::NightFlagReader,
    preference::PreferenceStore,
    schedule::{self, ScheduleConfig, WallClock},
};

/// Timing knobs of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTimings {
    pub quiesce: Duration,
    pub off_learn_window: Duration,
    /// Delays after a wake trigger at which the target is re-applied.
    pub reapply_offsets: Vec<Duration>,
    pub burst_samples: u32,
    pub burst_interval: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            quiesce: Duration::from_millis(800),
            off_learn_window: Duration::from_secs(3),
            reapply_offsets: [0, 140, 520].into_iter().map(Duration::from_millis).collect(),
            burst_samples: 10,
            burst_interval: Duration::from_millis(100),
        }
    }
}

/// Collaborators the engine reads from.
pub struct EngineDeps {
    pub store: Arc<dyn PreferenceStore>,
    pub night_flag: Arc<dyn NightFlagReader>,
    pub clock: Arc<dyn WallClock>,
}

struct EngineInner {
    controller: BacklightController,
    state: Mutex<ReconciliationState>,
    deps: EngineDeps,
    timings: EngineTimings,
    reapply: CoalescedTask,
    burst: CoalescedTask,
}

/// Handle to the reconciliation engine. Clones share one engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        controller: BacklightController,
        deps: EngineDeps,
        schedule: ScheduleConfig,
        timings: EngineTimings,
    ) -> Self {
        let preferred = deps.store.read();
        Self {
            inner: Arc::new(EngineInner {
                controller,
                state: Mutex::new(ReconciliationState::new(preferred, schedule)),
                deps,
                timings,
                reapply: CoalescedTask::new(),
                burst: CoalescedTask::new(),
            }),
        }
    }

    /// Reads the hardware once to seed `last_observed`.
    ///
    /// Learning stays disabled until this (or a later poll) succeeds.
    pub async fn initial_sync(&self) -> Result<BacklightLevel> {
        let mut state = self.inner.state.lock().await;
        let level = self.inner.controller.get_level()?;
        state.last_observed = Some(level);
        state.initial_sync_done = true;
        info!(
            "Initial sync: hardware at {level}, preferred {}",
            state.preferred_cached
        );
        Ok(level)
    }

    /// Dispatches an environmental trigger.
    pub async fn handle_trigger(&self, trigger: Trigger) {
        match trigger {
            t if t.is_wake() => self.on_wake(t).await,
            Trigger::Suspend => self.on_suspend().await,
            Trigger::UserInput => self.on_user_input().await,
            Trigger::NightFlagChanged => {
                self.auto_reevaluate().await;
            }
            _ => {}
        }
    }

    async fn on_wake(&self, trigger: Trigger) {
        let target = {
            let mut state = self.inner.state.lock().await;
            let now = Instant::now();
            state.post_resume_guard = true;
            state.quiesce_until = Some(now + self.inner.timings.quiesce);

            if state.schedule.auto_enabled {
                self.desired_level(&state.schedule)
            } else {
                let persisted = self.inner.deps.store.read();
                state.preferred_cached = persisted;
                persisted
            }
        };

        info!("{trigger}: re-applying {target}, learning suspended until user input");
        self.start_reapply(target);
    }

    async fn on_suspend(&self) {
        self.inner.reapply.cancel();
        let mut state = self.inner.state.lock().await;
        state.post_resume_guard = true;
        debug!("Suspend: learning suspended until user input");
    }

    async fn on_user_input(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.last_user_input_at = Some(Instant::now());
            if state.post_resume_guard {
                state.post_resume_guard = false;
                debug!("User input: post-resume guard cleared");
            }
        }
        self.start_burst();
    }

    /// Staggered `reset_to(target)` at each configured offset. Replaces any
    /// sequence still in flight.
    fn start_reapply(&self, target: BacklightLevel) {
        let engine = self.clone();
        let offsets = self.inner.timings.reapply_offsets.clone();
        let started = Instant::now();

        self.inner.reapply.replace(move |token| async move {
            for offset in offsets {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep_until(started + offset) => {}
                }

                let mut state = engine.inner.state.lock().await;
                if token.is_cancelled() {
                    return;
                }
                match engine.inner.controller.reset_to(target).await {
                    Ok(wrote) => {
                        state.last_observed = Some(target);
                        if wrote {
                            debug!("Reapply at +{}ms wrote {target}", offset.as_millis());
                        }
                    }
                    Err(e) => warn!("Reapply of {target} at +{}ms failed: {e}", offset.as_millis()),
                }
            }
        });
    }

    /// Samples the hardware a few times after input to catch hotkeys.
    fn start_burst(&self) {
        let engine = self.clone();
        let samples = self.inner.timings.burst_samples;
        let interval = self.inner.timings.burst_interval;

        self.inner.burst.spawn_if_idle(move |token| async move {
            for _ in 0..samples {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep(interval) => {}
                }
                match engine.poll().await {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(e) => debug!("Burst poll read failed: {e}"),
                }
            }
        });
    }

    /// Reads the hardware and treats a changed level as a learn candidate.
    ///
    /// Returns `true` if the level differed from the last observation.
    pub async fn poll(&self) -> Result<bool> {
        let mut state = self.inner.state.lock().await;
        let level = self.inner.controller.get_level()?;

        if !state.initial_sync_done {
            state.last_observed = Some(level);
            state.initial_sync_done = true;
            info!("Initial sync completed by poll: hardware at {level}");
            return Ok(false);
        }
        if state.last_observed == Some(level) {
            return Ok(false);
        }

        let verdict =
            state.learn_verdict(level, Instant::now(), self.inner.timings.off_learn_window);
        state.last_observed = Some(level);

        if verdict == LearnVerdict::Learn {
            self.inner.deps.store.write(level);
            state.preferred_cached = level;
            info!("Learned preferred level {level} from hardware");
        } else {
            debug!("Observed {level}, not learning: {verdict}");
        }
        Ok(true)
    }

    /// Explicit user selection: persist (unless auto owns the preference),
    /// then apply. Errors go back to the caller.
    pub async fn select_level(&self, level: BacklightLevel) -> Result<()> {
        self.inner.reapply.cancel();
        let mut state = self.inner.state.lock().await;

        if state.schedule.auto_enabled {
            info!("Applying {level} without persisting, auto schedule is enabled");
        } else {
            self.inner.deps.store.write(level);
            state.preferred_cached = level;
        }

        let result = self.inner.controller.set_level(level).await;
        if result.is_ok() {
            state.last_observed = Some(level);
        }
        result
    }

    /// Re-applies the persisted preference without changing it.
    ///
    /// Returns `true` when hardware had to be written.
    pub async fn reset_to_preferred(&self) -> Result<bool> {
        self.inner.reapply.cancel();
        let mut state = self.inner.state.lock().await;
        let preferred = self.inner.deps.store.read();
        state.preferred_cached = preferred;

        let wrote = self.inner.controller.reset_to(preferred).await?;
        state.last_observed = Some(preferred);
        Ok(wrote)
    }

    pub async fn current_level(&self) -> Result<BacklightLevel> {
        let _state = self.inner.state.lock().await;
        self.inner.controller.get_level()
    }

    pub async fn preferred_level(&self) -> BacklightLevel {
        self.inner.state.lock().await.preferred_cached
    }

    pub async fn schedule(&self) -> ScheduleConfig {
        self.inner.state.lock().await.schedule.clone()
    }

    /// Recomputes the scheduled level; persists and applies it when it
    /// differs from the cached preference.
    ///
    /// Inside the post-wake quiesce window the level is applied only; the
    /// first evaluation after the window persists it.
    ///
    /// Returns `true` when the preference changed. Hardware failures are
    /// logged and retried on the next evaluation.
    pub async fn auto_reevaluate(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if !state.schedule.auto_enabled {
            return false;
        }

        let desired = self.desired_level(&state.schedule);
        if desired == state.preferred_cached {
            return false;
        }

        self.inner.reapply.cancel();
        if state.is_quiescing(Instant::now()) {
            debug!("Auto schedule: applying {desired} without persisting while quiescing");
            match self.inner.controller.reset_to(desired).await {
                Ok(_) => state.last_observed = Some(desired),
                Err(e) => warn!("Could not apply scheduled level {desired}: {e}"),
            }
            return false;
        }

        info!(
            "Auto schedule: {} -> {desired}",
            state.preferred_cached
        );
        self.inner.deps.store.write(desired);
        state.preferred_cached = desired;

        match self.inner.controller.reset_to(desired).await {
            Ok(_) => state.last_observed = Some(desired),
            Err(e) => warn!("Could not apply scheduled level {desired}: {e}"),
        }
        true
    }

    /// Swaps in a new schedule and re-evaluates it.
    pub async fn reconfigure(&self, schedule: ScheduleConfig) -> bool {
        self.inner.reapply.cancel();
        {
            let mut state = self.inner.state.lock().await;
            if state.schedule == schedule {
                return false;
            }
            info!(
                "Schedule updated: auto {}, mode {:?}",
                if schedule.auto_enabled { "on" } else { "off" },
                schedule.mode
            );
            state.schedule = schedule;
        }
        self.auto_reevaluate().await;
        true
    }

    /// Cancels in-flight reapply and burst tasks.
    pub fn shutdown(&self) {
        self.inner.reapply.cancel();
        self.inner.burst.cancel();
    }

    fn desired_level(&self, config: &ScheduleConfig) -> BacklightLevel {
        schedule::desired_level(
            config,
            self.inner.deps.clock.time_of_day(),
            self.inner.deps.night_flag.as_ref(),
        )
    }

    #[cfg(test)]
    async fn state(&self) -> ReconciliationState {
        self.inner.state.lock().await.clone()
    }
}
