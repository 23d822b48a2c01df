use std::time::Duration;

use shared::{
    domain::{RelayOutput, ToggleChannel, TriStateMode},
    protocol::{RelayStatus, TableStatus},
};
use storage::StoredAutoCycle;
use tokio::time::Instant;
use tracing::debug;

use crate::surface::{
    AutoCycleView, FiringBadge, FiringView, TableView, ToggleLabel, ToggleView, TriStateView,
};

/// A bistable output bound to a toggle button.
#[derive(Debug, Clone, Copy)]
pub struct ToggleOutput {
    pub channel: ToggleChannel,
    pub active: bool,
    pub busy: bool,
}

impl ToggleOutput {
    pub fn new(channel: ToggleChannel) -> Self {
        Self {
            channel,
            active: false,
            busy: false,
        }
    }

    pub fn label(&self) -> ToggleLabel {
        if self.busy {
            return ToggleLabel::Processing;
        }
        match (self.channel, self.active) {
            (ToggleChannel::Fire, false) => ToggleLabel::Fire,
            (ToggleChannel::Fire, true) => ToggleLabel::StopFire,
            (ToggleChannel::Fiber, false) => ToggleLabel::Fiber,
            (ToggleChannel::Fiber, true) => ToggleLabel::StopFiber,
        }
    }

    pub fn view(&self) -> ToggleView {
        ToggleView {
            channel: self.channel,
            active: self.active,
            busy: self.busy,
            label: self.label(),
        }
    }
}

/// Fan or lights: three mutually exclusive modes plus the relay state the
/// server chose while in `Auto`.
#[derive(Debug, Clone, Copy)]
pub struct TriStateOutput {
    pub relay: RelayOutput,
    pub mode: TriStateMode,
    pub effective_state: bool,
    pub busy: bool,
}

impl TriStateOutput {
    pub fn new(relay: RelayOutput) -> Self {
        Self {
            relay,
            mode: TriStateMode::Off,
            effective_state: false,
            busy: false,
        }
    }

    pub fn set_mode(&mut self, mode: TriStateMode) {
        self.mode = mode;
        if let Some(state) = mode.requested_state() {
            self.effective_state = state;
        }
    }

    /// Folds a server status in. A backend that reports no mode only tells us
    /// the relay state, which pins the mode unless we are in auto.
    pub fn apply_status(&mut self, status: RelayStatus) {
        match (status.mode, status.state) {
            (Some(mode), state) => {
                self.set_mode(mode);
                if let Some(state) = state {
                    self.effective_state = state;
                }
            }
            (None, Some(state)) => {
                if self.mode != TriStateMode::Auto {
                    self.mode = if state {
                        TriStateMode::On
                    } else {
                        TriStateMode::Off
                    };
                }
                self.effective_state = state;
            }
            (None, None) => {}
        }
    }

    pub fn view(&self) -> TriStateView {
        TriStateView {
            relay: self.relay,
            on_active: self.mode == TriStateMode::On,
            off_active: self.mode == TriStateMode::Off,
            auto_active: self.mode == TriStateMode::Auto,
            effective_state: self.effective_state,
            busy: self.busy,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCycleState {
    pub enabled: bool,
    pub running: bool,
    pub cycle_count: u32,
    pub progress_percent: u8,
    pub busy: bool,
}

impl AutoCycleState {
    pub fn from_stored(stored: StoredAutoCycle) -> Self {
        Self {
            enabled: stored.enabled,
            cycle_count: stored.cycle_count,
            ..Self::default()
        }
    }

    pub fn stored(&self) -> StoredAutoCycle {
        StoredAutoCycle {
            enabled: self.enabled,
            cycle_count: self.cycle_count,
        }
    }

    pub fn view(&self) -> AutoCycleView {
        AutoCycleView {
            enabled: self.enabled,
            running: self.running,
            cycle_count: self.cycle_count,
            progress_percent: self.progress_percent,
            busy: self.busy,
        }
    }
}

pub fn clamp_progress(progress: f64) -> u8 {
    if progress.is_nan() {
        return 0;
    }
    progress.round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableMotion {
    pub status: TableStatus,
    pub busy: bool,
    pub last_stop_at: Option<Instant>,
}

impl TableMotion {
    pub fn view(&self) -> TableView {
        TableView {
            moving_forward: self.status.table_forward_state,
            moving_backward: self.status.table_backward_state,
            front_limit: self.status.table_front_switch_state,
            back_limit: self.status.table_back_switch_state,
            busy: self.busy,
        }
    }
}

/// Momentary (press-and-hold) operation in progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentaryHold {
    pub held: Option<ToggleChannel>,
    pub busy: bool,
}

/// Presentational elapsed-time timer for a firing session.
#[derive(Debug, Clone, Copy, Default)]
pub struct FiringTimer {
    started_at: Option<Instant>,
}

impl FiringTimer {
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Starts the timer as if it had been running for `offset` already.
    /// The offset is dropped when the monotonic clock is younger than it.
    pub fn start_with_offset(&mut self, now: Instant, offset: Duration) {
        let started = match now.checked_sub(offset) {
            Some(started) => started,
            None => {
                debug!("firing timer: offset {offset:?} predates the clock, starting at zero");
                now
            }
        };
        self.started_at = Some(started);
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.started_at
            .map(|started| now.saturating_duration_since(started))
    }
}

pub fn firing_view(badge: FiringBadge, timer: &FiringTimer) -> FiringView {
    FiringView {
        badge,
        timer_started_at: timer.started_at(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_toggle_reads_processing() {
        let mut toggle = ToggleOutput::new(ToggleChannel::Fiber);
        assert_eq!(toggle.label(), ToggleLabel::Fiber);
        toggle.busy = true;
        assert_eq!(toggle.label(), ToggleLabel::Processing);
        toggle.busy = false;
        toggle.active = true;
        assert_eq!(toggle.label().to_string(), "STOP FIBER");
    }

    #[test]
    fn tri_state_view_has_one_active_button_per_mode() {
        let mut fan = TriStateOutput::new(RelayOutput::Fan);
        for mode in TriStateMode::ALL {
            fan.set_mode(mode);
            assert_eq!(fan.view().active_count(), 1, "mode {mode}");
        }
    }

    #[test]
    fn status_without_mode_keeps_auto() {
        let mut lights = TriStateOutput::new(RelayOutput::Lights);
        lights.set_mode(TriStateMode::Auto);
        lights.apply_status(RelayStatus {
            state: Some(true),
            mode: None,
        });
        assert_eq!(lights.mode, TriStateMode::Auto);
        assert!(lights.effective_state);

        lights.set_mode(TriStateMode::Off);
        lights.apply_status(RelayStatus {
            state: Some(true),
            mode: None,
        });
        assert_eq!(lights.mode, TriStateMode::On);
    }

    #[test]
    fn progress_is_clamped_to_percent_range() {
        assert_eq!(clamp_progress(-3.0), 0);
        assert_eq!(clamp_progress(42.4), 42);
        assert_eq!(clamp_progress(180.0), 100);
        assert_eq!(clamp_progress(f64::NAN), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_offset_is_reflected_in_elapsed() {
        let mut timer = FiringTimer::default();
        let now = Instant::now();
        timer.start_with_offset(now, Duration::from_millis(12_345));
        assert_eq!(timer.elapsed(now), Some(Duration::from_millis(12_345)));
        timer.stop();
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn offset_older_than_the_clock_starts_at_zero() {
        let mut timer = FiringTimer::default();
        let now = Instant::now();
        timer.start_with_offset(now, Duration::from_millis(u64::MAX));
        assert!(timer.is_running());
        assert_eq!(timer.elapsed(now), Some(Duration::ZERO));
    }
}
