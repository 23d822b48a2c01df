//! Terminal rendering of the panel controls.

use client_core::{
    ActivityLog, AutoCycleView, ControlSurface, CycleController, FiringView, LogLevel,
    PanelViews, TableView, ToggleView, TriStateView,
};
use shared::domain::{OutputId, RelayOutput, ToggleChannel};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Prints one line per changed control.
pub struct TerminalSurface;

impl ControlSurface for TerminalSurface {
    fn render_toggle(&self, view: &ToggleView) {
        println!("{}", describe_toggle(view));
    }

    fn render_tri_state(&self, view: &TriStateView) {
        println!("{}", describe_tri_state(view));
    }

    fn render_auto_cycle(&self, view: &AutoCycleView) {
        println!("{}", describe_auto_cycle(view));
    }

    fn render_table(&self, view: &TableView) {
        println!("{}", describe_table(view));
    }

    fn render_firing(&self, view: &FiringView) {
        println!("{}", describe_firing(view, Instant::now()));
    }

    fn render_estop(&self, active: bool) {
        if active {
            println!("!! EMERGENCY STOP ENGAGED !!");
        } else {
            println!("emergency stop banner cleared");
        }
    }

    fn show_error(&self, output: OutputId, message: &str) {
        eprintln!("[{output}] error: {message}");
    }
}

pub fn describe_toggle(view: &ToggleView) -> String {
    let name = match view.channel {
        ToggleChannel::Fire => "fire",
        ToggleChannel::Fiber => "fiber",
    };
    let state = if view.active { "active" } else { "idle" };
    format!("[{name}] {} ({state})", view.label)
}

pub fn describe_tri_state(view: &TriStateView) -> String {
    let name = match view.relay {
        RelayOutput::Fan => "fan",
        RelayOutput::Lights => "lights",
    };
    let mark = |active: bool, label: &str| {
        if active {
            format!("<{label}>")
        } else {
            label.to_string()
        }
    };
    let relay = if view.effective_state { "energized" } else { "off" };
    let busy = if view.busy { " ..." } else { "" };
    format!(
        "[{name}] {} {} {} ({relay}){busy}",
        mark(view.on_active, "ON"),
        mark(view.off_active, "OFF"),
        mark(view.auto_active, "AUTO"),
    )
}

pub fn describe_auto_cycle(view: &AutoCycleView) -> String {
    let enabled = if view.enabled { "enabled" } else { "disabled" };
    let running = if view.running { "running" } else { "idle" };
    format!(
        "[auto_cycle] {enabled}, {running}, cycle {} at {}%",
        view.cycle_count, view.progress_percent
    )
}

pub fn describe_table(view: &TableView) -> String {
    let motion = match (view.moving_forward, view.moving_backward) {
        (true, _) => "forward",
        (false, true) => "backward",
        (false, false) => "stopped",
    };
    let mut line = format!("[table] {motion}");
    if view.front_limit {
        line.push_str(", front limit");
    }
    if view.back_limit {
        line.push_str(", back limit");
    }
    line
}

pub fn describe_firing(view: &FiringView, now: Instant) -> String {
    match view.elapsed(now) {
        Some(elapsed) => format!("[firing] {} {:.1}s", view.badge, elapsed.as_secs_f64()),
        None => format!("[firing] {}", view.badge),
    }
}

pub fn describe_panel(views: &PanelViews, now: Instant) -> Vec<String> {
    let mut lines = vec![
        describe_toggle(&views.fire),
        describe_toggle(&views.fiber),
        describe_firing(&views.firing, now),
        describe_tri_state(&views.fan),
        describe_tri_state(&views.lights),
        describe_auto_cycle(&views.auto_cycle),
        describe_table(&views.table),
    ];
    if views.estop_active {
        lines.push("!! EMERGENCY STOP ENGAGED !!".to_string());
    }
    lines
}

/// Activity log entries go to tracing under the `activity` target.
pub struct TracingActivityLog;

impl ActivityLog for TracingActivityLog {
    fn record(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!(target: "activity", "{message}"),
            LogLevel::Warning => warn!(target: "activity", "{message}"),
            LogLevel::Error => error!(target: "activity", "{message}"),
        }
    }
}

pub struct LoggingCycleController;

impl CycleController for LoggingCycleController {
    fn enabled_changed(&self, enabled: bool) {
        info!(target: "auto_cycle", "enabled={enabled}");
    }

    fn cycle_progress(&self, running: bool, cycle_count: u32, progress_percent: u8) {
        info!(
            target: "auto_cycle",
            "running={running} cycle_count={cycle_count} progress={progress_percent}%"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use client_core::{FiringBadge, ToggleLabel};

    use super::*;

    #[test]
    fn toggle_line_shows_label_and_state() {
        let view = ToggleView {
            channel: ToggleChannel::Fiber,
            active: true,
            busy: false,
            label: ToggleLabel::StopFiber,
        };
        assert_eq!(describe_toggle(&view), "[fiber] STOP FIBER (active)");
    }

    #[test]
    fn tri_state_line_marks_the_active_mode() {
        let view = TriStateView {
            relay: RelayOutput::Lights,
            on_active: false,
            off_active: false,
            auto_active: true,
            effective_state: true,
            busy: false,
        };
        assert_eq!(
            describe_tri_state(&view),
            "[lights] ON OFF <AUTO> (energized)"
        );
    }

    #[test]
    fn table_line_lists_limit_switches() {
        let view = TableView {
            moving_forward: false,
            moving_backward: true,
            front_limit: false,
            back_limit: true,
            busy: false,
        };
        assert_eq!(describe_table(&view), "[table] backward, back limit");
    }

    #[test]
    fn firing_line_includes_elapsed_time() {
        let started = Instant::now();
        let now = started + Duration::from_millis(2500);
        let view = FiringView {
            badge: FiringBadge::Toggle,
            timer_started_at: Some(started),
        };
        assert_eq!(describe_firing(&view, now), "[firing] Firing (Toggle) 2.5s");

        let idle = FiringView {
            badge: FiringBadge::NotFiring,
            timer_started_at: None,
        };
        assert_eq!(describe_firing(&idle, now), "[firing] Not Firing");
    }
}
