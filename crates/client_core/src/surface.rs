//! Capabilities the reconciler is wired to at construction: the bound UI
//! controls, the operator activity log and the auto-cycle manager.

use std::fmt;

use shared::domain::{OutputId, RelayOutput, ToggleChannel};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleLabel {
    Fire,
    StopFire,
    Fiber,
    StopFiber,
    Processing,
}

impl fmt::Display for ToggleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ToggleLabel::Fire => "FIRE",
            ToggleLabel::StopFire => "STOP FIRE",
            ToggleLabel::Fiber => "FIBER",
            ToggleLabel::StopFiber => "STOP FIBER",
            ToggleLabel::Processing => "PROCESSING",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleView {
    pub channel: ToggleChannel,
    pub active: bool,
    /// The button is disabled while a request is in flight.
    pub busy: bool,
    pub label: ToggleLabel,
}

/// One tri-state button group. Exactly one of the three flags is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriStateView {
    pub relay: RelayOutput,
    pub on_active: bool,
    pub off_active: bool,
    pub auto_active: bool,
    pub effective_state: bool,
    pub busy: bool,
}

impl TriStateView {
    pub fn active_count(&self) -> usize {
        [self.on_active, self.off_active, self.auto_active]
            .into_iter()
            .filter(|flag| *flag)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCycleView {
    pub enabled: bool,
    pub running: bool,
    pub cycle_count: u32,
    pub progress_percent: u8,
    pub busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableView {
    pub moving_forward: bool,
    pub moving_backward: bool,
    pub front_limit: bool,
    pub back_limit: bool,
    pub busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringBadge {
    NotFiring,
    Toggle,
    FiberToggle,
    Momentary,
    /// The server reports firing that no local control accounts for.
    Unattributed,
}

impl fmt::Display for FiringBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FiringBadge::NotFiring => "Not Firing",
            FiringBadge::Toggle => "Firing (Toggle)",
            FiringBadge::FiberToggle => "Firing (Fiber)",
            FiringBadge::Momentary => "Firing (Momentary)",
            FiringBadge::Unattributed => "Firing",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiringView {
    pub badge: FiringBadge,
    /// Start of the elapsed-time display; `None` when no timer runs.
    pub timer_started_at: Option<Instant>,
}

impl FiringView {
    pub fn elapsed(&self, now: Instant) -> Option<std::time::Duration> {
        self.timer_started_at
            .map(|started| now.saturating_duration_since(started))
    }
}

/// UI bindings. Every method is called only when the rendered value changed.
pub trait ControlSurface: Send + Sync {
    fn render_toggle(&self, view: &ToggleView);
    fn render_tri_state(&self, view: &TriStateView);
    fn render_auto_cycle(&self, view: &AutoCycleView);
    fn render_table(&self, view: &TableView);
    fn render_firing(&self, view: &FiringView);
    fn render_estop(&self, active: bool);
    fn show_error(&self, output: OutputId, message: &str);
}

pub struct HeadlessSurface;

impl ControlSurface for HeadlessSurface {
    fn render_toggle(&self, _view: &ToggleView) {}
    fn render_tri_state(&self, _view: &TriStateView) {}
    fn render_auto_cycle(&self, _view: &AutoCycleView) {}
    fn render_table(&self, _view: &TableView) {}
    fn render_firing(&self, _view: &FiringView) {}
    fn render_estop(&self, _active: bool) {}
    fn show_error(&self, _output: OutputId, _message: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Operator-visible activity log.
pub trait ActivityLog: Send + Sync {
    fn record(&self, level: LogLevel, message: &str);
}

pub struct NoopActivityLog;

impl ActivityLog for NoopActivityLog {
    fn record(&self, _level: LogLevel, _message: &str) {}
}

/// Auto-cycle manager hooks.
pub trait CycleController: Send + Sync {
    fn enabled_changed(&self, enabled: bool);
    fn cycle_progress(&self, running: bool, cycle_count: u32, progress_percent: u8);
}

pub struct NoopCycleController;

impl CycleController for NoopCycleController {
    fn enabled_changed(&self, _enabled: bool) {}
    fn cycle_progress(&self, _running: bool, _cycle_count: u32, _progress_percent: u8) {}
}
