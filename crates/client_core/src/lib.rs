//! Client core of the laser workstation control panel: the device-control
//! API client and the reconciler that keeps panel controls in step with the
//! hardware.

pub mod api;
pub mod error;
pub mod preferences;
pub mod reconciler;
pub mod scheduler;
pub mod state;
pub mod surface;

pub use api::{ControlApi, HttpControlApi};
pub use error::ControlError;
pub use preferences::{AutoCyclePreferences, MemoryPreferences, StoragePreferences};
pub use reconciler::{
    ActionOutcome, OutputStateReconciler, PanelViews, ReconcileReport, ReconcilerConfig,
    ReconcilerDependencies, ServerSnapshot, UserAction,
};
pub use scheduler::{spawn_reconcile_loop, ReconcileHandle, ReconcileTrigger, ScheduleSettings};
pub use surface::{
    ActivityLog, AutoCycleView, ControlSurface, CycleController, FiringBadge, FiringView,
    LogLevel, NoopActivityLog, NoopCycleController, TableView, ToggleLabel, ToggleView,
    TriStateView,
};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
