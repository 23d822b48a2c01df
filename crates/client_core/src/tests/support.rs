//! Scripted collaborators shared by the reconciler and scheduler tests.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{FireMode, OutputId, RelayOutput, TableDirection, ToggleChannel, TriStateMode},
    error::{ApiError, ResponseStatus},
    protocol::{
        CommandResponse, RelaySetRequest, RelayStatus, ServoStatusResponse, TableMoveResponse,
        TableStatus, TimingConfig,
    },
};
use storage::StoredAutoCycle;
use tokio::sync::Mutex;

use crate::{
    api::ControlApi,
    error::ControlError,
    preferences::MemoryPreferences,
    reconciler::{OutputStateReconciler, ReconcilerConfig, ReconcilerDependencies},
    surface::{
        ActivityLog, AutoCycleView, ControlSurface, CycleController, FiringView, LogLevel,
        TableView, ToggleView, TriStateView,
    },
};

#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T, Duration),
    Hang,
    Rejected(ResponseStatus, String),
    Transport(String),
}

impl<T> Reply<T> {
    pub fn now(value: T) -> Self {
        Reply::Ok(value, Duration::ZERO)
    }

    pub fn after(value: T, delay: Duration) -> Self {
        Reply::Ok(value, delay)
    }

    async fn resolve(self) -> Result<T, ControlError> {
        match self {
            Reply::Ok(value, delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(value)
            }
            Reply::Hang => std::future::pending().await,
            Reply::Rejected(status, message) => Err(ApiError::new(status, message).into()),
            Reply::Transport(message) => Err(ControlError::Transport(message)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCall {
    Fire(ToggleChannel, FireMode),
    StopFiring,
    Estop,
    ServoStatus,
    SetRelay(RelayOutput, TriStateMode),
    RelayStatus(RelayOutput),
    MoveTable(TableDirection, bool),
    TableStatus,
    TimingConfig,
}

pub struct ScriptedApi {
    pub fire: Mutex<Reply<CommandResponse>>,
    pub stop_firing: Mutex<Reply<CommandResponse>>,
    pub estop: Mutex<Reply<CommandResponse>>,
    pub servo: Mutex<Reply<ServoStatusResponse>>,
    /// `None` echoes the requested mode back.
    pub set_relay: Mutex<Option<Reply<RelayStatus>>>,
    pub relay_status: Mutex<Option<RelayStatus>>,
    pub move_table: Mutex<Reply<TableMoveResponse>>,
    pub table_status: Mutex<Option<TableStatus>>,
    pub calls: Mutex<Vec<ApiCall>>,
}

impl Default for ScriptedApi {
    fn default() -> Self {
        Self {
            fire: Mutex::new(Reply::now(CommandResponse::success())),
            stop_firing: Mutex::new(Reply::now(CommandResponse::success())),
            estop: Mutex::new(Reply::now(CommandResponse::success())),
            servo: Mutex::new(Reply::now(ServoStatusResponse {
                status: ResponseStatus::Success,
                ..ServoStatusResponse::default()
            })),
            set_relay: Mutex::new(None),
            relay_status: Mutex::new(None),
            move_table: Mutex::new(Reply::now(TableMoveResponse {
                status: ResponseStatus::Success,
                ..TableMoveResponse::default()
            })),
            table_status: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedApi {
    pub async fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, call: ApiCall) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|recorded| **recorded == call)
            .count()
    }

    async fn record(&self, call: ApiCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl ControlApi for ScriptedApi {
    async fn fire(
        &self,
        channel: ToggleChannel,
        mode: FireMode,
    ) -> Result<CommandResponse, ControlError> {
        self.record(ApiCall::Fire(channel, mode)).await;
        let reply = self.fire.lock().await.clone();
        reply.resolve().await
    }

    async fn stop_firing(&self) -> Result<CommandResponse, ControlError> {
        self.record(ApiCall::StopFiring).await;
        let reply = self.stop_firing.lock().await.clone();
        reply.resolve().await
    }

    async fn estop(&self) -> Result<CommandResponse, ControlError> {
        self.record(ApiCall::Estop).await;
        let reply = self.estop.lock().await.clone();
        reply.resolve().await
    }

    async fn servo_status(&self) -> Result<ServoStatusResponse, ControlError> {
        self.record(ApiCall::ServoStatus).await;
        let reply = self.servo.lock().await.clone();
        reply.resolve().await
    }

    async fn set_relay(
        &self,
        relay: RelayOutput,
        request: RelaySetRequest,
    ) -> Result<RelayStatus, ControlError> {
        self.record(ApiCall::SetRelay(relay, request.mode)).await;
        let reply = self.set_relay.lock().await.clone().unwrap_or_else(|| {
            Reply::now(RelayStatus {
                state: request.state,
                mode: Some(request.mode),
            })
        });
        reply.resolve().await
    }

    async fn relay_status(&self, relay: RelayOutput) -> Result<RelayStatus, ControlError> {
        self.record(ApiCall::RelayStatus(relay)).await;
        match *self.relay_status.lock().await {
            Some(status) => Ok(status),
            None => Err(ControlError::Transport("relay status unavailable".into())),
        }
    }

    async fn move_table(
        &self,
        direction: TableDirection,
        state: bool,
    ) -> Result<TableMoveResponse, ControlError> {
        self.record(ApiCall::MoveTable(direction, state)).await;
        let reply = self.move_table.lock().await.clone();
        reply.resolve().await
    }

    async fn table_status(&self) -> Result<TableStatus, ControlError> {
        self.record(ApiCall::TableStatus).await;
        match *self.table_status.lock().await {
            Some(status) => Ok(status),
            None => Err(ControlError::Transport("table status unavailable".into())),
        }
    }

    async fn timing_config(&self) -> Result<TimingConfig, ControlError> {
        self.record(ApiCall::TimingConfig).await;
        Ok(TimingConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Toggle(ToggleView),
    TriState(TriStateView),
    AutoCycle(AutoCycleView),
    Table(TableView),
    Firing(FiringView),
    Estop(bool),
    Error(OutputId, String),
}

#[derive(Default)]
pub struct RecordingSurface {
    calls: StdMutex<Vec<SurfaceCall>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().expect("surface calls").clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().expect("surface calls").len()
    }

    pub fn errors(&self) -> Vec<(OutputId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Error(output, message) => Some((output, message)),
                _ => None,
            })
            .collect()
    }

    pub fn tri_state_renders(&self) -> Vec<TriStateView> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::TriState(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: SurfaceCall) {
        self.calls.lock().expect("surface calls").push(call);
    }
}

impl ControlSurface for RecordingSurface {
    fn render_toggle(&self, view: &ToggleView) {
        self.push(SurfaceCall::Toggle(*view));
    }

    fn render_tri_state(&self, view: &TriStateView) {
        self.push(SurfaceCall::TriState(*view));
    }

    fn render_auto_cycle(&self, view: &AutoCycleView) {
        self.push(SurfaceCall::AutoCycle(*view));
    }

    fn render_table(&self, view: &TableView) {
        self.push(SurfaceCall::Table(*view));
    }

    fn render_firing(&self, view: &FiringView) {
        self.push(SurfaceCall::Firing(*view));
    }

    fn render_estop(&self, active: bool) {
        self.push(SurfaceCall::Estop(active));
    }

    fn show_error(&self, output: OutputId, message: &str) {
        self.push(SurfaceCall::Error(output, message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingLog {
    entries: StdMutex<Vec<(LogLevel, String)>>,
}

impl RecordingLog {
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().expect("log entries").clone()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().expect("log entries").len()
    }
}

impl ActivityLog for RecordingLog {
    fn record(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .expect("log entries")
            .push((level, message.to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    Enabled(bool),
    Progress {
        running: bool,
        cycle_count: u32,
        percent: u8,
    },
}

#[derive(Default)]
pub struct RecordingCycleController {
    events: StdMutex<Vec<CycleEvent>>,
}

impl RecordingCycleController {
    pub fn events(&self) -> Vec<CycleEvent> {
        self.events.lock().expect("cycle events").clone()
    }
}

impl CycleController for RecordingCycleController {
    fn enabled_changed(&self, enabled: bool) {
        self.events
            .lock()
            .expect("cycle events")
            .push(CycleEvent::Enabled(enabled));
    }

    fn cycle_progress(&self, running: bool, cycle_count: u32, progress_percent: u8) {
        self.events
            .lock()
            .expect("cycle events")
            .push(CycleEvent::Progress {
                running,
                cycle_count,
                percent: progress_percent,
            });
    }
}

pub struct Harness {
    pub api: Arc<ScriptedApi>,
    pub surface: Arc<RecordingSurface>,
    pub log: Arc<RecordingLog>,
    pub cycles: Arc<RecordingCycleController>,
    pub preferences: Arc<MemoryPreferences>,
    pub reconciler: Arc<OutputStateReconciler>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_preferences(StoredAutoCycle::default()).await
    }

    pub async fn with_preferences(stored: StoredAutoCycle) -> Self {
        let api = Arc::new(ScriptedApi::default());
        let surface = Arc::new(RecordingSurface::default());
        let log = Arc::new(RecordingLog::default());
        let cycles = Arc::new(RecordingCycleController::default());
        let preferences = Arc::new(MemoryPreferences::with_state(stored));
        let reconciler = OutputStateReconciler::new_with_dependencies(
            api.clone(),
            surface.clone(),
            ReconcilerConfig::default(),
            ReconcilerDependencies {
                activity_log: log.clone(),
                cycle_controller: cycles.clone(),
                preferences: preferences.clone(),
            },
        )
        .await;
        Self {
            api,
            surface,
            log,
            cycles,
            preferences,
            reconciler,
        }
    }
}
