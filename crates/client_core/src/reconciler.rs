//! Keeps toggle, tri-state and auto-cycle controls consistent with the
//! workstation's reported hardware state.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use shared::{
    domain::{FireMode, OutputId, RelayOutput, TableDirection, ToggleChannel, TriStateMode},
    protocol::{
        RelaySetRequest, RelayStatus, ServoStatusResponse, TableStates, TableStatus, TimingConfig,
        ToggleState, ToggleStates,
    },
};
use storage::StoredAutoCycle;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    api::ControlApi,
    error::ControlError,
    preferences::{AutoCyclePreferences, MemoryPreferences},
    state::{
        clamp_progress, firing_view, AutoCycleState, FiringTimer, MomentaryHold, TableMotion,
        ToggleOutput, TriStateOutput,
    },
    surface::{
        ActivityLog, AutoCycleView, ControlSurface, CycleController, FiringBadge, FiringView,
        LogLevel, NoopActivityLog, NoopCycleController, TableView, ToggleView, TriStateView,
    },
};

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_DEBOUNCE: Duration = Duration::from_millis(250);
pub const DEFAULT_ESTOP_CONFIRMATION_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Upper bound on how long any control may stay in its processing state.
    pub action_timeout: Duration,
    /// Repeated table stops inside this window are coalesced into one.
    pub stop_debounce: Duration,
    /// How long the e-stop banner stays up before it auto-confirms.
    pub estop_confirmation_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            stop_debounce: DEFAULT_STOP_DEBOUNCE,
            estop_confirmation_timeout: DEFAULT_ESTOP_CONFIRMATION_TIMEOUT,
        }
    }
}

impl ReconcilerConfig {
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.estop_confirmation_timeout = Duration::from_millis(timing.estop_confirmation_timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Toggle(ToggleChannel),
    MomentaryPress(ToggleChannel),
    MomentaryRelease(ToggleChannel),
    SetRelay(RelayOutput, TriStateMode),
    SetAutoCycleEnabled(bool),
    RunTable(TableDirection),
    StopTable,
    EmergencyStop,
}

impl UserAction {
    pub fn output(self) -> OutputId {
        match self {
            UserAction::Toggle(channel) => channel.output_id(),
            UserAction::MomentaryPress(_) | UserAction::MomentaryRelease(_) => OutputId::Momentary,
            UserAction::SetRelay(relay, _) => relay.output_id(),
            UserAction::SetAutoCycleEnabled(_) => OutputId::AutoCycle,
            UserAction::RunTable(_) | UserAction::StopTable => OutputId::Table,
            UserAction::EmergencyStop => OutputId::EmergencyStop,
        }
    }

    /// Stop requests are never refused because another request for the same
    /// output is in flight.
    pub fn is_stop(self) -> bool {
        matches!(
            self,
            UserAction::MomentaryRelease(_) | UserAction::StopTable | UserAction::EmergencyStop
        )
    }
}

#[derive(Debug)]
pub enum ActionOutcome {
    Applied,
    /// An action for the same output was already in flight; nothing was sent.
    Rejected(OutputId),
    /// Dropped by the stop debounce.
    Coalesced,
    Failed(ControlError),
    /// The request did not finish in time; the control was reset and a
    /// corrective call issued.
    TimedOut,
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied)
    }
}

/// Authoritative state polled from the workstation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerSnapshot {
    pub toggles: ToggleStates,
    pub table: TableStates,
    pub fan: Option<RelayStatus>,
    pub lights: Option<RelayStatus>,
    pub motion: Option<TableStatus>,
}

impl ServerSnapshot {
    pub fn from_servo_status(status: &ServoStatusResponse) -> Self {
        Self {
            toggles: status.toggle_states,
            table: status.table_states,
            ..Self::default()
        }
    }

    fn relay(&self, relay: RelayOutput) -> Option<RelayStatus> {
        match relay {
            RelayOutput::Fan => self.fan,
            RelayOutput::Lights => self.lights,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub corrected: Vec<OutputId>,
    /// A stop was sent because the server reported unattributed firing.
    pub stop_issued: bool,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.corrected.is_empty() && !self.stop_issued
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelViews {
    pub fire: ToggleView,
    pub fiber: ToggleView,
    pub fan: TriStateView,
    pub lights: TriStateView,
    pub auto_cycle: AutoCycleView,
    pub table: TableView,
    pub firing: FiringView,
    pub estop_active: bool,
}

pub struct ReconcilerDependencies {
    pub activity_log: Arc<dyn ActivityLog>,
    pub cycle_controller: Arc<dyn CycleController>,
    pub preferences: Arc<dyn AutoCyclePreferences>,
}

impl Default for ReconcilerDependencies {
    fn default() -> Self {
        Self {
            activity_log: Arc::new(NoopActivityLog),
            cycle_controller: Arc::new(NoopCycleController),
            preferences: Arc::new(MemoryPreferences::default()),
        }
    }
}

/// Reset issued when a request outlives the action timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Corrective {
    EmergencyStop,
    StopTable,
    RepollOnly,
}

impl Corrective {
    fn for_output(output: OutputId) -> Self {
        match output {
            OutputId::FireToggle
            | OutputId::FiberToggle
            | OutputId::Momentary
            | OutputId::AutoCycle => Corrective::EmergencyStop,
            OutputId::Table => Corrective::StopTable,
            OutputId::Fan | OutputId::Lights | OutputId::EmergencyStop => Corrective::RepollOnly,
        }
    }
}

/// Count of actions started per output. A poll keeps the counts taken before
/// its reads and leaves alone every output whose count moved since.
#[derive(Debug, Clone, Default)]
struct ActionEpochs(HashMap<OutputId, u64>);

impl ActionEpochs {
    fn get(&self, output: OutputId) -> u64 {
        self.0.get(&output).copied().unwrap_or(0)
    }

    fn bump(&mut self, output: OutputId) {
        *self.0.entry(output).or_insert(0) += 1;
    }
}

#[derive(Default)]
struct RenderedViews {
    fire: Option<ToggleView>,
    fiber: Option<ToggleView>,
    fan: Option<TriStateView>,
    lights: Option<TriStateView>,
    auto_cycle: Option<AutoCycleView>,
    table: Option<TableView>,
    firing: Option<FiringView>,
    estop: Option<bool>,
}

struct ReconcilerState {
    fire: ToggleOutput,
    fiber: ToggleOutput,
    momentary: MomentaryHold,
    fan: TriStateOutput,
    lights: TriStateOutput,
    auto_cycle: AutoCycleState,
    table: TableMotion,
    timer: FiringTimer,
    server_firing: bool,
    estop_active: bool,
    estop_generation: u64,
    inconsistency_reported: bool,
    epochs: ActionEpochs,
    rendered: RenderedViews,
}

impl ReconcilerState {
    fn new(stored: StoredAutoCycle) -> Self {
        Self {
            fire: ToggleOutput::new(ToggleChannel::Fire),
            fiber: ToggleOutput::new(ToggleChannel::Fiber),
            momentary: MomentaryHold::default(),
            fan: TriStateOutput::new(RelayOutput::Fan),
            lights: TriStateOutput::new(RelayOutput::Lights),
            auto_cycle: AutoCycleState::from_stored(stored),
            table: TableMotion::default(),
            timer: FiringTimer::default(),
            server_firing: false,
            estop_active: false,
            estop_generation: 0,
            inconsistency_reported: false,
            epochs: ActionEpochs::default(),
            rendered: RenderedViews::default(),
        }
    }

    fn toggle(&self, channel: ToggleChannel) -> &ToggleOutput {
        match channel {
            ToggleChannel::Fire => &self.fire,
            ToggleChannel::Fiber => &self.fiber,
        }
    }

    fn toggle_mut(&mut self, channel: ToggleChannel) -> &mut ToggleOutput {
        match channel {
            ToggleChannel::Fire => &mut self.fire,
            ToggleChannel::Fiber => &mut self.fiber,
        }
    }

    fn relay(&self, relay: RelayOutput) -> &TriStateOutput {
        match relay {
            RelayOutput::Fan => &self.fan,
            RelayOutput::Lights => &self.lights,
        }
    }

    fn relay_mut(&mut self, relay: RelayOutput) -> &mut TriStateOutput {
        match relay {
            RelayOutput::Fan => &mut self.fan,
            RelayOutput::Lights => &mut self.lights,
        }
    }

    fn busy_mut(&mut self, output: OutputId) -> Option<&mut bool> {
        match output {
            OutputId::FireToggle => Some(&mut self.fire.busy),
            OutputId::FiberToggle => Some(&mut self.fiber.busy),
            OutputId::Momentary => Some(&mut self.momentary.busy),
            OutputId::Fan => Some(&mut self.fan.busy),
            OutputId::Lights => Some(&mut self.lights.busy),
            OutputId::AutoCycle => Some(&mut self.auto_cycle.busy),
            OutputId::Table => Some(&mut self.table.busy),
            OutputId::EmergencyStop => None,
        }
    }

    fn touched_since(&self, output: OutputId, since: Option<&ActionEpochs>) -> bool {
        since.is_some_and(|since| since.get(output) != self.epochs.get(output))
    }

    fn firing_busy(&self) -> bool {
        self.fire.busy || self.fiber.busy || self.momentary.busy
    }

    fn badge(&self) -> FiringBadge {
        if self.fire.active {
            FiringBadge::Toggle
        } else if self.fiber.active {
            FiringBadge::FiberToggle
        } else if self.momentary.held.is_some() {
            FiringBadge::Momentary
        } else if self.server_firing {
            FiringBadge::Unattributed
        } else {
            FiringBadge::NotFiring
        }
    }

    /// Starts or stops the elapsed timer to match the badge. A timer that is
    /// already running keeps its start.
    fn sync_timer(&mut self, now: Instant, offset: Duration) {
        let should_run = self.badge() != FiringBadge::NotFiring;
        if should_run && !self.timer.is_running() {
            self.timer.start_with_offset(now, offset);
        } else if !should_run && self.timer.is_running() {
            self.timer.stop();
        }
    }

    fn views(&self) -> PanelViews {
        PanelViews {
            fire: self.fire.view(),
            fiber: self.fiber.view(),
            fan: self.fan.view(),
            lights: self.lights.view(),
            auto_cycle: self.auto_cycle.view(),
            table: self.table.view(),
            firing: firing_view(self.badge(), &self.timer),
            estop_active: self.estop_active,
        }
    }
}

fn render_if_changed<V: PartialEq + Copy>(slot: &mut Option<V>, view: V, render: impl FnOnce(&V)) {
    if slot.as_ref() != Some(&view) {
        render(&view);
        *slot = Some(view);
    }
}

pub struct OutputStateReconciler {
    api: Arc<dyn ControlApi>,
    surface: Arc<dyn ControlSurface>,
    activity_log: Arc<dyn ActivityLog>,
    cycle_controller: Arc<dyn CycleController>,
    preferences: Arc<dyn AutoCyclePreferences>,
    config: ReconcilerConfig,
    inner: Mutex<ReconcilerState>,
}

impl OutputStateReconciler {
    pub async fn new(
        api: Arc<dyn ControlApi>,
        surface: Arc<dyn ControlSurface>,
        config: ReconcilerConfig,
    ) -> Arc<Self> {
        Self::new_with_dependencies(api, surface, config, ReconcilerDependencies::default()).await
    }

    pub async fn new_with_dependencies(
        api: Arc<dyn ControlApi>,
        surface: Arc<dyn ControlSurface>,
        config: ReconcilerConfig,
        dependencies: ReconcilerDependencies,
    ) -> Arc<Self> {
        let stored = match dependencies.preferences.load().await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("reconciler: failed to load auto-cycle preferences: {err:#}");
                StoredAutoCycle::default()
            }
        };

        let reconciler = Arc::new(Self {
            api,
            surface,
            activity_log: dependencies.activity_log,
            cycle_controller: dependencies.cycle_controller,
            preferences: dependencies.preferences,
            config,
            inner: Mutex::new(ReconcilerState::new(stored)),
        });

        {
            let mut state = reconciler.inner.lock().await;
            reconciler.flush(&mut state);
        }
        reconciler
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub async fn views(&self) -> PanelViews {
        self.inner.lock().await.views()
    }

    pub async fn firing_elapsed(&self) -> Option<Duration> {
        self.inner.lock().await.timer.elapsed(Instant::now())
    }

    pub async fn is_busy(&self, output: OutputId) -> bool {
        let mut state = self.inner.lock().await;
        state.busy_mut(output).map(|busy| *busy).unwrap_or(false)
    }

    pub async fn apply_user_action(self: &Arc<Self>, action: UserAction) -> ActionOutcome {
        debug!("reconciler: user action {action:?}");
        match action {
            UserAction::Toggle(channel) => self.toggle(channel).await,
            UserAction::MomentaryPress(channel) => self.momentary_press(channel).await,
            UserAction::MomentaryRelease(channel) => self.momentary_release(channel).await,
            UserAction::SetRelay(relay, mode) => self.set_relay(relay, mode).await,
            UserAction::SetAutoCycleEnabled(enabled) => self.set_auto_cycle_enabled(enabled).await,
            UserAction::RunTable(direction) => self.run_table(direction).await,
            UserAction::StopTable => self.stop_table().await,
            UserAction::EmergencyStop => self.emergency_stop().await,
        }
    }

    async fn toggle(&self, channel: ToggleChannel) -> ActionOutcome {
        let output = channel.output_id();
        let prior = {
            let mut state = self.inner.lock().await;
            if !self.try_begin(&mut state, output) {
                return ActionOutcome::Rejected(output);
            }
            self.flush(&mut state);
            state.toggle(channel).active
        };

        let result = self.guarded(self.api.fire(channel, FireMode::Toggle)).await;

        let mut state = self.inner.lock().await;
        state.toggle_mut(channel).busy = false;
        match result {
            Ok(response) => {
                let active = response
                    .toggle_state
                    .map(ToggleState::is_active)
                    .unwrap_or(!prior);
                state.toggle_mut(channel).active = active;
                if !active {
                    state.server_firing = false;
                }
                state.sync_timer(Instant::now(), Duration::ZERO);
                self.flush(&mut state);
                let verb = if active { "activated" } else { "deactivated" };
                self.note(LogLevel::Info, format!("{channel:?} toggle {verb}"));
                ActionOutcome::Applied
            }
            Err(err @ ControlError::Timeout(_)) => {
                state.toggle_mut(channel).active = false;
                state.sync_timer(Instant::now(), Duration::ZERO);
                self.flush(&mut state);
                self.report_failure(output, &err);
                drop(state);
                self.recover(output).await;
                ActionOutcome::TimedOut
            }
            Err(err) => {
                state.toggle_mut(channel).active = prior;
                state.sync_timer(Instant::now(), Duration::ZERO);
                self.flush(&mut state);
                self.report_failure(output, &err);
                ActionOutcome::Failed(err)
            }
        }
    }

    async fn momentary_press(&self, channel: ToggleChannel) -> ActionOutcome {
        let output = OutputId::Momentary;
        {
            let mut state = self.inner.lock().await;
            if !self.try_begin(&mut state, output) {
                return ActionOutcome::Rejected(output);
            }
            state.momentary.held = Some(channel);
            state.sync_timer(Instant::now(), Duration::ZERO);
            self.flush(&mut state);
        }

        let result = self.guarded(self.api.fire(channel, FireMode::Momentary)).await;

        let mut state = self.inner.lock().await;
        state.momentary.busy = false;
        match result {
            Ok(_) => {
                let released_meanwhile = state.momentary.held != Some(channel);
                self.flush(&mut state);
                drop(state);
                if released_meanwhile {
                    // The release overtook the press; make sure the press
                    // does not leave the output firing.
                    info!("momentary: {channel:?} released before press completed, stopping");
                    if let Err(err) = self.guarded(self.api.stop_firing()).await {
                        error!("momentary: follow-up stop failed: {err}");
                    }
                }
                ActionOutcome::Applied
            }
            Err(err @ ControlError::Timeout(_)) => {
                state.momentary.held = None;
                state.sync_timer(Instant::now(), Duration::ZERO);
                self.flush(&mut state);
                self.report_failure(output, &err);
                drop(state);
                self.recover(output).await;
                ActionOutcome::TimedOut
            }
            Err(err) => {
                state.momentary.held = None;
                state.sync_timer(Instant::now(), Duration::ZERO);
                self.flush(&mut state);
                self.report_failure(output, &err);
                ActionOutcome::Failed(err)
            }
        }
    }

    async fn momentary_release(&self, channel: ToggleChannel) -> ActionOutcome {
        let output = OutputId::Momentary;
        {
            let mut state = self.inner.lock().await;
            if state.momentary.held != Some(channel) {
                debug!("momentary: release of {channel:?} without a matching hold");
            }
            state.epochs.bump(output);
            state.momentary.held = None;
            state.server_firing = false;
            state.sync_timer(Instant::now(), Duration::ZERO);
            self.flush(&mut state);
        }

        match self.guarded(self.api.stop_firing()).await {
            Ok(_) => ActionOutcome::Applied,
            Err(err @ ControlError::Timeout(_)) => {
                self.report_failure_unlocked(output, &err).await;
                self.recover(output).await;
                ActionOutcome::TimedOut
            }
            Err(err) => {
                self.report_failure_unlocked(output, &err).await;
                ActionOutcome::Failed(err)
            }
        }
    }

    async fn set_relay(&self, relay: RelayOutput, mode: TriStateMode) -> ActionOutcome {
        let output = relay.output_id();
        let prior = {
            let mut state = self.inner.lock().await;
            if !self.try_begin(&mut state, output) {
                return ActionOutcome::Rejected(output);
            }
            let prior = *state.relay(relay);
            state.relay_mut(relay).set_mode(mode);
            self.flush(&mut state);
            prior
        };

        let result = self
            .guarded(self.api.set_relay(relay, RelaySetRequest::for_mode(mode)))
            .await;

        let mut state = self.inner.lock().await;
        match result {
            Ok(status) => {
                let current = state.relay_mut(relay);
                current.busy = false;
                current.set_mode(status.mode.unwrap_or(mode));
                if let Some(relay_state) = status.state {
                    current.effective_state = relay_state;
                }
                self.flush(&mut state);
                self.note(LogLevel::Info, format!("{relay:?} set to {mode}"));
                ActionOutcome::Applied
            }
            Err(err) => {
                *state.relay_mut(relay) = TriStateOutput {
                    busy: false,
                    ..prior
                };
                self.flush(&mut state);
                self.report_failure(output, &err);
                drop(state);
                if matches!(err, ControlError::Timeout(_)) {
                    self.recover(output).await;
                    return ActionOutcome::TimedOut;
                }
                ActionOutcome::Failed(err)
            }
        }
    }

    async fn set_auto_cycle_enabled(&self, enabled: bool) -> ActionOutcome {
        let output = OutputId::AutoCycle;
        let must_stop = {
            let mut state = self.inner.lock().await;
            if !self.try_begin(&mut state, output) {
                return ActionOutcome::Rejected(output);
            }
            let changed = state.auto_cycle.enabled != enabled;
            let must_stop = !enabled && state.auto_cycle.running;
            if !must_stop {
                state.auto_cycle.enabled = enabled;
                state.auto_cycle.busy = false;
            }
            self.flush(&mut state);
            if !must_stop && !changed {
                return ActionOutcome::Applied;
            }
            must_stop
        };

        if !must_stop {
            self.persist_auto_cycle_enabled(enabled).await;
            return ActionOutcome::Applied;
        }

        // A running cycle cannot be shown as disabled; stop the table first.
        let result = self.stop_table_motion().await;

        let mut state = self.inner.lock().await;
        state.auto_cycle.busy = false;
        match result {
            Ok(()) => {
                state.auto_cycle.running = false;
                state.auto_cycle.enabled = false;
                state.table.status.table_forward_state = false;
                state.table.status.table_backward_state = false;
                self.flush(&mut state);
                drop(state);
                self.persist_auto_cycle_enabled(false).await;
                ActionOutcome::Applied
            }
            Err(err) => {
                self.flush(&mut state);
                self.report_failure(output, &err);
                drop(state);
                if matches!(err, ControlError::Timeout(_)) {
                    self.recover(output).await;
                    return ActionOutcome::TimedOut;
                }
                ActionOutcome::Failed(err)
            }
        }
    }

    async fn persist_auto_cycle_enabled(&self, enabled: bool) {
        let stored = self.inner.lock().await.auto_cycle.stored();
        self.persist(stored).await;
        self.cycle_controller.enabled_changed(enabled);
        let text = if enabled { "enabled" } else { "disabled" };
        self.note(LogLevel::Info, format!("Auto-cycle {text}"));
    }

    async fn run_table(&self, direction: TableDirection) -> ActionOutcome {
        let output = OutputId::Table;
        let (prior, epoch) = {
            let mut state = self.inner.lock().await;
            if !self.try_begin(&mut state, output) {
                return ActionOutcome::Rejected(output);
            }
            let prior = state.table.status;
            state.table.status.table_forward_state = direction == TableDirection::Forward;
            state.table.status.table_backward_state = direction == TableDirection::Backward;
            self.flush(&mut state);
            (prior, state.epochs.get(output))
        };

        let result = self.guarded(self.api.move_table(direction, true)).await;

        let mut state = self.inner.lock().await;
        state.table.busy = false;
        let stopped_meanwhile = state.epochs.get(output) != epoch;
        match result {
            Ok(_) if stopped_meanwhile => {
                self.flush(&mut state);
                drop(state);
                // The stop overtook this run; the run may have landed last.
                info!("table: stop overtook {direction:?} run, stopping again");
                if let Err(err) = self.stop_table_motion().await {
                    error!("table: follow-up stop failed: {err}");
                }
                ActionOutcome::Applied
            }
            Ok(response) => {
                let moving = response.state.unwrap_or(true);
                match direction {
                    TableDirection::Forward => state.table.status.table_forward_state = moving,
                    TableDirection::Backward => state.table.status.table_backward_state = moving,
                }
                self.flush(&mut state);
                self.note(LogLevel::Info, format!("Table moving {direction:?}"));
                ActionOutcome::Applied
            }
            Err(err @ ControlError::Timeout(_)) => {
                state.table.status.table_forward_state = false;
                state.table.status.table_backward_state = false;
                self.flush(&mut state);
                self.report_failure(output, &err);
                drop(state);
                self.recover(output).await;
                ActionOutcome::TimedOut
            }
            Err(err) => {
                if !stopped_meanwhile {
                    state.table.status = prior;
                }
                self.flush(&mut state);
                self.report_failure(output, &err);
                ActionOutcome::Failed(err)
            }
        }
    }

    async fn stop_table(&self) -> ActionOutcome {
        let output = OutputId::Table;
        {
            let mut state = self.inner.lock().await;
            let now = Instant::now();
            if let Some(last) = state.table.last_stop_at {
                if now.saturating_duration_since(last) < self.config.stop_debounce {
                    debug!("table: stop coalesced");
                    return ActionOutcome::Coalesced;
                }
            }
            state.table.last_stop_at = Some(now);
            state.epochs.bump(output);
            state.table.status.table_forward_state = false;
            state.table.status.table_backward_state = false;
            self.flush(&mut state);
        }

        match self.stop_table_motion().await {
            Ok(()) => {
                self.note(LogLevel::Info, "Table stopped".to_string());
                ActionOutcome::Applied
            }
            Err(err @ ControlError::Timeout(_)) => {
                self.report_failure_unlocked(output, &err).await;
                self.recover_with(output, Corrective::EmergencyStop).await;
                ActionOutcome::TimedOut
            }
            Err(err) => {
                self.report_failure_unlocked(output, &err).await;
                if let Err(poll_err) = self.poll_and_reconcile().await {
                    debug!("table: repoll after failed stop failed: {poll_err}");
                }
                ActionOutcome::Failed(err)
            }
        }
    }

    async fn stop_table_motion(&self) -> Result<(), ControlError> {
        self.guarded(async {
            let (forward, backward) = tokio::join!(
                self.api.move_table(TableDirection::Forward, false),
                self.api.move_table(TableDirection::Backward, false),
            );
            forward.and(backward).map(|_| ())
        })
        .await
    }

    async fn emergency_stop(self: &Arc<Self>) -> ActionOutcome {
        let output = OutputId::EmergencyStop;
        let generation = {
            let mut state = self.inner.lock().await;
            state.fire.active = false;
            state.fiber.active = false;
            state.momentary.held = None;
            state.server_firing = false;
            state.auto_cycle.running = false;
            state.table.status.table_forward_state = false;
            state.table.status.table_backward_state = false;
            for touched in [
                OutputId::FireToggle,
                OutputId::FiberToggle,
                OutputId::Momentary,
                OutputId::AutoCycle,
                OutputId::Table,
            ] {
                state.epochs.bump(touched);
            }
            state.estop_active = true;
            state.estop_generation += 1;
            state.sync_timer(Instant::now(), Duration::ZERO);
            self.flush(&mut state);
            state.estop_generation
        };
        warn!("reconciler: emergency stop requested");

        let reconciler = Arc::clone(self);
        let confirm_after = self.config.estop_confirmation_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(confirm_after).await;
            let mut state = reconciler.inner.lock().await;
            if state.estop_generation == generation {
                state.estop_active = false;
                reconciler.flush(&mut state);
            }
        });

        match self.guarded(self.api.estop()).await {
            Ok(_) => {
                self.note(LogLevel::Warning, "Emergency stop engaged".to_string());
                ActionOutcome::Applied
            }
            Err(err @ ControlError::Timeout(_)) => {
                self.report_failure_unlocked(output, &err).await;
                ActionOutcome::TimedOut
            }
            Err(err) => {
                self.report_failure_unlocked(output, &err).await;
                ActionOutcome::Failed(err)
            }
        }
    }

    /// Corrective call after a request outlived the action timeout, followed
    /// by a fresh poll.
    async fn recover(&self, output: OutputId) {
        self.recover_with(output, Corrective::for_output(output)).await;
    }

    async fn recover_with(&self, output: OutputId, corrective: Corrective) {
        let result = match corrective {
            Corrective::EmergencyStop => {
                warn!("reconciler: {output} timed out, issuing estop");
                self.guarded(self.api.estop()).await.map(|_| ())
            }
            Corrective::StopTable => {
                warn!("reconciler: {output} timed out, stopping table");
                self.stop_table_motion().await
            }
            Corrective::RepollOnly => Ok(()),
        };
        if let Err(err) = result {
            error!("reconciler: corrective call for {output} failed: {err}");
        }
        if let Err(err) = self.poll_and_reconcile().await {
            debug!("reconciler: repoll after {output} timeout failed: {err}");
        }
    }

    pub async fn fetch_snapshot(&self) -> Result<ServerSnapshot, ControlError> {
        let (servo, fan, lights, motion) = tokio::join!(
            self.guarded(self.api.servo_status()),
            self.guarded(self.api.relay_status(RelayOutput::Fan)),
            self.guarded(self.api.relay_status(RelayOutput::Lights)),
            self.guarded(self.api.table_status()),
        );
        let servo = servo?;
        Ok(ServerSnapshot {
            fan: optional("fan status", fan),
            lights: optional("lights status", lights),
            motion: optional("table status", motion),
            ..ServerSnapshot::from_servo_status(&servo)
        })
    }

    pub async fn poll_and_reconcile(&self) -> Result<ReconcileReport, ControlError> {
        let epochs = self.inner.lock().await.epochs.clone();
        let snapshot = self.fetch_snapshot().await?;
        Ok(self.reconcile_since(&snapshot, Some(&epochs)).await)
    }

    /// Replaces local belief with `snapshot` wherever they differ. Outputs
    /// with a user action in flight are left alone.
    pub async fn reconcile(&self, snapshot: &ServerSnapshot) -> ReconcileReport {
        self.reconcile_since(snapshot, None).await
    }

    /// Like [`Self::reconcile`], also skipping outputs with an action started
    /// after `since` was taken: the snapshot may predate that action.
    async fn reconcile_since(
        &self,
        snapshot: &ServerSnapshot,
        since: Option<&ActionEpochs>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut persist = None;
        let mut enabled_raised = false;
        let mut progress = None;
        let mut issue_stop = false;

        {
            let mut state = self.inner.lock().await;
            let toggles = snapshot.toggles;

            for channel in ToggleChannel::ALL {
                let server_active = match channel {
                    ToggleChannel::Fire => toggles.fire_toggle_active,
                    ToggleChannel::Fiber => toggles.fiber_toggle_active,
                };
                if state.touched_since(channel.output_id(), since) {
                    continue;
                }
                let toggle = state.toggle_mut(channel);
                if toggle.busy || toggle.active == server_active {
                    continue;
                }
                toggle.active = server_active;
                report.corrected.push(channel.output_id());
                let text = if server_active { "active" } else { "inactive" };
                self.note(
                    LogLevel::Info,
                    format!("{channel:?} toggle synced from server: {text}"),
                );
            }

            for relay in RelayOutput::ALL {
                let Some(status) = snapshot.relay(relay) else {
                    continue;
                };
                if state.touched_since(relay.output_id(), since) {
                    continue;
                }
                let output = state.relay_mut(relay);
                if output.busy {
                    continue;
                }
                let before = output.view();
                output.apply_status(status);
                if output.view() != before {
                    report.corrected.push(relay.output_id());
                    let mode = output.mode;
                    self.note(LogLevel::Info, format!("{relay:?} synced from server: {mode}"));
                }
            }

            if !state.auto_cycle.busy && !state.touched_since(OutputId::AutoCycle, since) {
                let table = snapshot.table;
                let before = state.auto_cycle;
                let cycle = &mut state.auto_cycle;
                cycle.running = table.auto_cycle_running;
                cycle.cycle_count = table.cycle_count;
                cycle.progress_percent = clamp_progress(table.cycle_progress);
                let moving = table.auto_cycle_running || table.table_running;
                if (moving || table.auto_cycle_enabled) && !cycle.enabled {
                    cycle.enabled = true;
                    enabled_raised = true;
                }
                let after = *cycle;

                if enabled_raised && moving {
                    warn!("reconciler: auto-cycle running while disabled locally, enabling");
                    self.note(
                        LogLevel::Warning,
                        "Auto-cycle is running on the table; switch enabled".to_string(),
                    );
                } else if enabled_raised {
                    self.note(LogLevel::Info, "Auto-cycle enabled by server".to_string());
                }
                if after.enabled != before.enabled || after.cycle_count != before.cycle_count {
                    persist = Some(after.stored());
                }
                if after.running != before.running
                    || after.cycle_count != before.cycle_count
                    || after.progress_percent != before.progress_percent
                {
                    progress = Some((after.running, after.cycle_count, after.progress_percent));
                }
                if after.view() != before.view() {
                    report.corrected.push(OutputId::AutoCycle);
                }
            }

            if let Some(motion) = snapshot.motion {
                if !state.table.busy
                    && !state.touched_since(OutputId::Table, since)
                    && state.table.status != motion
                {
                    state.table.status = motion;
                    report.corrected.push(OutputId::Table);
                }
            }

            let firing_touched = [
                OutputId::FireToggle,
                OutputId::FiberToggle,
                OutputId::Momentary,
            ]
            .into_iter()
            .any(|output| state.touched_since(output, since));

            if !firing_touched {
                if !toggles.is_firing && state.momentary.held.is_some() && !state.momentary.busy
                {
                    state.momentary.held = None;
                    report.corrected.push(OutputId::Momentary);
                }

                state.server_firing = toggles.is_firing;
                let offset = if toggles.is_firing {
                    Duration::from_millis(toggles.firing_duration_ms)
                } else {
                    Duration::ZERO
                };
                state.sync_timer(Instant::now(), offset);

                let unattributed = toggles.is_firing
                    && !state.fire.active
                    && !state.fiber.active
                    && state.momentary.held.is_none()
                    && !state.firing_busy();
                issue_stop = unattributed && !state.inconsistency_reported;
                state.inconsistency_reported = unattributed;
                if issue_stop {
                    warn!("reconciler: server reports firing with no active toggle, stopping");
                    self.note(
                        LogLevel::Warning,
                        "Firing reported with no active toggle; sending stop".to_string(),
                    );
                }
            }

            self.flush(&mut state);
        }

        if let Some(stored) = persist {
            self.persist(stored).await;
        }
        if enabled_raised {
            self.cycle_controller.enabled_changed(true);
        }
        if let Some((running, cycle_count, percent)) = progress {
            self.cycle_controller
                .cycle_progress(running, cycle_count, percent);
        }
        if issue_stop {
            report.stop_issued = true;
            if let Err(err) = self.guarded(self.api.stop_firing()).await {
                error!("reconciler: stop for unattributed firing failed: {err}");
            }
        }
        report
    }

    fn try_begin(&self, state: &mut ReconcilerState, output: OutputId) -> bool {
        if let Some(busy) = state.busy_mut(output) {
            if *busy {
                warn!("reconciler: {output} operation in progress, ignoring action");
                self.activity_log
                    .record(LogLevel::Warning, &format!("{output}: operation in progress"));
                return false;
            }
            *busy = true;
        }
        state.epochs.bump(output);
        true
    }

    async fn guarded<T>(
        &self,
        request: impl Future<Output = Result<T, ControlError>>,
    ) -> Result<T, ControlError> {
        match tokio::time::timeout(self.config.action_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ControlError::Timeout(self.config.action_timeout)),
        }
    }

    async fn persist(&self, stored: StoredAutoCycle) {
        if let Err(err) = self.preferences.save(stored).await {
            warn!("reconciler: failed to persist auto-cycle preferences: {err:#}");
        }
    }

    fn note(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("reconciler: {message}"),
            LogLevel::Warning => warn!("reconciler: {message}"),
            LogLevel::Error => error!("reconciler: {message}"),
        }
        self.activity_log.record(level, &message);
    }

    fn report_failure(&self, output: OutputId, err: &ControlError) {
        let message = format!("{output}: {err}");
        self.surface.show_error(output, &message);
        self.note(LogLevel::Error, message);
    }

    async fn report_failure_unlocked(&self, output: OutputId, err: &ControlError) {
        // Keep surface calls ordered with renders made under the lock.
        let _state = self.inner.lock().await;
        self.report_failure(output, err);
    }

    fn flush(&self, state: &mut ReconcilerState) {
        let views = state.views();
        let rendered = &mut state.rendered;
        let surface = &self.surface;
        render_if_changed(&mut rendered.fire, views.fire, |v| surface.render_toggle(v));
        render_if_changed(&mut rendered.fiber, views.fiber, |v| surface.render_toggle(v));
        render_if_changed(&mut rendered.fan, views.fan, |v| surface.render_tri_state(v));
        render_if_changed(&mut rendered.lights, views.lights, |v| {
            surface.render_tri_state(v)
        });
        render_if_changed(&mut rendered.auto_cycle, views.auto_cycle, |v| {
            surface.render_auto_cycle(v)
        });
        render_if_changed(&mut rendered.table, views.table, |v| surface.render_table(v));
        render_if_changed(&mut rendered.firing, views.firing, |v| surface.render_firing(v));
        render_if_changed(&mut rendered.estop, views.estop_active, |v| {
            surface.render_estop(*v)
        });
    }
}

fn optional<T>(what: &str, result: Result<T, ControlError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("reconciler: {what} unavailable: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
