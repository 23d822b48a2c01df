//! Wire types of the workstation's device-control HTTP API.
//!
//! Every body carries a `status`; all other fields are optional on decode so
//! that older backends and the simulated development backend both parse.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{FireMode, TriStateMode},
    error::{ApiError, ResponseStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleState {
    Active,
    Inactive,
}

impl ToggleState {
    pub fn is_active(self) -> bool {
        self == ToggleState::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireRequest {
    pub mode: FireMode,
}

/// Response to `/fire`, `/fire_fiber`, `/stop_firing` and `/estop`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toggle_state: Option<ToggleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated: Option<bool>,
}

impl CommandResponse {
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            ..Self::default()
        }
    }

    pub fn with_toggle_state(mut self, toggle_state: ToggleState) -> Self {
        self.toggle_state = Some(toggle_state);
        self
    }

    pub fn into_result(self) -> Result<Self, ApiError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, self.message.as_deref()))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToggleStates {
    pub fire_toggle_active: bool,
    pub fiber_toggle_active: bool,
    pub is_firing: bool,
    pub firing_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStates {
    pub auto_cycle_enabled: bool,
    pub auto_cycle_running: bool,
    pub table_running: bool,
    pub cycle_count: u32,
    pub cycle_progress: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServoStatusResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub toggle_states: ToggleStates,
    #[serde(default)]
    pub table_states: TableStates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `/fan/set` and `/lights/set`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    pub mode: TriStateMode,
}

impl RelaySetRequest {
    pub fn for_mode(mode: TriStateMode) -> Self {
        Self {
            state: mode.requested_state(),
            mode,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub fan_state: Option<bool>,
    #[serde(default)]
    pub fan_mode: Option<TriStateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightsResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub lights_state: Option<bool>,
    #[serde(default)]
    pub lights_mode: Option<TriStateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated: Option<bool>,
}

/// Relay status normalized across the fan and lights endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub state: Option<bool>,
    pub mode: Option<TriStateMode>,
}

impl FanResponse {
    pub fn into_relay_status(self) -> Result<RelayStatus, ApiError> {
        if !self.status.is_success() {
            return Err(ApiError::from_status(self.status, self.message.as_deref()));
        }
        Ok(RelayStatus {
            state: self.fan_state,
            mode: self.fan_mode,
        })
    }
}

impl LightsResponse {
    pub fn into_relay_status(self) -> Result<RelayStatus, ApiError> {
        if !self.status.is_success() {
            return Err(ApiError::from_status(self.status, self.message.as_deref()));
        }
        Ok(RelayStatus {
            state: self.lights_state,
            mode: self.lights_mode,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMoveRequest {
    pub state: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMoveResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStatus {
    pub table_forward_state: bool,
    pub table_backward_state: bool,
    pub table_front_switch_state: bool,
    pub table_back_switch_state: bool,
}

impl TableStatus {
    pub fn is_moving(&self) -> bool {
        self.table_forward_state || self.table_backward_state
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableStatusResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(flatten)]
    pub table: TableStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// E-stop banner auto-confirm timeout in milliseconds.
    #[serde(default = "default_estop_confirmation_timeout")]
    pub estop_confirmation_timeout: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            estop_confirmation_timeout: default_estop_confirmation_timeout(),
        }
    }
}

fn default_estop_confirmation_timeout() -> u64 {
    5000
}
