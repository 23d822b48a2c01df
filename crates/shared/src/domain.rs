use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical firing channel. `Fire` drives the servo to position B, `Fiber`
/// runs the A-B-A-B fiber sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleChannel {
    Fire,
    Fiber,
}

impl ToggleChannel {
    pub const ALL: [ToggleChannel; 2] = [ToggleChannel::Fire, ToggleChannel::Fiber];

    pub fn fire_path(self) -> &'static str {
        match self {
            ToggleChannel::Fire => "/fire",
            ToggleChannel::Fiber => "/fire_fiber",
        }
    }

    pub fn output_id(self) -> OutputId {
        match self {
            ToggleChannel::Fire => OutputId::FireToggle,
            ToggleChannel::Fiber => OutputId::FiberToggle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireMode {
    Momentary,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriStateMode {
    On,
    Off,
    Auto,
}

impl TriStateMode {
    pub const ALL: [TriStateMode; 3] = [TriStateMode::On, TriStateMode::Off, TriStateMode::Auto];

    /// The explicit relay state sent alongside the mode. `Auto` leaves the
    /// decision to the server.
    pub fn requested_state(self) -> Option<bool> {
        match self {
            TriStateMode::On => Some(true),
            TriStateMode::Off => Some(false),
            TriStateMode::Auto => None,
        }
    }
}

impl fmt::Display for TriStateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TriStateMode::On => "on",
            TriStateMode::Off => "off",
            TriStateMode::Auto => "auto",
        };
        f.write_str(text)
    }
}

/// Relay outputs controlled through a tri-state (on/off/auto) button group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayOutput {
    Fan,
    Lights,
}

impl RelayOutput {
    pub const ALL: [RelayOutput; 2] = [RelayOutput::Fan, RelayOutput::Lights];

    pub fn set_path(self) -> &'static str {
        match self {
            RelayOutput::Fan => "/fan/set",
            RelayOutput::Lights => "/lights/set",
        }
    }

    pub fn status_path(self) -> &'static str {
        match self {
            RelayOutput::Fan => "/fan/status",
            RelayOutput::Lights => "/lights/status",
        }
    }

    pub fn output_id(self) -> OutputId {
        match self {
            RelayOutput::Fan => OutputId::Fan,
            RelayOutput::Lights => OutputId::Lights,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableDirection {
    Forward,
    Backward,
}

impl TableDirection {
    pub fn path(self) -> &'static str {
        match self {
            TableDirection::Forward => "/table/forward",
            TableDirection::Backward => "/table/backward",
        }
    }
}

/// Identity of a control whose requests are serialized by a busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputId {
    FireToggle,
    FiberToggle,
    Momentary,
    Fan,
    Lights,
    AutoCycle,
    Table,
    EmergencyStop,
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OutputId::FireToggle => "fire_toggle",
            OutputId::FiberToggle => "fiber_toggle",
            OutputId::Momentary => "momentary",
            OutputId::Fan => "fan",
            OutputId::Lights => "lights",
            OutputId::AutoCycle => "auto_cycle",
            OutputId::Table => "table",
            OutputId::EmergencyStop => "estop",
        };
        f.write_str(text)
    }
}
