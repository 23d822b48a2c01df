//! Line commands accepted on stdin in watch mode.

use anyhow::{anyhow, bail, Result};
use client_core::{ActionOutcome, UserAction};
use shared::domain::{RelayOutput, TableDirection, ToggleChannel, TriStateMode};

pub const HELP: &str = "\
commands:
  fire | fiber                 toggle a firing channel
  hold <fire|fiber>            start momentary firing
  release <fire|fiber>         stop momentary firing
  fan <on|off|auto>            set the fan mode
  lights <on|off|auto>         set the lights mode
  auto-cycle <on|off>          enable or disable the table auto-cycle
  table <forward|backward|stop>
  estop                        emergency stop
  visible                      panel became visible again (reconcile now)
  refresh                      reconcile now
  status                       print every control
  quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Action(UserAction),
    Visible,
    Refresh,
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Option<PanelCommand>> {
    let mut words = line.split_whitespace().map(str::to_ascii_lowercase);
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    if let Some(extra) = words.next() {
        bail!("unexpected argument '{extra}'");
    }

    let command = match (head.as_str(), arg.as_deref()) {
        ("fire", None) => PanelCommand::Action(UserAction::Toggle(ToggleChannel::Fire)),
        ("fiber", None) => PanelCommand::Action(UserAction::Toggle(ToggleChannel::Fiber)),
        ("hold", Some(channel)) => {
            PanelCommand::Action(UserAction::MomentaryPress(parse_channel(channel)?))
        }
        ("release", Some(channel)) => {
            PanelCommand::Action(UserAction::MomentaryRelease(parse_channel(channel)?))
        }
        ("fan", Some(mode)) => {
            PanelCommand::Action(UserAction::SetRelay(RelayOutput::Fan, parse_mode(mode)?))
        }
        ("lights", Some(mode)) => {
            PanelCommand::Action(UserAction::SetRelay(RelayOutput::Lights, parse_mode(mode)?))
        }
        ("auto-cycle", Some("on")) => PanelCommand::Action(UserAction::SetAutoCycleEnabled(true)),
        ("auto-cycle", Some("off")) => {
            PanelCommand::Action(UserAction::SetAutoCycleEnabled(false))
        }
        ("table", Some("forward")) => {
            PanelCommand::Action(UserAction::RunTable(TableDirection::Forward))
        }
        ("table", Some("backward")) => {
            PanelCommand::Action(UserAction::RunTable(TableDirection::Backward))
        }
        ("table", Some("stop")) => PanelCommand::Action(UserAction::StopTable),
        ("estop", None) => PanelCommand::Action(UserAction::EmergencyStop),
        ("visible", None) => PanelCommand::Visible,
        ("refresh", None) => PanelCommand::Refresh,
        ("status", None) => PanelCommand::Status,
        ("help", None) => PanelCommand::Help,
        ("quit" | "exit", None) => PanelCommand::Quit,
        _ => bail!("unknown command '{}'", line.trim()),
    };
    Ok(Some(command))
}

fn parse_channel(raw: &str) -> Result<ToggleChannel> {
    match raw {
        "fire" => Ok(ToggleChannel::Fire),
        "fiber" => Ok(ToggleChannel::Fiber),
        other => Err(anyhow!("unknown channel '{other}'")),
    }
}

fn parse_mode(raw: &str) -> Result<TriStateMode> {
    TriStateMode::ALL
        .into_iter()
        .find(|mode| mode.to_string() == raw)
        .ok_or_else(|| anyhow!("unknown mode '{raw}', expected on, off or auto"))
}

pub fn describe_outcome(action: UserAction, outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Applied => format!("{action:?}: ok"),
        ActionOutcome::Rejected(output) => format!("{action:?}: {output} is busy, ignored"),
        ActionOutcome::Coalesced => format!("{action:?}: coalesced with a recent stop"),
        ActionOutcome::Failed(err) => format!("{action:?}: failed: {err}"),
        ActionOutcome::TimedOut => format!("{action:?}: timed out, control reset"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions() {
        assert_eq!(
            parse_command("fire").expect("parse"),
            Some(PanelCommand::Action(UserAction::Toggle(ToggleChannel::Fire)))
        );
        assert_eq!(
            parse_command("  Lights AUTO ").expect("parse"),
            Some(PanelCommand::Action(UserAction::SetRelay(
                RelayOutput::Lights,
                TriStateMode::Auto
            )))
        );
        assert_eq!(
            parse_command("release fiber").expect("parse"),
            Some(PanelCommand::Action(UserAction::MomentaryRelease(
                ToggleChannel::Fiber
            )))
        );
        assert_eq!(
            parse_command("auto-cycle off").expect("parse"),
            Some(PanelCommand::Action(UserAction::SetAutoCycleEnabled(false)))
        );
        assert_eq!(
            parse_command("table stop").expect("parse"),
            Some(PanelCommand::Action(UserAction::StopTable))
        );
    }

    #[test]
    fn parses_panel_commands_and_blank_lines() {
        assert_eq!(parse_command("").expect("parse"), None);
        assert_eq!(
            parse_command("visible").expect("parse"),
            Some(PanelCommand::Visible)
        );
        assert_eq!(parse_command("exit").expect("parse"), Some(PanelCommand::Quit));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_command("fan sideways").is_err());
        assert!(parse_command("hold laser").is_err());
        assert!(parse_command("fire now please").is_err());
        assert!(parse_command("table").is_err());
    }

    #[test]
    fn describes_outcomes() {
        let action = UserAction::StopTable;
        assert_eq!(
            describe_outcome(action, &ActionOutcome::Coalesced),
            "StopTable: coalesced with a recent stop"
        );
        assert_eq!(
            describe_outcome(
                UserAction::Toggle(ToggleChannel::Fire),
                &ActionOutcome::Rejected(shared::domain::OutputId::FireToggle)
            ),
            "Toggle(Fire): fire_toggle is busy, ignored"
        );
    }
}
