mod commands;
mod config;
mod terminal;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    api::ControlApi, spawn_reconcile_loop, surface::HeadlessSurface, ControlSurface,
    HttpControlApi, OutputStateReconciler, ReconcilerConfig, ReconcilerDependencies,
    ScheduleSettings, StoragePreferences, UserAction,
};
use shared::domain::{RelayOutput, TableDirection, ToggleChannel, TriStateMode};
use storage::Storage;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::Instant,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{describe_outcome, parse_command, PanelCommand, HELP},
    config::{load_settings, normalize_database_url, Settings},
    terminal::{describe_panel, LoggingCycleController, TerminalSurface, TracingActivityLog},
};

#[derive(Parser, Debug)]
#[command(name = "panel", about = "Laser workstation control panel")]
struct Cli {
    /// Workstation API base url; overrides panel.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    interval_secs: Option<u64>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep the panel in sync and read commands from stdin (default).
    Watch,
    /// Poll once and print every control.
    Status,
    /// Toggle a firing channel.
    Toggle { channel: ChannelArg },
    /// Fire momentarily for the given duration.
    Pulse {
        channel: ChannelArg,
        #[arg(long, default_value_t = 500)]
        ms: u64,
    },
    Fan { mode: ModeArg },
    Lights { mode: ModeArg },
    AutoCycle { state: SwitchArg },
    Table { motion: MotionArg },
    Estop,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ChannelArg {
    Fire,
    Fiber,
}

impl From<ChannelArg> for ToggleChannel {
    fn from(value: ChannelArg) -> Self {
        match value {
            ChannelArg::Fire => ToggleChannel::Fire,
            ChannelArg::Fiber => ToggleChannel::Fiber,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    On,
    Off,
    Auto,
}

impl From<ModeArg> for TriStateMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::On => TriStateMode::On,
            ModeArg::Off => TriStateMode::Off,
            ModeArg::Auto => TriStateMode::Auto,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SwitchArg {
    On,
    Off,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MotionArg {
    Forward,
    Backward,
    Stop,
}

impl Command {
    fn action(&self) -> Option<UserAction> {
        let action = match *self {
            Command::Toggle { channel } => UserAction::Toggle(channel.into()),
            Command::Fan { mode } => UserAction::SetRelay(RelayOutput::Fan, mode.into()),
            Command::Lights { mode } => UserAction::SetRelay(RelayOutput::Lights, mode.into()),
            Command::AutoCycle { state } => {
                UserAction::SetAutoCycleEnabled(matches!(state, SwitchArg::On))
            }
            Command::Table { motion } => match motion {
                MotionArg::Forward => UserAction::RunTable(TableDirection::Forward),
                MotionArg::Backward => UserAction::RunTable(TableDirection::Backward),
                MotionArg::Stop => UserAction::StopTable,
            },
            Command::Estop => UserAction::EmergencyStop,
            Command::Watch | Command::Status | Command::Pulse { .. } => return None,
        };
        Some(action)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(v) = cli.server_url {
        settings.server_url = v;
    }
    if let Some(v) = cli.database_url {
        settings.database_url = v;
    }
    if let Some(v) = cli.interval_secs {
        settings.reconcile_interval_secs = v;
    }

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(&settings).await,
        Command::Status => status(&settings).await,
        Command::Pulse { channel, ms } => {
            let reconciler = build_reconciler(&settings, Arc::new(TerminalSurface)).await?;
            sync_once(&reconciler).await;
            pulse(&reconciler, channel.into(), Duration::from_millis(ms)).await;
            Ok(())
        }
        command => {
            let Some(action) = command.action() else {
                return Ok(());
            };
            let reconciler = build_reconciler(&settings, Arc::new(TerminalSurface)).await?;
            sync_once(&reconciler).await;
            let outcome = reconciler.apply_user_action(action).await;
            println!("{}", describe_outcome(action, &outcome));
            Ok(())
        }
    }
}

async fn build_reconciler(
    settings: &Settings,
    surface: Arc<dyn ControlSurface>,
) -> Result<Arc<OutputStateReconciler>> {
    let api = Arc::new(HttpControlApi::new(settings.server_url.clone())?);

    let mut config = ReconcilerConfig {
        action_timeout: settings.action_timeout(),
        stop_debounce: settings.stop_debounce(),
        ..ReconcilerConfig::default()
    };
    match tokio::time::timeout(settings.action_timeout(), api.timing_config()).await {
        Ok(Ok(timing)) => config = config.with_timing(timing),
        Ok(Err(err)) => warn!("panel: timing config unavailable, using defaults: {err}"),
        Err(_) => warn!("panel: timing config request timed out, using defaults"),
    }

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open preference store '{database_url}'"))?;

    let dependencies = ReconcilerDependencies {
        activity_log: Arc::new(TracingActivityLog),
        cycle_controller: Arc::new(LoggingCycleController),
        preferences: Arc::new(StoragePreferences::new(storage)),
    };
    info!("panel: connected to {}", api.server_url());
    Ok(OutputStateReconciler::new_with_dependencies(api, surface, config, dependencies).await)
}

/// Actions decide from local belief, so bring it up to date first.
async fn sync_once(reconciler: &OutputStateReconciler) {
    if let Err(err) = reconciler.poll_and_reconcile().await {
        warn!("panel: initial poll failed: {err}");
    }
}

async fn pulse(reconciler: &Arc<OutputStateReconciler>, channel: ToggleChannel, hold: Duration) {
    let press = UserAction::MomentaryPress(channel);
    let outcome = reconciler.apply_user_action(press).await;
    println!("{}", describe_outcome(press, &outcome));
    if outcome.is_applied() {
        tokio::time::sleep(hold).await;
    }
    let release = UserAction::MomentaryRelease(channel);
    let outcome = reconciler.apply_user_action(release).await;
    println!("{}", describe_outcome(release, &outcome));
}

async fn status(settings: &Settings) -> Result<()> {
    let reconciler = build_reconciler(settings, Arc::new(HeadlessSurface)).await?;
    reconciler
        .poll_and_reconcile()
        .await
        .context("failed to poll workstation status")?;
    for line in describe_panel(&reconciler.views().await, Instant::now()) {
        println!("{line}");
    }
    Ok(())
}

async fn watch(settings: &Settings) -> Result<()> {
    let reconciler = build_reconciler(settings, Arc::new(TerminalSurface)).await?;
    let handle = spawn_reconcile_loop(
        reconciler.clone(),
        ScheduleSettings {
            initial_delay: settings.initial_delay(),
            interval: settings.reconcile_interval(),
        },
    );
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        match command {
            PanelCommand::Action(action) => {
                // Run detached so a release can overtake a pending press.
                let reconciler = reconciler.clone();
                tokio::spawn(async move {
                    let outcome = reconciler.apply_user_action(action).await;
                    println!("{}", describe_outcome(action, &outcome));
                });
            }
            PanelCommand::Visible => handle.visibility_regained(),
            PanelCommand::Refresh => handle.request_reconcile(),
            PanelCommand::Status => {
                for line in describe_panel(&reconciler.views().await, Instant::now()) {
                    println!("{line}");
                }
            }
            PanelCommand::Help => println!("{HELP}"),
            PanelCommand::Quit => break,
        }
    }

    handle.shutdown().await;
    info!("panel: stopped");
    Ok(())
}
