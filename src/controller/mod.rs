//! Reconciles operator intent (`Target`) with observed `Status`: target and
//! status are kept as two separate variables and every input
//! (`CommandEvent`, a status change, cancellation) simply re-evaluates the
//! same pure decision table rather than driving an ad-hoc state machine per
//! input kind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::{CommandEvent, PermissionCategory};
use crate::events::Bus;
use crate::process::{ProcessControl, ServerOutput};
use crate::status::Status;
use crate::supervisor::{ExitReason, Service};

pub const START_COMMAND: &str = "start";
pub const STOP_COMMAND: &str = "stop";
pub const RESTART_COMMAND: &str = "restart";
pub const SHUTDOWN_COMMAND: &str = "shutdown";
pub const CONSOLE_COMMAND: &str = "console";

/// Operator intent, independent of the observed [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Start,
    Stop,
    Restart,
    Shutdown,
}

/// What the §4.6 decision table says to do given the current `(target,
/// status)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    StartProcess,
    StopProcess,
    Terminate,
}

/// `Restart` naturally lowers itself to `Start` once the process has fully
/// stopped — one place (here) owns that sequencing so nothing else needs to
/// remember "we were restarting".
fn lower(target: Target, status: Status) -> Target {
    if target == Target::Restart && status == Status::Stopped {
        Target::Start
    } else {
        target
    }
}

/// Pure decision table (§4.6). Arm order matters: a `Shutdown` target only
/// reaches the `Terminate` arm once the `Stop` arm's guard (status not
/// already `Stopping`/`Stopped`) has failed.
fn decide(target: Target, status: Status) -> Option<Action> {
    use Status::*;
    match target {
        Target::Start if !matches!(status, Starting | Started | Ready | Unreachable) => {
            Some(Action::StartProcess)
        }
        Target::Stop | Target::Restart | Target::Shutdown
            if !matches!(status, Stopping | Stopped) =>
        {
            Some(Action::StopProcess)
        }
        Target::Shutdown if status == Stopped => Some(Action::Terminate),
        _ => None,
    }
}

pub fn command_definitions() -> Vec<crate::chat::CommandDefinition> {
    vec![
        crate::chat::CommandDefinition {
            name: START_COMMAND,
            description: "start the server",
            category: PermissionCategory::Control,
        },
        crate::chat::CommandDefinition {
            name: STOP_COMMAND,
            description: "stop the server",
            category: PermissionCategory::Control,
        },
        crate::chat::CommandDefinition {
            name: RESTART_COMMAND,
            description: "restart the server",
            category: PermissionCategory::Control,
        },
        crate::chat::CommandDefinition {
            name: SHUTDOWN_COMMAND,
            description: "stop the server and exit the daemon",
            category: PermissionCategory::Admin,
        },
        crate::chat::CommandDefinition {
            name: CONSOLE_COMMAND,
            description: "write a line to the server's standard input",
            category: PermissionCategory::Control,
        },
    ]
}

/// Deadline for a `console` reply: how long to wait for the next line of
/// server output after writing to stdin, bounded below the registry's own
/// 5 s reply timeout.
const CONSOLE_REPLY_TIMEOUT: Duration = Duration::from_millis(4500);

pub struct Controller {
    process: Arc<dyn ProcessControl>,
    status_rx: watch::Receiver<Status>,
    bus: Bus,
    commands: Mutex<mpsc::Receiver<CommandEvent>>,
    initial_target: Target,
}

impl Controller {
    pub fn new(
        process: Arc<dyn ProcessControl>,
        status_rx: watch::Receiver<Status>,
        bus: Bus,
        commands: mpsc::Receiver<CommandEvent>,
        autostart: bool,
    ) -> Self {
        Self {
            process,
            status_rx,
            bus,
            commands: Mutex::new(commands),
            initial_target: if autostart { Target::Start } else { Target::Stop },
        }
    }

    async fn apply(&self, target: Target) -> Option<Action> {
        let status = *self.status_rx.borrow();
        let action = decide(target, status);
        match action {
            Some(Action::StartProcess) => {
                info!(%status, "controller.process.start");
                self.process.start().await;
            }
            Some(Action::StopProcess) => {
                info!(%status, "controller.process.stop");
                self.process.stop().await;
            }
            Some(Action::Terminate) => {
                info!("controller.terminate");
            }
            None => {}
        }
        action
    }

    /// Handle the `console` command out-of-band from the main select loop so
    /// a slow (or never-responding) server doesn't stall start/stop/shutdown
    /// processing for up to 5 seconds.
    fn spawn_console_reply(&self, cmd: CommandEvent) {
        let process = self.process.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let line = cmd.args.join(" ");
            if let Err(e) = process.write_line(&line).await {
                let _ = cmd.reply.send(format!("failed to write to server: {e}"));
                return;
            }
            let mut output = bus.subscribe::<ServerOutput>();
            let reply = match tokio::time::timeout(CONSOLE_REPLY_TIMEOUT, output.recv()).await {
                Ok(Some(out)) => out.line,
                Ok(None) => "server output stream closed".to_string(),
                Err(_) => "timed out waiting for server output".to_string(),
            };
            let _ = cmd.reply.send(reply);
        });
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Target::Start => "start",
            Target::Stop => "stop",
            Target::Restart => "restart",
            Target::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

#[async_trait]
impl Service for Controller {
    async fn run(&self, cancel: CancellationToken) -> ExitReason {
        let mut target = self.initial_target;
        let mut status_rx = self.status_rx.clone();
        let mut commands = self.commands.lock().await;

        target = lower(target, *status_rx.borrow());
        if self.apply(target).await == Some(Action::Terminate) {
            return ExitReason::TerminateTree;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("controller.shutdown.requested");
                    target = Target::Shutdown;
                }
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return ExitReason::Other(anyhow::anyhow!("status channel closed"));
                    }
                }
                Some(cmd) = commands.recv() => {
                    match cmd.name.as_str() {
                        START_COMMAND => {
                            target = Target::Start;
                            let _ = cmd.reply.send("target set to start".to_string());
                        }
                        STOP_COMMAND => {
                            target = Target::Stop;
                            let _ = cmd.reply.send("target set to stop".to_string());
                        }
                        RESTART_COMMAND => {
                            target = Target::Restart;
                            let _ = cmd.reply.send("target set to restart".to_string());
                        }
                        SHUTDOWN_COMMAND => {
                            target = Target::Shutdown;
                            let _ = cmd.reply.send("shutting down".to_string());
                        }
                        CONSOLE_COMMAND => {
                            self.spawn_console_reply(cmd);
                            continue;
                        }
                        other => {
                            warn!(command = other, "controller.command.unexpected");
                            let _ = cmd.reply.send("unexpected command".to_string());
                        }
                    }
                }
            }

            target = lower(target, *status_rx.borrow());
            if self.apply(target).await == Some(Action::Terminate) {
                return ExitReason::TerminateTree;
            }
        }
    }
}
