//! Folds process and ping events into a single observable [`Status`] via a
//! channel+select loop: every incoming event re-evaluates a pure transition
//! table rather than driving an ad-hoc state machine per event kind.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chat::{CommandEvent, PermissionCategory};
use crate::events::{Bus, Notification, NotificationCategory, Timestamp};
use crate::pinger::PingOutcome;
use crate::process::ProcessEvent;
use crate::supervisor::{ExitReason, Service};

pub const STATUS_COMMAND: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stopped,
    Starting,
    Started,
    Ready,
    Unreachable,
    Stopping,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Started => "started",
            Status::Ready => "ready",
            Status::Unreachable => "unreachable",
            Status::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

enum Input<'a> {
    Process(&'a ProcessEvent),
    Ping(&'a PingOutcome),
}

/// Pure transition table (§4.5). Returns `None` for unspecified ("no-op")
/// pairs.
fn resolve(current: Status, input: Input<'_>) -> Option<Status> {
    use Status::*;
    match (current, input) {
        (Stopped, Input::Process(ProcessEvent::Starting)) => Some(Starting),
        (Starting, Input::Process(ProcessEvent::Started { .. })) => Some(Started),
        (Starting, Input::Process(ProcessEvent::Stopping)) => Some(Stopping),
        (Starting, Input::Process(ProcessEvent::Stopped { .. })) => Some(Stopped),
        (Started, Input::Process(ProcessEvent::Stopping)) => Some(Stopping),
        (Started, Input::Process(ProcessEvent::Stopped { .. })) => Some(Stopped),
        (Started, Input::Ping(PingOutcome::Success { .. })) => Some(Ready),
        (Ready, Input::Process(ProcessEvent::Stopping)) => Some(Stopping),
        (Ready, Input::Process(ProcessEvent::Stopped { .. })) => Some(Stopped),
        (Ready, Input::Ping(PingOutcome::Success { .. })) => Some(Ready),
        (Ready, Input::Ping(PingOutcome::Failure { .. })) => Some(Unreachable),
        (Unreachable, Input::Process(ProcessEvent::Stopping)) => Some(Stopping),
        (Unreachable, Input::Process(ProcessEvent::Stopped { .. })) => Some(Stopped),
        (Unreachable, Input::Ping(PingOutcome::Success { .. })) => Some(Ready),
        (Stopping, Input::Process(ProcessEvent::Stopped { .. })) => Some(Stopped),
        _ => None,
    }
}

/// A status transition, implementing [`Notification`] so the chat adapter
/// can relay it. Transient states (`Starting`/`Stopping`) are tagged
/// `Ignored` — they are real transitions (and still update the watch
/// channel) but not worth paging an operator about.
#[derive(Debug, Clone)]
pub struct StatusChanged {
    pub status: Status,
    pub last_update: Timestamp,
}

impl Notification for StatusChanged {
    fn category(&self) -> NotificationCategory {
        match self.status {
            Status::Starting | Status::Stopping => NotificationCategory::Ignored,
            _ => NotificationCategory::Status,
        }
    }

    fn message(&self) -> String {
        format!("Server {} {}", self.status, self.last_update.discord_relative())
    }
}

pub struct StatusAggregator {
    bus: Bus,
    state_tx: watch::Sender<Status>,
    commands: Mutex<mpsc::Receiver<CommandEvent>>,
}

impl StatusAggregator {
    pub fn new(bus: Bus, commands: mpsc::Receiver<CommandEvent>) -> (Self, watch::Receiver<Status>) {
        let (state_tx, state_rx) = watch::channel(Status::Stopped);
        (
            Self {
                bus,
                state_tx,
                commands: Mutex::new(commands),
            },
            state_rx,
        )
    }

    async fn apply(&self, current: Status, input: Input<'_>) -> Status {
        let Some(next) = resolve(current, input) else {
            return current;
        };
        let changed = StatusChanged {
            status: next,
            last_update: Timestamp::now(),
        };
        info!(from = %current, to = %next, "status.transition");
        self.state_tx.send_replace(next);
        self.bus.notify(changed).await;
        next
    }
}

pub fn command_definitions() -> Vec<crate::chat::CommandDefinition> {
    vec![crate::chat::CommandDefinition {
        name: STATUS_COMMAND,
        description: "show server status",
        category: PermissionCategory::Query,
    }]
}

#[async_trait]
impl Service for StatusAggregator {
    async fn run(&self, cancel: CancellationToken) -> ExitReason {
        let mut process_events = self.bus.subscribe::<ProcessEvent>();
        let mut ping_outcomes = self.bus.subscribe::<PingOutcome>();
        let mut current = *self.state_tx.borrow();
        let mut commands = self.commands.lock().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return ExitReason::Normal,
                Some(event) = process_events.recv() => {
                    current = self.apply(current, Input::Process(&event)).await;
                }
                Some(outcome) = ping_outcomes.recv() => {
                    current = self.apply(current, Input::Ping(&outcome)).await;
                }
                Some(cmd) = commands.recv() => {
                    if cmd.name == STATUS_COMMAND {
                        let reply = format!(
                            "Server {} {}",
                            current,
                            Timestamp::now().discord_relative()
                        );
                        let _ = cmd.reply.send(reply);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_ready() {
        let mut s = Status::Stopped;
        s = resolve(s, Input::Process(&ProcessEvent::Starting)).unwrap();
        assert_eq!(s, Status::Starting);
        s = resolve(s, Input::Process(&ProcessEvent::Started { pid: 1 })).unwrap();
        assert_eq!(s, Status::Started);
        s = resolve(
            s,
            Input::Ping(&PingOutcome::Success {
                latency: std::time::Duration::ZERO,
                max_players: 1,
                online_players: 0,
                player_list: None,
            }),
        )
        .unwrap();
        assert_eq!(s, Status::Ready);
    }

    #[test]
    fn ready_flaps_to_unreachable_and_back() {
        let failure = PingOutcome::Failure {
            reason: "timeout".to_string(),
        };
        let success = PingOutcome::Success {
            latency: std::time::Duration::ZERO,
            max_players: 1,
            online_players: 0,
            player_list: None,
        };
        let unreachable = resolve(Status::Ready, Input::Ping(&failure)).unwrap();
        assert_eq!(unreachable, Status::Unreachable);
        let ready_again = resolve(unreachable, Input::Ping(&success)).unwrap();
        assert_eq!(ready_again, Status::Ready);
    }

    #[test]
    fn starting_ping_failure_is_a_no_op() {
        let failure = PingOutcome::Failure {
            reason: "timeout".to_string(),
        };
        assert_eq!(resolve(Status::Starting, Input::Ping(&failure)), None);
    }

    #[test]
    fn no_lost_terminal_state() {
        let success = PingOutcome::Success {
            latency: std::time::Duration::ZERO,
            max_players: 1,
            online_players: 0,
            player_list: None,
        };
        assert_eq!(resolve(Status::Stopped, Input::Ping(&success)), None);
    }

    #[test]
    fn transient_states_are_ignored_category() {
        let starting = StatusChanged {
            status: Status::Starting,
            last_update: Timestamp::now(),
        };
        assert_eq!(starting.category(), NotificationCategory::Ignored);

        let ready = StatusChanged {
            status: Status::Ready,
            last_update: Timestamp::now(),
        };
        assert_eq!(ready.category(), NotificationCategory::Status);
    }
}
