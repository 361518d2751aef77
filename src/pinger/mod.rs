//! Periodically probes the child server: a ticker loop that chooses a probe
//! strategy from the child's own `server.properties`, publishes the
//! outcome, and answers the `online` command from the last result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chat::{CommandEvent, PermissionCategory};
use crate::events::Bus;
use crate::properties::Properties;
use crate::status::Status;
use crate::supervisor::{ExitReason, Service};

mod strategy;
pub use strategy::{PingBackend, ProbeResponse, TcpProbeBackend};

pub const ONLINE_COMMAND: &str = "online";

#[derive(Debug, Clone)]
pub enum PingStrategy {
    FullQuery { port: u16 },
    Status,
    Disabled,
}

impl PingStrategy {
    /// Chooses a strategy from the child's own `server.properties`, filling
    /// in `host`/`port` defaults when the config left them unset (empty
    /// host / port 0).
    pub fn resolve(properties: &Properties, host: &mut String, port: &mut u16) -> Self {
        if host.is_empty() {
            *host = properties.string("server-ip", "localhost");
        }
        if *port == 0 {
            *port = properties.u16("server-port", 25565);
        }

        if properties.bool("enable-query", false) {
            Self::FullQuery {
                port: properties.u16("query.port", *port),
            }
        } else if properties.bool("enable-status", false) {
            Self::Status
        } else {
            Self::Disabled
        }
    }
}

/// Result of a probe, published on the bus and replied to `online` queries.
#[derive(Debug, Clone)]
pub enum PingOutcome {
    Success {
        latency: Duration,
        max_players: u32,
        online_players: u32,
        player_list: Option<Vec<String>>,
    },
    Failure {
        reason: String,
    },
    Disabled,
}

impl PingOutcome {
    fn report(&self) -> String {
        match self {
            PingOutcome::Success {
                max_players,
                online_players,
                player_list,
                ..
            } => {
                let now = crate::events::Timestamp::now();
                let mut out = format!(
                    "Online players: {online_players}/{max_players} ({})",
                    now.discord_relative()
                );
                if let Some(players) = player_list {
                    for name in players {
                        out.push_str(&format!("\n- {name}"));
                    }
                }
                out
            }
            PingOutcome::Failure { .. } => "**last ping failed**".to_string(),
            PingOutcome::Disabled => {
                "**both status and query are disabled in server configuration**".to_string()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PingerConfig {
    pub host: String,
    pub port: u16,
    pub period: Duration,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

/// Probes `strategy` on a fixed period, publishing outcomes and answering
/// the `online` command. Constructed with an already-resolved strategy (see
/// [`PingStrategy::resolve`], run by the composition root against the
/// child's `server.properties` before the pinger is added to the
/// supervisor).
pub struct Pinger {
    config: PingerConfig,
    strategy: PingStrategy,
    backend: Arc<dyn PingBackend>,
    bus: Bus,
    status_rx: watch::Receiver<Status>,
    last: Mutex<Option<PingOutcome>>,
    commands: Mutex<mpsc::Receiver<CommandEvent>>,
}

impl Pinger {
    pub fn new(
        config: PingerConfig,
        strategy: PingStrategy,
        backend: Arc<dyn PingBackend>,
        bus: Bus,
        status_rx: watch::Receiver<Status>,
        commands: mpsc::Receiver<CommandEvent>,
    ) -> Self {
        Self {
            config,
            strategy,
            backend,
            bus,
            status_rx,
            last: Mutex::new(None),
            commands: Mutex::new(commands),
        }
    }

    async fn probe_once(&self) -> PingOutcome {
        let (port, full) = match self.strategy {
            PingStrategy::Disabled => return PingOutcome::Disabled,
            PingStrategy::Status => (self.config.port, false),
            PingStrategy::FullQuery { port } => (port, true),
        };

        match self
            .backend
            .probe(
                &self.config.host,
                port,
                self.config.connect_timeout,
                self.config.response_timeout,
                full,
            )
            .await
        {
            Ok(r) => PingOutcome::Success {
                latency: r.latency,
                max_players: r.max_players,
                online_players: r.online_players,
                player_list: r.player_list,
            },
            Err(e) => PingOutcome::Failure {
                reason: e.to_string(),
            },
        }
    }
}

/// Command definitions this service owns, for the composition root to feed
/// into the [`crate::chat::CommandRegistry`].
pub fn command_definitions() -> Vec<crate::chat::CommandDefinition> {
    vec![crate::chat::CommandDefinition {
        name: ONLINE_COMMAND,
        description: "list online players",
        category: PermissionCategory::Query,
    }]
}

#[async_trait]
impl Service for Pinger {
    async fn run(&self, cancel: CancellationToken) -> ExitReason {
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut commands = self.commands.lock().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return ExitReason::Normal,
                Some(cmd) = commands.recv() => {
                    if cmd.name == ONLINE_COMMAND {
                        let report = self.last.lock().await.as_ref().map(PingOutcome::report)
                            .unwrap_or_else(|| "**no ping has been performed yet**".to_string());
                        let _ = cmd.reply.send(report);
                    }
                }
                _ = ticker.tick() => {
                    if !matches!(*self.status_rx.borrow(), Status::Started | Status::Ready | Status::Unreachable) {
                        continue;
                    }
                    let outcome = self.probe_once().await;
                    debug!(?outcome, "pinger.update");
                    self.bus.dispatch(outcome.clone()).await;
                    *self.last.lock().await = Some(outcome);
                }
            }
        }
    }
}
