//! Narrow boundary to an external chat room. No real Discord/IRC binding is
//! implemented here — [`ChatTransport`] is the seam a real binding would
//! plug into, reduced to the minimum surface this daemon needs: receive a
//! command, send a notification.

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::{Bus, NotificationCategory};
use crate::supervisor::{ExitReason, Service};

pub mod permissions;
pub mod registry;

pub use permissions::PermissionCategory;
pub use registry::{CommandDefinition, CommandRegistry};

pub const HELP_COMMAND: &str = "help";
pub const PERMS_COMMAND: &str = "perms";

/// Who issued a command: enough identity to evaluate [`permissions::allow`].
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Option<String>,
    pub role_ids: Vec<String>,
    pub channel_id: Option<String>,
    pub display_name: String,
}

/// A parsed chat-room command, routed to its owning service and answered
/// through a one-shot reply.
#[derive(Debug)]
pub struct CommandEvent {
    pub name: String,
    pub args: Vec<String>,
    pub actor: Actor,
    pub reply: oneshot::Sender<String>,
}

/// What a binding must provide: a stream of incoming commands and an
/// outgoing notification sink. `recv_command` returning `None` means the
/// transport has closed (e.g. the chat connection dropped) and the adapter
/// should exit.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn recv_command(&mut self) -> Option<(String, Vec<String>, Actor)>;
    async fn send_notification(&self, message: String);
}

/// Bridges a [`ChatTransport`] to the [`CommandRegistry`] and the event
/// bus's notification channel.
pub struct ChatAdapter<T: ChatTransport> {
    transport: Mutex<T>,
    registry: std::sync::Arc<CommandRegistry>,
    bus: Bus,
}

impl<T: ChatTransport> ChatAdapter<T> {
    pub fn new(transport: T, registry: std::sync::Arc<CommandRegistry>, bus: Bus) -> Self {
        Self {
            transport: Mutex::new(transport),
            registry,
            bus,
        }
    }

    /// `help`/`perms` are answered from the registry directly rather than
    /// routed to an owning service — there's no single service that "owns"
    /// introspecting every other service's registration.
    async fn handle(&self, name: &str, args: Vec<String>, actor: Actor) -> String {
        match name {
            HELP_COMMAND => {
                let allowed = self.registry.allowed_for(&actor);
                if allowed.is_empty() {
                    "no commands available".to_string()
                } else {
                    allowed
                        .iter()
                        .map(|d| format!("{} - {}", d.name, d.description))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            PERMS_COMMAND => {
                if !self.registry.allows(PermissionCategory::Admin, &actor) {
                    return "permission denied".to_string();
                }
                self.registry
                    .definitions()
                    .map(|d| format!("{} [{}]", d.name, d.category))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            _ => self.registry.dispatch(name, args, actor).await,
        }
    }
}

#[async_trait]
impl<T: ChatTransport + Send + 'static> Service for ChatAdapter<T> {
    async fn run(&self, cancel: CancellationToken) -> ExitReason {
        let mut notifications = self.bus.subscribe_notifications();

        loop {
            let mut transport = self.transport.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return ExitReason::Normal,
                notif = notifications.recv() => {
                    let Some(notif) = notif else { return ExitReason::Other(anyhow::anyhow!("notification channel closed")) };
                    if !matches!(notif.category(), NotificationCategory::Ignored) {
                        transport.send_notification(notif.message()).await;
                    }
                }
                cmd = transport.recv_command() => {
                    match cmd {
                        Some((name, args, actor)) => {
                            let reply = self.handle(&name, args, actor).await;
                            transport.send_notification(reply).await;
                        }
                        None => {
                            warn!("chat.transport.closed");
                            return ExitReason::Other(anyhow::anyhow!("chat transport closed"));
                        }
                    }
                }
            }
        }
    }
}
