//! Command dispatch table, adapted from `pkg/commands/registry.go`'s
//! `Definitions` map — but instantiated once by the composition root
//! instead of populated through package-level `init()` registration (see
//! the "Global registries" design note: no `lazy_static`/`OnceCell`
//! process-wide map).

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::permissions::{self, PermissionCategory, PermissionMap};
use super::{Actor, CommandEvent};

/// Reply deadline for a dispatched command (§5 "A console command reply is
/// bounded by a 5 s deadline").
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub category: PermissionCategory,
}

struct Entry {
    definition: CommandDefinition,
    sender: mpsc::Sender<CommandEvent>,
}

/// Maps a command name to the service that owns it and the permission
/// category required to invoke it.
#[derive(Default)]
pub struct CommandRegistry {
    entries: BTreeMap<&'static str, Entry>,
    permissions: PermissionMap,
}

impl CommandRegistry {
    pub fn new(permissions: PermissionMap) -> Self {
        Self {
            entries: BTreeMap::new(),
            permissions,
        }
    }

    pub fn register(&mut self, definition: CommandDefinition, sender: mpsc::Sender<CommandEvent>) {
        self.entries.insert(definition.name, Entry { definition, sender });
    }

    pub fn definitions(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.entries.values().map(|e| &e.definition)
    }

    /// Commands visible to `actor` given its permissions, for the `help`
    /// reply.
    pub fn allowed_for(&self, actor: &Actor) -> Vec<&CommandDefinition> {
        self.entries
            .values()
            .filter(|e| permissions::allow(&self.permissions, e.definition.category, actor))
            .map(|e| &e.definition)
            .collect()
    }

    pub fn permission_for(&self, name: &str) -> Option<PermissionCategory> {
        self.entries.get(name).map(|e| e.definition.category)
    }

    /// Evaluate a permission rule directly, for commands the chat adapter
    /// handles itself (`help`/`perms`) instead of routing through an owning
    /// service.
    pub fn allows(&self, category: PermissionCategory, actor: &Actor) -> bool {
        permissions::allow(&self.permissions, category, actor)
    }

    /// Route a command to its owning service and await the reply, enforcing
    /// the permission check and the reply deadline. Never returns an error:
    /// unknown commands, denied permissions, and timeouts are all encoded
    /// as the reply text.
    pub async fn dispatch(&self, name: &str, args: Vec<String>, actor: Actor) -> String {
        let Some(entry) = self.entries.get(name) else {
            debug!(command = name, "chat.command.unknown");
            return format!("unknown command: {name}");
        };

        if !permissions::allow(&self.permissions, entry.definition.category, &actor) {
            debug!(command = name, actor = %actor.display_name, "chat.command.denied");
            return "permission denied".to_string();
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let event = CommandEvent {
            name: name.to_string(),
            args,
            actor,
            reply: reply_tx,
        };

        if entry.sender.send(event).await.is_err() {
            debug!(command = name, "chat.command.owner_gone");
            return "command handler is not available".to_string();
        }

        match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => "command handler dropped the reply".to_string(),
            Err(_) => "timed out".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> Actor {
        Actor {
            user_id: Some("1".to_string()),
            role_ids: vec![],
            channel_id: None,
            display_name: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_command_replies_without_dispatch() {
        let registry = CommandRegistry::new(PermissionMap::new());
        let reply = registry.dispatch("nope", vec![], actor()).await;
        assert_eq!(reply, "unknown command: nope");
    }

    #[tokio::test]
    async fn registered_command_replies_from_owner() {
        let mut registry = CommandRegistry::new(PermissionMap::new());
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(
            CommandDefinition {
                name: "status",
                description: "show status",
                category: PermissionCategory::Query,
            },
            tx,
        );

        let owner = tokio::spawn(async move {
            let event = rx.recv().await.unwrap();
            let _ = event.reply.send("Server Ready".to_string());
        });

        let reply = registry.dispatch("status", vec![], actor()).await;
        assert_eq!(reply, "Server Ready");
        owner.await.unwrap();
    }

    #[tokio::test]
    async fn denied_permission_short_circuits() {
        let mut permissions = PermissionMap::new();
        permissions.insert(
            PermissionCategory::Admin,
            vec![permissions::PermissionConfig {
                user_id: Some("999".to_string()),
                ..Default::default()
            }],
        );
        let mut registry = CommandRegistry::new(permissions);
        let (tx, _rx) = mpsc::channel(1);
        registry.register(
            CommandDefinition {
                name: "shutdown",
                description: "stop the daemon",
                category: PermissionCategory::Admin,
            },
            tx,
        );

        let reply = registry.dispatch("shutdown", vec![], actor()).await;
        assert_eq!(reply, "permission denied");
    }
}
