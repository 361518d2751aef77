//! Command permission model — principals are opaque snowflake-shaped
//! strings here since no real chat binding is implemented.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Actor;

/// A command's required privilege level. `Public` always passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionCategory {
    Public,
    Query,
    Control,
    Admin,
}

impl std::fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PermissionCategory::Public => "public",
            PermissionCategory::Query => "query",
            PermissionCategory::Control => "control",
            PermissionCategory::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

/// One principal allowed for a category: a user id, a role id, or a channel
/// id. At least one must match for the rule to accept an actor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PermissionConfig {
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "roleId", skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    #[serde(rename = "channelId", skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

impl PermissionConfig {
    /// An opaque snowflake that may be a user id, a role id, or a channel
    /// id (the config doesn't distinguish which) — matches an [`Actor`]
    /// against all three, since `discord.permissions.<category>` is just a
    /// flat list of allowed `{userId|roleId|channelId}` snowflakes.
    pub fn opaque(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            user_id: Some(id.clone()),
            role_id: Some(id.clone()),
            channel_id: Some(id),
        }
    }

    fn accept(&self, actor: &Actor) -> bool {
        self.user_id.as_deref().is_some_and(|id| actor.user_id.as_deref() == Some(id))
            || self
                .role_id
                .as_deref()
                .is_some_and(|id| actor.role_ids.iter().any(|r| r == id))
            || self
                .channel_id
                .as_deref()
                .is_some_and(|id| actor.channel_id.as_deref() == Some(id))
    }
}

pub type PermissionList = Vec<PermissionConfig>;
pub type PermissionMap = HashMap<PermissionCategory, PermissionList>;

/// An unspecified category, or one configured with an empty list, allows
/// anyone.
pub fn allow(map: &PermissionMap, category: PermissionCategory, actor: &Actor) -> bool {
    if category == PermissionCategory::Public {
        return true;
    }
    match map.get(&category) {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => list.iter().any(|p| p.accept(actor)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(user_id: &str) -> Actor {
        Actor {
            user_id: Some(user_id.to_string()),
            role_ids: vec![],
            channel_id: None,
            display_name: user_id.to_string(),
        }
    }

    #[test]
    fn unconfigured_category_allows_anyone() {
        let map = PermissionMap::new();
        assert!(allow(&map, PermissionCategory::Admin, &actor("123")));
    }

    #[test]
    fn configured_category_requires_match() {
        let mut map = PermissionMap::new();
        map.insert(
            PermissionCategory::Admin,
            vec![PermissionConfig {
                user_id: Some("123".to_string()),
                ..Default::default()
            }],
        );
        assert!(allow(&map, PermissionCategory::Admin, &actor("123")));
        assert!(!allow(&map, PermissionCategory::Admin, &actor("456")));
    }

    #[test]
    fn public_always_allowed() {
        let mut map = PermissionMap::new();
        map.insert(PermissionCategory::Public, vec![]);
        assert!(allow(&map, PermissionCategory::Public, &actor("anyone")));
    }
}
