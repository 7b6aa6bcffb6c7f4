use serde::{Deserialize, Serialize};

use crate::{ChannelId, GuildId, Permissions, PrincipalId};

/// Whether an overwrite targets a role or a single member.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OverwriteKind {
    Role,
    Member,
}

impl From<OverwriteKind> for u8 {
    fn from(value: OverwriteKind) -> Self {
        match value {
            OverwriteKind::Role => 0,
            OverwriteKind::Member => 1,
        }
    }
}

impl TryFrom<u8> for OverwriteKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OverwriteKind::Role),
            1 => Ok(OverwriteKind::Member),
            other => Err(format!("unknown overwrite type {other}")),
        }
    }
}

/// Per-principal allow/deny pair attached to a channel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Overwrite {
    pub id: PrincipalId,
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    #[serde(default)]
    pub allow: Permissions,
    #[serde(default)]
    pub deny: Permissions,
}

impl Overwrite {
    pub fn role(id: impl Into<PrincipalId>, allow: Permissions, deny: Permissions) -> Self {
        Self {
            id: id.into(),
            kind: OverwriteKind::Role,
            allow,
            deny,
        }
    }

    pub fn member(id: impl Into<PrincipalId>, allow: Permissions, deny: Permissions) -> Self {
        Self {
            id: id.into(),
            kind: OverwriteKind::Member,
            allow,
            deny,
        }
    }
}

/// Cached view of a channel-like resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub rate_limit_per_user: Option<u32>,
    #[serde(default)]
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub user_limit: Option<u32>,
    #[serde(default)]
    pub parent_id: Option<ChannelId>,
    #[serde(default)]
    pub permission_overwrites: Vec<Overwrite>,
}

impl Channel {
    /// Bare guild text channel, mostly useful for seeding caches.
    pub fn text(id: ChannelId, guild_id: GuildId, name: impl Into<String>) -> Self {
        Self {
            id,
            kind: 0,
            guild_id: Some(guild_id),
            name: Some(name.into()),
            topic: None,
            position: None,
            nsfw: false,
            rate_limit_per_user: None,
            bitrate: None,
            user_limit: None,
            parent_id: None,
            permission_overwrites: Vec::new(),
        }
    }

    /// Principal whose overwrite acts as the channel's default entry.
    pub fn root_principal(&self) -> Option<PrincipalId> {
        self.guild_id.map(PrincipalId::from)
    }
}
