use async_trait::async_trait;
use chatgate_core_types::{ChannelId, GuildId, Permissions, PrincipalId};
use dashmap::DashMap;

use crate::BrokerError;

/// Context a coarse permission is evaluated in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CapabilityScope {
    Guild(GuildId),
    Channel { guild: GuildId, channel: ChannelId },
}

impl CapabilityScope {
    pub fn guild(&self) -> GuildId {
        match self {
            CapabilityScope::Guild(guild) => *guild,
            CapabilityScope::Channel { guild, .. } => *guild,
        }
    }
}

/// Source of the acting principal's role-derived permission bits.
#[async_trait]
pub trait CapabilityLookup: Send + Sync {
    async fn permissions_for(
        &self,
        actor: PrincipalId,
        scope: CapabilityScope,
    ) -> Result<Permissions, BrokerError>;
}

/// Capability table held in memory. Channel grants replace the guild grant for that
/// channel; an actor with no entry holds nothing.
#[derive(Default)]
pub struct InMemoryCapabilities {
    guild: DashMap<(PrincipalId, GuildId), Permissions>,
    channel: DashMap<(PrincipalId, ChannelId), Permissions>,
}

impl InMemoryCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_guild(&self, actor: PrincipalId, guild: GuildId, permissions: Permissions) {
        self.guild
            .entry((actor, guild))
            .and_modify(|existing| *existing |= permissions)
            .or_insert(permissions);
    }

    pub fn grant_channel(&self, actor: PrincipalId, channel: ChannelId, permissions: Permissions) {
        self.channel
            .entry((actor, channel))
            .and_modify(|existing| *existing |= permissions)
            .or_insert(permissions);
    }

    pub fn revoke_all(&self, actor: PrincipalId) {
        self.guild.retain(|(principal, _), _| *principal != actor);
        self.channel.retain(|(principal, _), _| *principal != actor);
    }
}

#[async_trait]
impl CapabilityLookup for InMemoryCapabilities {
    async fn permissions_for(
        &self,
        actor: PrincipalId,
        scope: CapabilityScope,
    ) -> Result<Permissions, BrokerError> {
        if let CapabilityScope::Channel { channel, .. } = scope {
            if let Some(entry) = self.channel.get(&(actor, channel)) {
                return Ok(*entry.value());
            }
        }
        Ok(self
            .guild
            .get(&(actor, scope.guild()))
            .map(|entry| *entry.value())
            .unwrap_or_else(Permissions::empty))
    }
}
