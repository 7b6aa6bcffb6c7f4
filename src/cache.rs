use chatgate_core_types::{Channel, ChannelId};
use dashmap::DashMap;

/// Read-through view of resources the client has already seen.
pub trait ResourceCache: Send + Sync {
    fn channel(&self, id: ChannelId) -> Option<Channel>;
    fn upsert(&self, channel: Channel);
    fn remove(&self, id: ChannelId) -> Option<Channel>;
}

#[derive(Default)]
pub struct InMemoryResourceCache {
    channels: DashMap<ChannelId, Channel>,
}

impl InMemoryResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl ResourceCache for InMemoryResourceCache {
    fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).map(|entry| entry.value().clone())
    }

    fn upsert(&self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    fn remove(&self, id: ChannelId) -> Option<Channel> {
        self.channels.remove(&id).map(|(_, channel)| channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_core_types::GuildId;

    #[test]
    fn upsert_replaces_entry() {
        let cache = InMemoryResourceCache::new();
        cache.upsert(Channel::text(ChannelId(1), GuildId(9), "general"));
        cache.upsert(Channel::text(ChannelId(1), GuildId(9), "lobby"));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.channel(ChannelId(1)).unwrap().name.as_deref(),
            Some("lobby")
        );
        assert!(cache.remove(ChannelId(1)).is_some());
        assert!(cache.is_empty());
    }
}
