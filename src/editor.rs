//! Privileged channel mutations.
//!
//! Every operation validates its arguments, then asks the broker, and only then touches
//! the transport. Name and topic edits additionally pass through the mutation scheduler.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chatgate_core_types::{Channel, ChannelId, MessageId, Overwrite, Permissions, PrincipalId};
use chatgate_scheduler::{
    Admission, Clock, DrainReport, DrainWorker, EditForwarder, EditPayload, ForwardError,
    MutationRequest, MutationScheduler, SchedulerEvent, ThrottleConfig, TokioClock,
    WindowSnapshot,
};
use permissions_broker::{Broker, CapabilityScope, OverwriteCheck};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{InMemoryResourceCache, ResourceCache};
use crate::errors::{GateError, GateResult};
use crate::model::{ChannelEdit, EditOutcome, PendingChannelEdit};
use crate::transport::Transport;

pub const BULK_DELETE_MIN: usize = 2;
pub const BULK_DELETE_MAX: usize = 100;

/// Forwards released hot-field edits as channel PATCH requests.
struct TransportForwarder {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn ResourceCache>,
}

#[async_trait]
impl EditForwarder for TransportForwarder {
    async fn forward(&self, request: &MutationRequest) -> Result<Value, ForwardError> {
        let channel = patch_channel(
            self.transport.as_ref(),
            self.cache.as_ref(),
            request.resource,
            request.payload.clone(),
            request.reason.as_deref(),
        )
        .await
        .map_err(|err| {
            let status = match &err {
                GateError::Transport(transport) => transport.status(),
                _ => None,
            };
            ForwardError::new(status, err.to_string())
        })?;
        serde_json::to_value(channel).map_err(|err| ForwardError::new(None, err.to_string()))
    }
}

async fn patch_channel(
    transport: &dyn Transport,
    cache: &dyn ResourceCache,
    id: ChannelId,
    payload: EditPayload,
    reason: Option<&str>,
) -> GateResult<Channel> {
    let endpoint = channel_endpoint(id);
    let raw = transport
        .patch(&endpoint, Value::Object(payload), reason)
        .await?;
    let channel: Channel = serde_json::from_value(raw)?;
    cache.upsert(channel.clone());
    Ok(channel)
}

fn channel_endpoint(id: ChannelId) -> String {
    format!("channels/{id}")
}

/// How drain ticks are driven.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DrainMode {
    /// A timer task is started whenever a deferral opens a drain cycle.
    #[default]
    Timer,
    /// No timer; the owner calls [`ChannelEditor::drain_tick`].
    Manual,
}

pub struct ChannelEditorBuilder {
    actor: PrincipalId,
    transport: Arc<dyn Transport>,
    broker: Arc<dyn Broker>,
    cache: Option<Arc<dyn ResourceCache>>,
    clock: Option<Arc<dyn Clock>>,
    throttle: ThrottleConfig,
    drain_mode: DrainMode,
}

impl ChannelEditorBuilder {
    pub fn cache(mut self, cache: Arc<dyn ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn drain_mode(mut self, mode: DrainMode) -> Self {
        self.drain_mode = mode;
        self
    }

    pub fn build(self) -> GateResult<ChannelEditor> {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryResourceCache::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock));
        let scheduler = Arc::new(MutationScheduler::new(self.throttle)?);
        let forwarder = Arc::new(TransportForwarder {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&cache),
        });
        let drain = DrainWorker::with_clock(Arc::clone(&scheduler), forwarder, Arc::clone(&clock));
        Ok(ChannelEditor {
            actor: self.actor,
            transport: self.transport,
            broker: self.broker,
            cache,
            scheduler,
            drain,
            clock,
            drain_mode: self.drain_mode,
        })
    }
}

/// Entry point for privileged channel mutations issued on behalf of one actor.
pub struct ChannelEditor {
    actor: PrincipalId,
    transport: Arc<dyn Transport>,
    broker: Arc<dyn Broker>,
    cache: Arc<dyn ResourceCache>,
    scheduler: Arc<MutationScheduler>,
    drain: DrainWorker,
    clock: Arc<dyn Clock>,
    drain_mode: DrainMode,
}

impl ChannelEditor {
    pub fn builder(
        actor: PrincipalId,
        transport: Arc<dyn Transport>,
        broker: Arc<dyn Broker>,
    ) -> ChannelEditorBuilder {
        ChannelEditorBuilder {
            actor,
            transport,
            broker,
            cache: None,
            clock: None,
            throttle: ThrottleConfig::default(),
            drain_mode: DrainMode::default(),
        }
    }

    pub fn actor(&self) -> PrincipalId {
        self.actor
    }

    pub fn cache(&self) -> &Arc<dyn ResourceCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<MutationScheduler> {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.scheduler.subscribe()
    }

    pub fn window(&self, channel: ChannelId) -> WindowSnapshot {
        self.scheduler.snapshot(channel, self.clock.now())
    }

    /// Fetches a channel and refreshes the cache with it.
    pub async fn fetch_channel(&self, id: ChannelId) -> GateResult<Channel> {
        let raw = self.transport.get(&channel_endpoint(id)).await?;
        let channel: Channel = serde_json::from_value(raw)?;
        self.cache.upsert(channel.clone());
        Ok(channel)
    }

    /// Edits a cached channel.
    ///
    /// Needs `MANAGE_CHANNELS`, plus `MANAGE_ROLES` when the edit replaces the overwrite
    /// list. Without name or topic the edit goes out immediately. Otherwise the scheduler
    /// decides: an admitted edit is sent as one request; a deferred one has its other
    /// fields sent now and its name/topic queued for a drain tick. If those fields are
    /// refused, the queued name/topic is withdrawn and the error returned.
    pub async fn edit_channel(
        &self,
        id: ChannelId,
        edit: ChannelEdit,
        reason: Option<&str>,
    ) -> GateResult<EditOutcome> {
        edit.validate()?;
        let channel = self.cached(id)?;
        let mut needs = Permissions::MANAGE_CHANNELS;
        if edit.permission_overwrites.is_some() {
            needs |= Permissions::MANAGE_ROLES;
        }
        self.authorize(&channel, needs).await?;

        if !edit.touches_hot_fields() {
            let applied = self.patch(id, edit.to_payload()?, reason).await?;
            return Ok(EditOutcome::Applied(applied));
        }

        let (hot, cold) = edit.split_hot();
        let hot_payload = match hot {
            Some(hot) => hot.to_payload()?,
            None => EditPayload::new(),
        };
        let cold_payload = match cold {
            Some(cold) => Some(cold.to_payload()?),
            None => None,
        };
        let request = MutationRequest::new(id, hot_payload, reason.map(str::to_string));

        // A split edit holds its queued half until the other fields are accepted.
        let admission = if cold_payload.is_some() {
            self.scheduler.admit_held(request, self.clock.now())
        } else {
            self.scheduler.admit(request, self.clock.now())
        };
        match admission {
            Admission::Forward(request) => {
                let mut payload = request.payload;
                if let Some(cold) = cold_payload {
                    payload.extend(cold);
                }
                let applied = self.patch(id, payload, reason).await?;
                Ok(EditOutcome::Applied(applied))
            }
            Admission::Deferred {
                handle,
                start_drain,
            } => {
                if start_drain && self.drain_mode == DrainMode::Timer {
                    self.drain.start_cycle();
                }
                info!(
                    channel = %id,
                    edit = %handle.id,
                    position = handle.position,
                    "name/topic edit deferred"
                );
                let pending = PendingChannelEdit::new(handle);
                let applied = match cold_payload {
                    Some(payload) => match self.patch(id, payload, reason).await {
                        Ok(channel) => {
                            self.scheduler.unhold(id, pending.id());
                            Some(channel)
                        }
                        Err(err) => {
                            self.scheduler.withdraw(id, pending.id());
                            warn!(
                                channel = %id,
                                edit = %pending.id(),
                                "remaining fields failed, name/topic edit withdrawn"
                            );
                            return Err(err);
                        }
                    },
                    None => None,
                };
                Ok(EditOutcome::Deferred { applied, pending })
            }
        }
    }

    /// Creates or replaces the overwrite for `overwrite.id`. Needs `MANAGE_ROLES`.
    pub async fn edit_permission_overwrite(
        &self,
        id: ChannelId,
        overwrite: Overwrite,
        reason: Option<&str>,
    ) -> GateResult<()> {
        let channel = self.cached(id)?;
        self.authorize(&channel, Permissions::MANAGE_ROLES).await?;

        let endpoint = format!("channels/{id}/permissions/{}", overwrite.id);
        let body = json!({
            "type": overwrite.kind,
            "allow": overwrite.allow,
            "deny": overwrite.deny,
        });
        self.transport.put(&endpoint, body, reason).await?;

        let mut updated = channel;
        updated
            .permission_overwrites
            .retain(|existing| existing.id != overwrite.id);
        updated.permission_overwrites.push(overwrite);
        self.cache.upsert(updated);
        Ok(())
    }

    /// Removes the overwrite for `principal`. Needs `MANAGE_ROLES`.
    pub async fn delete_permission_overwrite(
        &self,
        id: ChannelId,
        principal: PrincipalId,
        reason: Option<&str>,
    ) -> GateResult<()> {
        let channel = self.cached(id)?;
        self.authorize(&channel, Permissions::MANAGE_ROLES).await?;

        let endpoint = format!("channels/{id}/permissions/{principal}");
        self.transport.delete(&endpoint, reason).await?;

        let mut updated = channel;
        updated
            .permission_overwrites
            .retain(|existing| existing.id != principal);
        self.cache.upsert(updated);
        Ok(())
    }

    /// Deletes 2 to 100 distinct messages in one request. Needs `MANAGE_MESSAGES`.
    pub async fn bulk_delete_messages(
        &self,
        id: ChannelId,
        messages: &[MessageId],
        reason: Option<&str>,
    ) -> GateResult<()> {
        if !(BULK_DELETE_MIN..=BULK_DELETE_MAX).contains(&messages.len()) {
            return Err(GateError::validation(
                "messages",
                format!(
                    "expected {BULK_DELETE_MIN}-{BULK_DELETE_MAX} ids, got {}",
                    messages.len()
                ),
            ));
        }
        let distinct: HashSet<_> = messages.iter().collect();
        if distinct.len() != messages.len() {
            return Err(GateError::validation("messages", "duplicate message ids"));
        }
        let channel = self.cached(id)?;
        self.authorize(&channel, Permissions::MANAGE_MESSAGES).await?;

        let endpoint = format!("channels/{id}/messages/bulk-delete");
        self.transport
            .post(&endpoint, json!({ "messages": messages }), reason)
            .await?;
        Ok(())
    }

    /// Runs one drain pass now. Used with [`DrainMode::Manual`]; harmless otherwise.
    pub async fn drain_tick(&self) -> DrainReport {
        self.drain.drain_now().await
    }

    /// Stops the drain timer. Queued edits are not forwarded afterwards.
    pub async fn shutdown(&self) {
        self.drain.shutdown().await;
    }

    fn cached(&self, id: ChannelId) -> GateResult<Channel> {
        self.cache.channel(id).ok_or(GateError::UnknownChannel(id))
    }

    async fn authorize(&self, channel: &Channel, needs: Permissions) -> GateResult<()> {
        let (Some(guild), Some(root)) = (channel.guild_id, channel.root_principal()) else {
            return Err(GateError::validation(
                "channel",
                format!("{} is not part of a guild", channel.id),
            ));
        };
        let scope = CapabilityScope::Channel {
            guild,
            channel: channel.id,
        };
        let check = OverwriteCheck {
            root,
            overwrites: &channel.permission_overwrites,
        };
        self.broker
            .require(self.actor, scope, needs, Some(check))
            .await?;
        debug!(channel = %channel.id, needs = %needs, "authorized");
        Ok(())
    }

    async fn patch(
        &self,
        id: ChannelId,
        payload: EditPayload,
        reason: Option<&str>,
    ) -> GateResult<Channel> {
        patch_channel(
            self.transport.as_ref(),
            self.cache.as_ref(),
            id,
            payload,
            reason,
        )
        .await
    }
}
