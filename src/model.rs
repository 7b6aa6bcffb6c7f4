use chatgate_core_types::{Channel, ChannelId, Overwrite};
use chatgate_scheduler::{DeferredEdit, EditId, EditPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{GateError, GateResult};

pub const NAME_MAX_CHARS: usize = 100;
pub const TOPIC_MAX_CHARS: usize = 1024;
pub const SLOWMODE_MAX_SECS: u32 = 21_600;
pub const BITRATE_MIN: u32 = 8_000;
pub const USER_LIMIT_MAX: u32 = 99;

/// Partial channel update. Unset fields are left out of the request body.
///
/// `name` and `topic` are hot fields: the platform limits how often they change and the
/// editor routes them through the mutation scheduler. Everything else goes out directly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_user: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_overwrites: Option<Vec<Overwrite>>,
}

impl ChannelEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn position(mut self, position: i32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn nsfw(mut self, nsfw: bool) -> Self {
        self.nsfw = Some(nsfw);
        self
    }

    pub fn rate_limit_per_user(mut self, seconds: u32) -> Self {
        self.rate_limit_per_user = Some(seconds);
        self
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn user_limit(mut self, limit: u32) -> Self {
        self.user_limit = Some(limit);
        self
    }

    pub fn parent_id(mut self, parent: ChannelId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn permission_overwrites(mut self, overwrites: Vec<Overwrite>) -> Self {
        self.permission_overwrites = Some(overwrites);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_hot_fields(&self) -> bool {
        self.name.is_some() || self.topic.is_some()
    }

    /// Splits into the hot part (name, topic) and the rest. Either side is `None` when it
    /// would be empty.
    pub fn split_hot(self) -> (Option<ChannelEdit>, Option<ChannelEdit>) {
        let hot = ChannelEdit {
            name: self.name,
            topic: self.topic,
            ..ChannelEdit::default()
        };
        let cold = ChannelEdit {
            name: None,
            topic: None,
            ..self
        };
        let keep = |edit: ChannelEdit| (!edit.is_empty()).then_some(edit);
        (keep(hot), keep(cold))
    }

    pub fn validate(&self) -> GateResult<()> {
        if self.is_empty() {
            return Err(GateError::validation("edit", "no fields set"));
        }
        if let Some(name) = &self.name {
            let chars = name.chars().count();
            if chars == 0 || chars > NAME_MAX_CHARS {
                return Err(GateError::validation(
                    "name",
                    format!("must be 1-{NAME_MAX_CHARS} characters, got {chars}"),
                ));
            }
        }
        if let Some(topic) = &self.topic {
            let chars = topic.chars().count();
            if chars > TOPIC_MAX_CHARS {
                return Err(GateError::validation(
                    "topic",
                    format!("must be at most {TOPIC_MAX_CHARS} characters, got {chars}"),
                ));
            }
        }
        if let Some(seconds) = self.rate_limit_per_user {
            if seconds > SLOWMODE_MAX_SECS {
                return Err(GateError::validation(
                    "rate_limit_per_user",
                    format!("must be at most {SLOWMODE_MAX_SECS}, got {seconds}"),
                ));
            }
        }
        if let Some(bitrate) = self.bitrate {
            if bitrate < BITRATE_MIN {
                return Err(GateError::validation(
                    "bitrate",
                    format!("must be at least {BITRATE_MIN}, got {bitrate}"),
                ));
            }
        }
        if let Some(limit) = self.user_limit {
            if limit > USER_LIMIT_MAX {
                return Err(GateError::validation(
                    "user_limit",
                    format!("must be at most {USER_LIMIT_MAX}, got {limit}"),
                ));
            }
        }
        Ok(())
    }

    pub fn to_payload(&self) -> GateResult<EditPayload> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(GateError::validation(
                "edit",
                format!("expected an object body, got {other}"),
            )),
        }
    }
}

/// Result of [`crate::ChannelEditor::edit_channel`].
#[derive(Debug)]
pub enum EditOutcome {
    /// Everything was forwarded; the channel as returned by the platform.
    Applied(Channel),
    /// The hot part was deferred. `applied` holds the result of forwarding the other fields,
    /// when there were any.
    Deferred {
        applied: Option<Channel>,
        pending: PendingChannelEdit,
    },
}

impl EditOutcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, EditOutcome::Deferred { .. })
    }

    /// Channel state known right now, if any request went out.
    pub fn channel(&self) -> Option<&Channel> {
        match self {
            EditOutcome::Applied(channel) => Some(channel),
            EditOutcome::Deferred { applied, .. } => applied.as_ref(),
        }
    }
}

/// Hot-field edit waiting for a drain tick.
#[derive(Debug)]
pub struct PendingChannelEdit {
    inner: DeferredEdit,
}

impl PendingChannelEdit {
    pub(crate) fn new(inner: DeferredEdit) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> EditId {
        self.inner.id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.inner.resource
    }

    /// Edits queued ahead of this one when it was deferred.
    pub fn position(&self) -> usize {
        self.inner.position
    }

    /// Resolves once a drain tick forwarded the edit.
    pub async fn wait(self) -> GateResult<Channel> {
        let value = self.inner.wait().await?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn try_result(&mut self) -> Option<GateResult<Channel>> {
        self.inner.try_result().map(|outcome| {
            let value = outcome?;
            Ok(serde_json::from_value(value)?)
        })
    }
}
