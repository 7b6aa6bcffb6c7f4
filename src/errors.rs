//! Error taxonomy of the access layer.

use chatgate_core_types::{ChannelId, Permissions};
use chatgate_scheduler::SchedulerError;
use permissions_broker::BrokerError;
use thiserror::Error;

use crate::transport::TransportError;

pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    /// Raised before any request is sent; never retried.
    #[error("missing permissions: {missing}")]
    Authorization { missing: Permissions },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("capability lookup failed: {0}")]
    Lookup(String),

    #[error("channel {0} is not cached")]
    UnknownChannel(ChannelId),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl GateError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        GateError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Authorization and validation failures; retrying them never helps.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            GateError::Authorization { .. } | GateError::Validation { .. }
        )
    }
}

impl From<BrokerError> for GateError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::MissingPermissions { missing } => GateError::Authorization { missing },
            BrokerError::Lookup(message) | BrokerError::Internal(message) => {
                GateError::Lookup(message)
            }
        }
    }
}
