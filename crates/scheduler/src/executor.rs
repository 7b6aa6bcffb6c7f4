use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::MutationRequest;

/// Failure reported by a forwarder, kept cloneable so it can be both published and handed
/// to the waiting caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ForwardError {
    pub status: Option<u16>,
    pub message: String,
}

impl ForwardError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Sends an admitted edit to the remote API.
#[async_trait]
pub trait EditForwarder: Send + Sync {
    async fn forward(&self, request: &MutationRequest) -> Result<Value, ForwardError>;
}

/// Forwarder that acknowledges every edit with its own payload.
#[derive(Clone, Copy, Default, Debug)]
pub struct EchoForwarder;

#[async_trait]
impl EditForwarder for EchoForwarder {
    async fn forward(&self, request: &MutationRequest) -> Result<Value, ForwardError> {
        Ok(Value::Object(request.payload.clone()))
    }
}
