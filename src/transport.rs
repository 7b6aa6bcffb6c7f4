//! REST transport seam.
//!
//! The real HTTP client (retries, bucket rate limits, JSON decoding) lives outside this
//! crate; everything here talks to it through [`Transport`]. [`LoopbackTransport`] is an
//! in-memory stand-in that applies channel mutations to its own store.

use std::fmt;

use async_trait::async_trait;
use chatgate_core_types::{Channel, ChannelId, Overwrite, PrincipalId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("{method} {endpoint} returned {status}: {body}")]
    Status {
        method: Method,
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("request failed: {0}")]
    Network(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Network(_) => None,
        }
    }
}

/// Generic request surface of the platform API. `reason` ends up in the audit log header.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        reason: Option<&str>,
    ) -> Result<Value, TransportError>;

    async fn get(&self, endpoint: &str) -> Result<Value, TransportError> {
        self.request(Method::Get, endpoint, None, None).await
    }

    async fn post(
        &self,
        endpoint: &str,
        body: Value,
        reason: Option<&str>,
    ) -> Result<Value, TransportError> {
        self.request(Method::Post, endpoint, Some(body), reason).await
    }

    async fn patch(
        &self,
        endpoint: &str,
        body: Value,
        reason: Option<&str>,
    ) -> Result<Value, TransportError> {
        self.request(Method::Patch, endpoint, Some(body), reason).await
    }

    async fn put(
        &self,
        endpoint: &str,
        body: Value,
        reason: Option<&str>,
    ) -> Result<Value, TransportError> {
        self.request(Method::Put, endpoint, Some(body), reason).await
    }

    async fn delete(&self, endpoint: &str, reason: Option<&str>) -> Result<Value, TransportError> {
        self.request(Method::Delete, endpoint, None, reason).await
    }
}

/// Request as seen by [`LoopbackTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<Value>,
    pub reason: Option<String>,
}

/// In-memory transport keyed by channel id.
///
/// Understands `channels/{id}` (GET, PATCH), `channels/{id}/permissions/{principal}` (PUT,
/// DELETE) and `channels/{id}/messages/bulk-delete` (POST). Anything else is a 404.
#[derive(Default)]
pub struct LoopbackTransport {
    channels: DashMap<ChannelId, Channel>,
    log: Mutex<Vec<RecordedRequest>>,
    failures: Mutex<Vec<u16>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).map(|entry| entry.value().clone())
    }

    /// Makes the next request fail with `status`.
    pub fn fail_next(&self, status: u16) {
        self.failures.lock().push(status);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    fn route(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let not_found = || TransportError::Status {
            method,
            endpoint: endpoint.to_string(),
            status: 404,
            body: json!({"message": "Unknown Channel", "code": 10003}).to_string(),
        };
        let segments: Vec<&str> = endpoint.trim_matches('/').split('/').collect();
        let channel_id = match segments.as_slice() {
            ["channels", id, ..] => id.parse::<ChannelId>().map_err(|_| not_found())?,
            _ => return Err(not_found()),
        };
        let mut entry = self.channels.get_mut(&channel_id).ok_or_else(not_found)?;

        match (method, &segments[2..]) {
            (Method::Get, []) => encode(entry.value()),
            (Method::Patch, []) => {
                let mut current = serde_json::to_value(entry.value())
                    .map_err(|err| TransportError::Network(err.to_string()))?;
                if let (Some(target), Some(Value::Object(changes))) =
                    (current.as_object_mut(), body)
                {
                    for (key, value) in changes {
                        target.insert(key.clone(), value.clone());
                    }
                }
                let updated: Channel = serde_json::from_value(current).map_err(|err| {
                    TransportError::Status {
                        method,
                        endpoint: endpoint.to_string(),
                        status: 400,
                        body: err.to_string(),
                    }
                })?;
                *entry.value_mut() = updated;
                encode(entry.value())
            }
            (Method::Put, ["permissions", principal]) => {
                let principal = principal
                    .parse::<PrincipalId>()
                    .map_err(|_| not_found())?;
                let mut fields = body.cloned().unwrap_or_else(|| json!({}));
                if let Some(object) = fields.as_object_mut() {
                    object.insert("id".into(), json!(principal.to_string()));
                }
                let overwrite: Overwrite =
                    serde_json::from_value(fields).map_err(|err| TransportError::Status {
                        method,
                        endpoint: endpoint.to_string(),
                        status: 400,
                        body: err.to_string(),
                    })?;
                let overwrites = &mut entry.value_mut().permission_overwrites;
                overwrites.retain(|existing| existing.id != principal);
                overwrites.push(overwrite);
                Ok(Value::Null)
            }
            (Method::Delete, ["permissions", principal]) => {
                let principal = principal
                    .parse::<PrincipalId>()
                    .map_err(|_| not_found())?;
                entry
                    .value_mut()
                    .permission_overwrites
                    .retain(|existing| existing.id != principal);
                Ok(Value::Null)
            }
            (Method::Post, ["messages", "bulk-delete"]) => Ok(Value::Null),
            _ => Err(not_found()),
        }
    }
}

fn encode(channel: &Channel) -> Result<Value, TransportError> {
    serde_json::to_value(channel).map_err(|err| TransportError::Network(err.to_string()))
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        reason: Option<&str>,
    ) -> Result<Value, TransportError> {
        self.log.lock().push(RecordedRequest {
            method,
            endpoint: endpoint.to_string(),
            body: body.clone(),
            reason: reason.map(str::to_string),
        });
        debug!(%method, endpoint, "loopback request");

        let injected = {
            let mut failures = self.failures.lock();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        if let Some(status) = injected {
            return Err(TransportError::Status {
                method,
                endpoint: endpoint.to_string(),
                status,
                body: json!({"message": "injected failure"}).to_string(),
            });
        }

        self.route(method, endpoint, body.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_core_types::{GuildId, Permissions};

    fn transport() -> LoopbackTransport {
        let transport = LoopbackTransport::new();
        transport.seed(Channel::text(ChannelId(10), GuildId(1), "general"));
        transport
    }

    #[tokio::test]
    async fn patch_merges_fields() {
        let transport = transport();
        let value = transport
            .patch("channels/10", json!({"topic": "release day"}), Some("tidy up"))
            .await
            .unwrap();
        assert_eq!(value["topic"], "release day");
        assert_eq!(value["name"], "general");
        let recorded = transport.requests();
        assert_eq!(recorded[0].reason.as_deref(), Some("tidy up"));
    }

    #[tokio::test]
    async fn unknown_channel_is_404() {
        let transport = transport();
        let err = transport.get("channels/99").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn overwrite_put_and_delete() {
        let transport = transport();
        transport
            .put(
                "channels/10/permissions/55",
                json!({"type": 1, "allow": "16", "deny": "0"}),
                None,
            )
            .await
            .unwrap();
        let channel = transport.channel(ChannelId(10)).unwrap();
        assert_eq!(channel.permission_overwrites.len(), 1);
        assert_eq!(
            channel.permission_overwrites[0].allow,
            Permissions::MANAGE_CHANNELS
        );

        transport
            .delete("channels/10/permissions/55", None)
            .await
            .unwrap();
        assert!(transport
            .channel(ChannelId(10))
            .unwrap()
            .permission_overwrites
            .is_empty());
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let transport = transport();
        transport.fail_next(500);
        assert_eq!(
            transport.get("channels/10").await.unwrap_err().status(),
            Some(500)
        );
        assert!(transport.get("channels/10").await.is_ok());
    }
}
