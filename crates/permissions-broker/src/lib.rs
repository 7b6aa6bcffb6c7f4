mod capabilities;
pub mod config;
pub mod resolver;

pub use crate::capabilities::{CapabilityLookup, CapabilityScope, InMemoryCapabilities};
pub use crate::config::ConfigError;
pub use crate::resolver::{
    has_overwrite_permission, overwrite_context, resolve, resolve_missing,
};

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use chatgate_core_types::{Overwrite, Permissions, PrincipalId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_AUDIT_CAPACITY: usize = 128;

/// Decision outcome categories.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecisionKind {
    Allow = 0,
    Deny = 1,
    Partial = 2,
}

/// Which layer produced the final verdict.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecisionSource {
    Administrator,
    Capability,
    Overwrite,
}

/// High-level decision returned to callers before a privileged mutation is issued.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthzDecision {
    pub kind: DecisionKind,
    pub source: DecisionSource,
    pub granted: Permissions,
    pub missing: Permissions,
}

impl AuthzDecision {
    pub fn is_allowed(&self) -> bool {
        self.kind == DecisionKind::Allow
    }
}

/// Event emitted whenever the broker issues a decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor: PrincipalId,
    pub scope: String,
    pub decision: DecisionKind,
    pub source: DecisionSource,
    pub needs: Permissions,
    pub missing: Permissions,
    pub timestamp: SystemTime,
}

/// Errors produced by the broker surface.
#[derive(Clone, Debug, Error)]
pub enum BrokerError {
    #[error("missing permissions: {missing}")]
    MissingPermissions { missing: Permissions },
    #[error("capability lookup failed: {0}")]
    Lookup(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Overwrite list to check on top of the coarse capability bits.
#[derive(Clone, Copy, Debug)]
pub struct OverwriteCheck<'a> {
    pub root: PrincipalId,
    pub overwrites: &'a [Overwrite],
}

/// How the broker treats an overwrite list that has neither an entry for the actor nor
/// a root entry.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// No applicable entry: every needed bit is denied.
    #[default]
    Strict,
    /// No applicable entry: the coarse bits decide alone.
    CoarseFallback,
}

/// Trait describing the operations exposed to higher layers.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn ensure_for(
        &self,
        actor: PrincipalId,
        scope: CapabilityScope,
        needs: Permissions,
        overwrites: Option<OverwriteCheck<'_>>,
    ) -> Result<AuthzDecision, BrokerError>;

    /// Like [`Broker::ensure_for`] but turns anything short of `Allow` into an error.
    async fn require(
        &self,
        actor: PrincipalId,
        scope: CapabilityScope,
        needs: Permissions,
        overwrites: Option<OverwriteCheck<'_>>,
    ) -> Result<AuthzDecision, BrokerError> {
        let decision = self.ensure_for(actor, scope, needs, overwrites).await?;
        if decision.is_allowed() {
            Ok(decision)
        } else {
            Err(BrokerError::MissingPermissions {
                missing: decision.missing,
            })
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuditEvent>;
}

/// Composes the capability lookup with the overwrite resolver.
///
/// `ADMINISTRATOR` in the coarse bits short-circuits both layers. Otherwise a needed bit
/// must be present in the coarse bits and, when an overwrite list is supplied, also
/// resolve to granted there. A list with no entry for the actor and no root entry denies
/// everything unless the broker runs with [`OverwritePolicy::CoarseFallback`].
pub struct PermissionsBroker {
    lookup: Arc<dyn CapabilityLookup>,
    events: broadcast::Sender<AuditEvent>,
    policy: OverwritePolicy,
}

impl PermissionsBroker {
    pub fn new(lookup: Arc<dyn CapabilityLookup>) -> Self {
        Self::with_audit_capacity(lookup, DEFAULT_AUDIT_CAPACITY)
    }

    pub fn with_audit_capacity(lookup: Arc<dyn CapabilityLookup>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            lookup,
            events: tx,
            policy: OverwritePolicy::default(),
        }
    }

    pub fn with_overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn overwrite_policy(&self) -> OverwritePolicy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.events.subscribe()
    }

    fn publish_event(
        &self,
        actor: PrincipalId,
        scope: CapabilityScope,
        needs: Permissions,
        decision: &AuthzDecision,
    ) {
        let event = AuditEvent {
            actor,
            scope: format!("{scope:?}"),
            decision: decision.kind,
            source: decision.source,
            needs,
            missing: decision.missing,
            timestamp: SystemTime::now(),
        };

        // No subscribers is the normal case outside of auditing setups.
        if self.events.receiver_count() == 0 {
            return;
        }
        if let Err(err) = self.events.send(event) {
            warn!(
                target = "permissions-broker",
                "failed to publish audit event: {err}"
            );
        }
    }
}

#[async_trait]
impl Broker for PermissionsBroker {
    async fn ensure_for(
        &self,
        actor: PrincipalId,
        scope: CapabilityScope,
        needs: Permissions,
        overwrites: Option<OverwriteCheck<'_>>,
    ) -> Result<AuthzDecision, BrokerError> {
        let coarse = self.lookup.permissions_for(actor, scope).await?;
        let decision = decide(actor, coarse, needs, overwrites, self.policy);
        debug!(
            target = "permissions-broker",
            actor = %actor,
            needs = %needs,
            missing = %decision.missing,
            source = ?decision.source,
            "authorization decided"
        );
        self.publish_event(actor, scope, needs, &decision);
        Ok(decision)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        PermissionsBroker::subscribe(self)
    }
}

fn decide(
    actor: PrincipalId,
    coarse: Permissions,
    needs: Permissions,
    overwrites: Option<OverwriteCheck<'_>>,
    policy: OverwritePolicy,
) -> AuthzDecision {
    if coarse.contains(Permissions::ADMINISTRATOR) {
        return AuthzDecision {
            kind: DecisionKind::Allow,
            source: DecisionSource::Administrator,
            granted: needs,
            missing: Permissions::empty(),
        };
    }

    let mut missing = needs - coarse;
    let mut source = DecisionSource::Capability;

    if let Some(check) = overwrites {
        let skip = policy == OverwritePolicy::CoarseFallback
            && overwrite_context(actor, check.root, check.overwrites).is_none();
        if !skip {
            let denied_by_overwrite = resolve_missing(actor, check.root, check.overwrites, needs);
            if missing.is_empty() && !denied_by_overwrite.is_empty() {
                source = DecisionSource::Overwrite;
            }
            missing |= denied_by_overwrite;
        }
    }

    let kind = if missing.is_empty() {
        DecisionKind::Allow
    } else if missing == needs {
        DecisionKind::Deny
    } else {
        DecisionKind::Partial
    };

    AuthzDecision {
        kind,
        source,
        granted: needs - missing,
        missing,
    }
}
