//! Audit logging for approval workflow operations.
//!
//! Every state-changing operation emits an audit event through the
//! pluggable [`AuditStore`]. Bypass exercises always carry their
//! justification so the trail explains who skipped the quorum and why.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{PolicyId, RequestId};

/// Action recorded in an approval audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAuditAction {
    /// A request was created.
    #[default]
    RequestCreated,
    /// A review was submitted or superseded.
    ReviewSubmitted,
    /// The request reached quorum and was approved.
    RequestApproved,
    /// The request was rejected.
    RequestRejected,
    /// A bypasser force-approved past the quorum.
    BypassExercised,
    /// A grant was materialized for an approved request.
    GrantIssued,
    /// Grant issuance failed; approval stands.
    GrantIssuanceFailed,
}

impl std::fmt::Display for ApprovalAuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestCreated => write!(f, "request_created"),
            Self::ReviewSubmitted => write!(f, "review_submitted"),
            Self::RequestApproved => write!(f, "request_approved"),
            Self::RequestRejected => write!(f, "request_rejected"),
            Self::BypassExercised => write!(f, "bypass_exercised"),
            Self::GrantIssued => write!(f, "grant_issued"),
            Self::GrantIssuanceFailed => write!(f, "grant_issuance_failed"),
        }
    }
}

/// An audit event for approval operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAuditEvent {
    /// Unique identifier for the event.
    pub id: Uuid,
    /// The request involved.
    pub request_id: RequestId,
    /// The governing policy, when known.
    pub policy_id: Option<PolicyId>,
    /// Action performed.
    pub action: ApprovalAuditAction,
    /// Who performed the action.
    pub actor_id: Uuid,
    /// Extra context (bypass reason, grant error, review verdict).
    pub detail: Option<serde_json::Value>,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

/// Input for logging an audit event.
#[derive(Debug, Clone, Default)]
pub struct ApprovalAuditEventInput {
    pub request_id: RequestId,
    pub policy_id: Option<PolicyId>,
    pub action: ApprovalAuditAction,
    pub actor_id: Uuid,
    pub detail: Option<serde_json::Value>,
}

/// Trait for audit event storage backends.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist an audit event.
    async fn log_event(&self, input: ApprovalAuditEventInput) -> Result<ApprovalAuditEvent>;

    /// All events for a request, oldest first.
    async fn events_for_request(&self, request_id: RequestId) -> Result<Vec<ApprovalAuditEvent>>;
}

/// In-memory audit store for testing.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    events: Arc<RwLock<Vec<ApprovalAuditEvent>>>,
}

impl InMemoryAuditStore {
    /// Create a new in-memory audit store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Total number of recorded events.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn log_event(&self, input: ApprovalAuditEventInput) -> Result<ApprovalAuditEvent> {
        let event = ApprovalAuditEvent {
            id: Uuid::new_v4(),
            request_id: input.request_id,
            policy_id: input.policy_id,
            action: input.action,
            actor_id: input.actor_id,
            detail: input.detail,
            occurred_at: Utc::now(),
        };

        self.events.write().await.push(event.clone());
        Ok(event)
    }

    async fn events_for_request(&self, request_id: RequestId) -> Result<Vec<ApprovalAuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_and_filter_by_request() {
        let store = InMemoryAuditStore::new();
        let request_id = RequestId::new();

        store
            .log_event(ApprovalAuditEventInput {
                request_id,
                action: ApprovalAuditAction::RequestCreated,
                actor_id: Uuid::new_v4(),
                ..Default::default()
            })
            .await
            .unwrap();

        store
            .log_event(ApprovalAuditEventInput {
                request_id: RequestId::new(),
                action: ApprovalAuditAction::ReviewSubmitted,
                actor_id: Uuid::new_v4(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.event_count().await, 2);
        let events = store.events_for_request(request_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ApprovalAuditAction::RequestCreated);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(
            ApprovalAuditAction::BypassExercised.to_string(),
            "bypass_exercised"
        );
        assert_eq!(ApprovalAuditAction::GrantIssued.to_string(), "grant_issued");
    }
}
