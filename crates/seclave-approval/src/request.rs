//! Access-approval requests, reviews, and the request ledger.
//!
//! The ledger owns every request mutation. Review recording is atomic
//! with the terminal-state check, and terminal transitions are
//! compare-and-set so concurrent reviewers cannot both finalize a
//! request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ApprovalError, Result};
use crate::types::{GrantStatus, PolicyId, RequestId, RequestStatus, ReviewStatus};

// ============================================================================
// Domain Types
// ============================================================================

/// A request for elevated permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessApprovalRequest {
    /// Unique identifier.
    pub id: RequestId,
    /// The policy governing this request.
    pub policy_id: PolicyId,
    /// The user asking for access.
    pub requester_id: Uuid,
    /// Opaque permission-set payload.
    pub permissions: serde_json::Value,
    /// Whether the requested access is time-bound.
    pub is_temporary: bool,
    /// Duration string for temporary access.
    pub temporary_range: Option<String>,
    /// Optional requester note.
    pub note: Option<String>,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Current step in the policy's approval sequence (0-based).
    pub current_step: i32,
    /// Whether the approval came through a bypass.
    pub bypassed: bool,
    /// Grant materialization status.
    pub grant_status: GrantStatus,
    /// When the request reached a terminal state.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the request was submitted.
    pub created_at: DateTime<Utc>,
    /// When the request was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A reviewer's verdict on a request.
///
/// At most one live review exists per `(request, reviewer)`;
/// resubmission supersedes the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    /// Unique identifier.
    pub id: Uuid,
    /// The request being reviewed.
    pub request_id: RequestId,
    /// The reviewing user.
    pub reviewer_id: Uuid,
    /// The verdict.
    pub status: ReviewStatus,
    /// Justification when the review is a bypass.
    pub bypass_reason: Option<String>,
    /// When the review was first submitted.
    pub created_at: DateTime<Utc>,
    /// When the review was last superseded.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a request. Validation happens in the service layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequestInput {
    pub policy_id: PolicyId,
    pub requester_id: Uuid,
    pub permissions: serde_json::Value,
    pub is_temporary: bool,
    pub temporary_range: Option<String>,
    pub note: Option<String>,
}

/// Filter options for listing requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub requester_id: Option<Uuid>,
    pub status: Option<RequestStatus>,
}

// ============================================================================
// Ledger Trait
// ============================================================================

/// Repository interface owning all request and review mutation.
#[async_trait]
pub trait RequestLedger: Send + Sync {
    /// Insert a new request in the pending state.
    async fn create(&self, input: CreateRequestInput) -> Result<AccessApprovalRequest>;

    /// Get a request by ID.
    async fn get(&self, id: RequestId) -> Result<Option<AccessApprovalRequest>>;

    /// List requests governed by any of the given policies.
    async fn list_by_policies(
        &self,
        policy_ids: &[PolicyId],
        filter: &RequestFilter,
    ) -> Result<Vec<AccessApprovalRequest>>;

    /// Record a review, superseding any earlier review by the same reviewer.
    ///
    /// Atomic with the terminal-state check: fails with
    /// `RequestAlreadyFinalized` if the request is no longer pending.
    async fn record_review(
        &self,
        request_id: RequestId,
        reviewer_id: Uuid,
        status: ReviewStatus,
        bypass_reason: Option<String>,
    ) -> Result<Review>;

    /// All live reviews for a request (one per reviewer).
    async fn latest_reviews(&self, request_id: RequestId) -> Result<Vec<Review>>;

    /// Advance a pending request from `from_step` to the next step.
    ///
    /// Compare-and-set; returns `None` if another submission advanced or
    /// finalized the request first.
    async fn advance_step(
        &self,
        request_id: RequestId,
        from_step: i32,
    ) -> Result<Option<AccessApprovalRequest>>;

    /// Transition a pending request to a terminal status.
    ///
    /// Compare-and-set: only the caller that observes `Pending` wins;
    /// race losers get `None`.
    async fn finalize_if_pending(
        &self,
        request_id: RequestId,
        status: RequestStatus,
        bypassed: bool,
    ) -> Result<Option<AccessApprovalRequest>>;

    /// Update the grant materialization status.
    async fn set_grant_status(
        &self,
        request_id: RequestId,
        grant_status: GrantStatus,
    ) -> Result<Option<AccessApprovalRequest>>;
}

// ============================================================================
// In-Memory Ledger (for testing)
// ============================================================================

#[derive(Debug, Default)]
struct LedgerInner {
    requests: HashMap<Uuid, AccessApprovalRequest>,
    // request id -> reviewer id -> latest review
    reviews: HashMap<Uuid, HashMap<Uuid, Review>>,
}

/// In-memory request ledger for testing.
///
/// A single lock over requests and reviews gives the same atomicity the
/// Postgres ledger gets from row locks and conditional updates.
#[derive(Debug, Default)]
pub struct InMemoryRequestLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

impl InMemoryRequestLedger {
    /// Create a new in-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(LedgerInner::default())),
        }
    }

    /// Clear all data.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.requests.clear();
        inner.reviews.clear();
    }
}

#[async_trait]
impl RequestLedger for InMemoryRequestLedger {
    async fn create(&self, input: CreateRequestInput) -> Result<AccessApprovalRequest> {
        let now = Utc::now();
        let request = AccessApprovalRequest {
            id: RequestId::new(),
            policy_id: input.policy_id,
            requester_id: input.requester_id,
            permissions: input.permissions,
            is_temporary: input.is_temporary,
            temporary_range: input.temporary_range,
            note: input.note,
            status: RequestStatus::Pending,
            current_step: 0,
            bypassed: false,
            grant_status: GrantStatus::NotIssued,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.requests.insert(request.id.into_inner(), request.clone());
        Ok(request)
    }

    async fn get(&self, id: RequestId) -> Result<Option<AccessApprovalRequest>> {
        let inner = self.inner.read().await;
        Ok(inner.requests.get(&id.into_inner()).cloned())
    }

    async fn list_by_policies(
        &self,
        policy_ids: &[PolicyId],
        filter: &RequestFilter,
    ) -> Result<Vec<AccessApprovalRequest>> {
        let inner = self.inner.read().await;
        let mut results: Vec<_> = inner
            .requests
            .values()
            .filter(|r| policy_ids.contains(&r.policy_id))
            .filter(|r| filter.requester_id.is_none_or(|id| r.requester_id == id))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    async fn record_review(
        &self,
        request_id: RequestId,
        reviewer_id: Uuid,
        status: ReviewStatus,
        bypass_reason: Option<String>,
    ) -> Result<Review> {
        let mut inner = self.inner.write().await;

        let request = inner
            .requests
            .get(&request_id.into_inner())
            .ok_or(ApprovalError::RequestNotFound(request_id.into_inner()))?;
        if request.status.is_terminal() {
            return Err(ApprovalError::RequestAlreadyFinalized(
                request_id.into_inner(),
            ));
        }

        let now = Utc::now();
        let reviews = inner.reviews.entry(request_id.into_inner()).or_default();
        let review = reviews
            .entry(reviewer_id)
            .and_modify(|r| {
                r.status = status;
                r.bypass_reason.clone_from(&bypass_reason);
                r.updated_at = now;
            })
            .or_insert_with(|| Review {
                id: Uuid::new_v4(),
                request_id,
                reviewer_id,
                status,
                bypass_reason,
                created_at: now,
                updated_at: now,
            })
            .clone();

        Ok(review)
    }

    async fn latest_reviews(&self, request_id: RequestId) -> Result<Vec<Review>> {
        let inner = self.inner.read().await;
        let mut reviews: Vec<_> = inner
            .reviews
            .get(&request_id.into_inner())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        reviews.sort_by_key(|r| r.updated_at);
        Ok(reviews)
    }

    async fn advance_step(
        &self,
        request_id: RequestId,
        from_step: i32,
    ) -> Result<Option<AccessApprovalRequest>> {
        let mut inner = self.inner.write().await;
        match inner.requests.get_mut(&request_id.into_inner()) {
            Some(request)
                if request.status.is_pending() && request.current_step == from_step =>
            {
                request.current_step += 1;
                request.updated_at = Utc::now();
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finalize_if_pending(
        &self,
        request_id: RequestId,
        status: RequestStatus,
        bypassed: bool,
    ) -> Result<Option<AccessApprovalRequest>> {
        let mut inner = self.inner.write().await;
        match inner.requests.get_mut(&request_id.into_inner()) {
            Some(request) if request.status.is_pending() => {
                let now = Utc::now();
                request.status = status;
                request.bypassed = bypassed;
                request.resolved_at = Some(now);
                request.updated_at = now;
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_grant_status(
        &self,
        request_id: RequestId,
        grant_status: GrantStatus,
    ) -> Result<Option<AccessApprovalRequest>> {
        let mut inner = self.inner.write().await;
        match inner.requests.get_mut(&request_id.into_inner()) {
            Some(request) => {
                request.grant_status = grant_status;
                request.updated_at = Utc::now();
                Ok(Some(request.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(policy_id: PolicyId, requester_id: Uuid) -> CreateRequestInput {
        CreateRequestInput {
            policy_id,
            requester_id,
            permissions: serde_json::json!([{"action": "read"}]),
            is_temporary: false,
            temporary_range: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending_with_no_reviews() {
        let ledger = InMemoryRequestLedger::new();
        let request = ledger
            .create(input(PolicyId::new(), Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.current_step, 0);
        assert_eq!(request.grant_status, GrantStatus::NotIssued);
        assert!(ledger.latest_reviews(request.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_review_supersedes_previous() {
        let ledger = InMemoryRequestLedger::new();
        let request = ledger
            .create(input(PolicyId::new(), Uuid::new_v4()))
            .await
            .unwrap();
        let reviewer = Uuid::new_v4();

        let first = ledger
            .record_review(request.id, reviewer, ReviewStatus::Approved, None)
            .await
            .unwrap();
        let second = ledger
            .record_review(request.id, reviewer, ReviewStatus::Rejected, None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let reviews = ledger.latest_reviews(request.id).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].status, ReviewStatus::Rejected);
    }

    #[tokio::test]
    async fn test_record_review_on_terminal_request_conflicts() {
        let ledger = InMemoryRequestLedger::new();
        let request = ledger
            .create(input(PolicyId::new(), Uuid::new_v4()))
            .await
            .unwrap();

        ledger
            .finalize_if_pending(request.id, RequestStatus::Rejected, false)
            .await
            .unwrap()
            .unwrap();

        let err = ledger
            .record_review(request.id, Uuid::new_v4(), ReviewStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::RequestAlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn test_finalize_is_compare_and_set() {
        let ledger = InMemoryRequestLedger::new();
        let request = ledger
            .create(input(PolicyId::new(), Uuid::new_v4()))
            .await
            .unwrap();

        let winner = ledger
            .finalize_if_pending(request.id, RequestStatus::Approved, false)
            .await
            .unwrap();
        assert!(winner.is_some());
        assert!(winner.unwrap().resolved_at.is_some());

        let loser = ledger
            .finalize_if_pending(request.id, RequestStatus::Rejected, false)
            .await
            .unwrap();
        assert!(loser.is_none());

        let current = ledger.get(request.id).await.unwrap().unwrap();
        assert_eq!(current.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_advance_step_cas_on_expected_step() {
        let ledger = InMemoryRequestLedger::new();
        let request = ledger
            .create(input(PolicyId::new(), Uuid::new_v4()))
            .await
            .unwrap();

        let advanced = ledger.advance_step(request.id, 0).await.unwrap().unwrap();
        assert_eq!(advanced.current_step, 1);

        // A second submission that still thinks it is on step 0 loses.
        assert!(ledger.advance_step(request.id, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_policies_filters() {
        let ledger = InMemoryRequestLedger::new();
        let policy_a = PolicyId::new();
        let policy_b = PolicyId::new();
        let requester = Uuid::new_v4();

        ledger.create(input(policy_a, requester)).await.unwrap();
        ledger.create(input(policy_a, Uuid::new_v4())).await.unwrap();
        ledger.create(input(policy_b, requester)).await.unwrap();

        let all_a = ledger
            .list_by_policies(&[policy_a], &RequestFilter::default())
            .await
            .unwrap();
        assert_eq!(all_a.len(), 2);

        let mine = ledger
            .list_by_policies(
                &[policy_a, policy_b],
                &RequestFilter {
                    requester_id: Some(requester),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
    }
}
