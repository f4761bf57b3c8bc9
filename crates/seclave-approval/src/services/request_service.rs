//! Request intake and listing for access-approval workflows.
//!
//! This module provides the `RequestService` for creating access
//! requests against the policy covering their scope, and for the
//! reviewer-facing count and list views.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit::{ApprovalAuditAction, ApprovalAuditEventInput, AuditStore};
use crate::error::{ApprovalError, Result};
use crate::identity::{IdentityResolver, UserIdentity};
use crate::policy::{ApprovalPolicy, PolicyStore};
use crate::request::{AccessApprovalRequest, CreateRequestInput, RequestFilter, RequestLedger};
use crate::tally::eligible_approvers;
use crate::types::{
    parse_temporary_range, ActorContext, PolicyId, PolicyScope, RequestId, RequestStatus,
    ReviewStatus,
};

/// Maximum length of a requester note, in characters.
pub const MAX_NOTE_LENGTH: usize = 255;

// ============================================================================
// Domain Types
// ============================================================================

/// Input for creating an access-approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccessRequestInput {
    /// Opaque permission-set payload handed through to the grant issuer.
    pub permissions: serde_json::Value,
    /// Whether the requested access is time-bound.
    pub is_temporary: bool,
    /// Duration string such as `"4h"`; required iff `is_temporary`.
    pub temporary_range: Option<String>,
    /// Optional requester note.
    pub note: Option<String>,
}

/// Filter options for listing requests.
#[derive(Debug, Clone, Default)]
pub struct ListRequestsFilter {
    /// Only requests authored by this user.
    pub requester_id: Option<Uuid>,
    /// Only requests under policies for this environment.
    pub environment: Option<String>,
}

/// A reviewer's verdict, flattened for list views.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReviewSummary {
    /// The reviewing user.
    pub reviewer_id: Uuid,
    /// The verdict.
    pub status: ReviewStatus,
}

/// A request joined with its governing policy and review state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedAccessRequest {
    /// The request itself.
    pub request: AccessApprovalRequest,
    /// The policy governing it; soft-deleted policies still appear here
    /// so historic requests stay interpretable.
    pub policy: ApprovalPolicy,
    /// Requester profile, when still resolvable.
    pub requested_by: Option<UserIdentity>,
    /// Live reviews, one per reviewer.
    pub reviews: Vec<ReviewSummary>,
    /// Whether the request has reached approval.
    pub is_approved: bool,
}

/// Pending / finalized request counts for a reviewer's inbox badge.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestCounts {
    /// Requests still awaiting review.
    pub pending_count: usize,
    /// Requests that reached a terminal state.
    pub finalized_count: usize,
}

// ============================================================================
// Request Service
// ============================================================================

/// Service for creating and listing access-approval requests.
pub struct RequestService {
    policy_store: Arc<dyn PolicyStore>,
    ledger: Arc<dyn RequestLedger>,
    identity: Arc<dyn IdentityResolver>,
    audit_store: Arc<dyn AuditStore>,
}

impl RequestService {
    /// Create a new request service.
    pub fn new(
        policy_store: Arc<dyn PolicyStore>,
        ledger: Arc<dyn RequestLedger>,
        identity: Arc<dyn IdentityResolver>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            policy_store,
            ledger,
            identity,
            audit_store,
        }
    }

    /// Create an access request against the policy covering `scope`.
    ///
    /// Resolves the most specific active policy, validates the input,
    /// and refuses requests that could never reach quorum.
    pub async fn create_request(
        &self,
        actor: &ActorContext,
        scope: &PolicyScope,
        input: CreateAccessRequestInput,
    ) -> Result<AccessApprovalRequest> {
        validate_request_input(&input)?;

        let policy = self
            .policy_store
            .resolve(scope)
            .await?
            .ok_or(ApprovalError::PolicyNotFound)?;

        self.ensure_satisfiable(&policy, actor.actor_id).await?;

        let request = self
            .ledger
            .create(CreateRequestInput {
                policy_id: policy.id,
                requester_id: actor.actor_id,
                permissions: input.permissions,
                is_temporary: input.is_temporary,
                temporary_range: input.temporary_range,
                note: input.note,
            })
            .await?;

        self.audit_store
            .log_event(ApprovalAuditEventInput {
                request_id: request.id,
                policy_id: Some(policy.id),
                action: ApprovalAuditAction::RequestCreated,
                actor_id: actor.actor_id,
                detail: Some(json!({
                    "environment": scope.environment,
                    "secret_path": scope.secret_path,
                    "is_temporary": request.is_temporary,
                })),
            })
            .await?;

        info!(
            request_id = %request.id,
            policy_id = %policy.id,
            environment = %scope.environment,
            "access approval request created"
        );

        Ok(request)
    }

    /// Get a request by ID, restricted to what the actor may see.
    pub async fn get_request(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
    ) -> Result<AccessApprovalRequest> {
        let request = self
            .ledger
            .get(request_id)
            .await?
            .ok_or(ApprovalError::RequestNotFound(request_id.into_inner()))?;

        if request.requester_id != actor.actor_id {
            let policy = self.policy_for(&request).await?;
            let visible = self.policy_participants(&policy).await?;
            if !visible.contains(&actor.actor_id) {
                return Err(ApprovalError::RequestNotFound(request_id.into_inner()));
            }
        }

        Ok(request)
    }

    /// Pending and finalized counts over the requests the actor may see.
    ///
    /// Pass `policy_id` to narrow the count to one policy's requests.
    pub async fn get_count(
        &self,
        actor: &ActorContext,
        project_id: Uuid,
        policy_id: Option<PolicyId>,
    ) -> Result<RequestCounts> {
        let policies = self.project_policies(project_id, policy_id, None).await?;
        let requests = self
            .visible_requests(actor, &policies, &RequestFilter::default())
            .await?;

        let mut counts = RequestCounts::default();
        for request in requests {
            if request.status.is_pending() {
                counts.pending_count += 1;
            } else {
                counts.finalized_count += 1;
            }
        }
        Ok(counts)
    }

    /// List the actor's visible requests, enriched with policy, requester
    /// profile and live reviews.
    pub async fn list_approval_requests(
        &self,
        actor: &ActorContext,
        project_id: Uuid,
        filter: &ListRequestsFilter,
    ) -> Result<Vec<EnrichedAccessRequest>> {
        let policies = self
            .project_policies(project_id, None, filter.environment.as_deref())
            .await?;
        let ledger_filter = RequestFilter {
            requester_id: filter.requester_id,
            status: None,
        };
        let requests = self.visible_requests(actor, &policies, &ledger_filter).await?;

        let by_id: HashMap<PolicyId, &ApprovalPolicy> =
            policies.iter().map(|p| (p.id, p)).collect();

        let mut enriched = Vec::with_capacity(requests.len());
        for request in requests {
            let Some(policy) = by_id.get(&request.policy_id) else {
                continue;
            };
            let requested_by = self.identity.resolve_user(request.requester_id).await?;
            let reviews = self
                .ledger
                .latest_reviews(request.id)
                .await?
                .into_iter()
                .map(|r| ReviewSummary {
                    reviewer_id: r.reviewer_id,
                    status: r.status,
                })
                .collect();
            let is_approved = request.status == RequestStatus::Approved;
            enriched.push(EnrichedAccessRequest {
                request,
                policy: (*policy).clone(),
                requested_by,
                reviews,
                is_approved,
            });
        }
        Ok(enriched)
    }

    /// Refuse requests whose policy could never reach quorum.
    async fn ensure_satisfiable(&self, policy: &ApprovalPolicy, requester_id: Uuid) -> Result<()> {
        let mut all_eligible: HashSet<Uuid> = HashSet::new();
        for step in &policy.steps {
            let approvers = self.identity.resolve_step_approvers(step).await?;
            let eligible =
                eligible_approvers(&approvers, requester_id, policy.allowed_self_approvals);
            if eligible.len() < usize::try_from(step.approvals_required).unwrap_or(0) {
                return Err(ApprovalError::UnsatisfiablePolicy {
                    required: step.approvals_required,
                    available: eligible.len(),
                });
            }
            all_eligible.extend(eligible);
        }
        if all_eligible.len() < usize::try_from(policy.approvals_required).unwrap_or(0) {
            return Err(ApprovalError::UnsatisfiablePolicy {
                required: policy.approvals_required,
                available: all_eligible.len(),
            });
        }
        Ok(())
    }

    /// Policies for a project, including soft-deleted ones so historic
    /// requests keep their context.
    async fn project_policies(
        &self,
        project_id: Uuid,
        policy_id: Option<PolicyId>,
        environment: Option<&str>,
    ) -> Result<Vec<ApprovalPolicy>> {
        let mut policies = self.policy_store.list_for_project(project_id).await?;
        if let Some(id) = policy_id {
            policies.retain(|p| p.id == id);
            if policies.is_empty() {
                return Err(ApprovalError::PolicyNotFound);
            }
        }
        if let Some(env) = environment {
            policies.retain(|p| p.environment == env);
        }
        Ok(policies)
    }

    async fn policy_for(&self, request: &AccessApprovalRequest) -> Result<ApprovalPolicy> {
        self.policy_store.get(request.policy_id).await?.ok_or_else(|| {
            ApprovalError::Internal(format!(
                "policy {} missing for request {}",
                request.policy_id, request.id
            ))
        })
    }

    /// Everyone with a reviewer's view of a policy: step approvers
    /// across the whole sequence plus bypassers.
    async fn policy_participants(&self, policy: &ApprovalPolicy) -> Result<HashSet<Uuid>> {
        let mut participants: HashSet<Uuid> = policy.bypasser_ids.iter().copied().collect();
        for step in &policy.steps {
            participants.extend(self.identity.resolve_step_approvers(step).await?);
        }
        Ok(participants)
    }

    /// Requests under the given policies the actor is allowed to see:
    /// their own, plus any where they are a step approver or bypasser.
    async fn visible_requests(
        &self,
        actor: &ActorContext,
        policies: &[ApprovalPolicy],
        filter: &RequestFilter,
    ) -> Result<Vec<AccessApprovalRequest>> {
        let mut reviewer_policies: HashSet<PolicyId> = HashSet::new();
        for policy in policies {
            if self.policy_participants(policy).await?.contains(&actor.actor_id) {
                reviewer_policies.insert(policy.id);
            }
        }

        let policy_ids: Vec<PolicyId> = policies.iter().map(|p| p.id).collect();
        let mut requests = self.ledger.list_by_policies(&policy_ids, filter).await?;
        requests.retain(|r| {
            r.requester_id == actor.actor_id || reviewer_policies.contains(&r.policy_id)
        });
        Ok(requests)
    }
}

fn validate_request_input(input: &CreateAccessRequestInput) -> Result<()> {
    if let Some(note) = &input.note {
        if note.chars().count() > MAX_NOTE_LENGTH {
            return Err(ApprovalError::Validation(format!(
                "note must be at most {MAX_NOTE_LENGTH} characters"
            )));
        }
    }

    match (input.is_temporary, input.temporary_range.as_deref()) {
        (true, None) => return Err(ApprovalError::TemporaryRangeRequired),
        (false, Some(_)) => return Err(ApprovalError::TemporaryRangeNotAllowed),
        (true, Some(range)) => {
            parse_temporary_range(range)?;
        }
        (false, None) => {}
    }

    Ok(())
}
