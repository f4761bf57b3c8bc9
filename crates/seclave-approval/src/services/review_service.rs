//! Review tallying, bypass handling and grant issuance.
//!
//! This module provides the `ReviewService`, which records reviewer
//! verdicts against pending requests, advances multi-step sequences as
//! quorums are met, and issues the permission grant exactly once when a
//! request is approved.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{ApprovalAuditAction, ApprovalAuditEventInput, AuditStore};
use crate::error::{ApprovalError, Result};
use crate::grant::{GrantIssuer, GrantSpec};
use crate::identity::IdentityResolver;
use crate::policy::{ApprovalPolicy, PolicyStore};
use crate::request::{AccessApprovalRequest, RequestLedger, Review};
use crate::tally::{eligible_approvers, tally_step};
use crate::types::{ActorContext, GrantStatus, RequestId, RequestStatus, ReviewStatus};

/// Minimum length of a bypass justification, in characters.
pub const BYPASS_REASON_MIN_LENGTH: usize = 10;
/// Maximum length of a bypass justification, in characters.
pub const BYPASS_REASON_MAX_LENGTH: usize = 1000;

// ============================================================================
// Domain Types
// ============================================================================

/// What a review submission produced: the recorded review plus the
/// request state after any step advancement or finalization it caused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    /// The review as recorded (superseding any earlier one).
    pub review: Review,
    /// The request after the submission was applied.
    pub request: AccessApprovalRequest,
}

// ============================================================================
// Review Service
// ============================================================================

/// Service applying reviewer verdicts to pending requests.
pub struct ReviewService {
    policy_store: Arc<dyn PolicyStore>,
    ledger: Arc<dyn RequestLedger>,
    identity: Arc<dyn IdentityResolver>,
    issuer: Arc<dyn GrantIssuer>,
    audit_store: Arc<dyn AuditStore>,
}

impl ReviewService {
    /// Create a new review service.
    pub fn new(
        policy_store: Arc<dyn PolicyStore>,
        ledger: Arc<dyn RequestLedger>,
        identity: Arc<dyn IdentityResolver>,
        issuer: Arc<dyn GrantIssuer>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            policy_store,
            ledger,
            identity,
            issuer,
            audit_store,
        }
    }

    /// Submit a verdict on a pending request.
    ///
    /// A reviewer eligible for the current step approves or rejects
    /// through the normal tally. A bypasser may force-approve instead,
    /// either by attaching a justification or by reviewing a step they
    /// are not an approver of. Resubmission supersedes the reviewer's
    /// earlier verdict.
    pub async fn submit_review(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
        status: ReviewStatus,
        bypass_reason: Option<String>,
    ) -> Result<ReviewOutcome> {
        let request = self.must_get(request_id).await?;
        if request.status.is_terminal() {
            return Err(ApprovalError::RequestAlreadyFinalized(
                request_id.into_inner(),
            ));
        }

        let policy = self.policy_for(&request).await?;
        let step = policy.step(request.current_step).ok_or_else(|| {
            ApprovalError::Internal(format!(
                "request {} points at missing step {}",
                request.id, request.current_step
            ))
        })?;

        let reviewer_id = actor.actor_id;
        if reviewer_id == request.requester_id && !policy.allowed_self_approvals {
            return Err(ApprovalError::SelfApprovalNotAllowed);
        }

        let step_approvers = self.identity.resolve_step_approvers(step).await?;
        let step_eligible = step_approvers.contains(&reviewer_id);

        // A justification, or a verdict from outside the current step's
        // approver set, routes through the bypass path.
        if bypass_reason.is_some() || !step_eligible {
            return self
                .apply_bypass(actor, &request, &policy, status, bypass_reason)
                .await;
        }

        let review = self
            .ledger
            .record_review(request_id, reviewer_id, status, None)
            .await?;

        self.audit_store
            .log_event(ApprovalAuditEventInput {
                request_id,
                policy_id: Some(policy.id),
                action: ApprovalAuditAction::ReviewSubmitted,
                actor_id: reviewer_id,
                detail: Some(json!({ "status": status })),
            })
            .await?;

        let request = match status {
            ReviewStatus::Rejected => self.finalize_rejected(actor, request_id, &policy).await?,
            ReviewStatus::Approved => self.advance_or_finalize(actor, request_id, &policy).await?,
        };

        Ok(ReviewOutcome { review, request })
    }

    /// Re-run grant issuance for an approved request whose grant failed.
    ///
    /// Idempotent: an already-issued grant is left alone.
    pub async fn retry_grant(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
    ) -> Result<AccessApprovalRequest> {
        let request = self.must_get(request_id).await?;
        if request.status != RequestStatus::Approved {
            return Err(ApprovalError::Validation(
                "grant retry requires an approved request".to_string(),
            ));
        }
        if request.grant_status == GrantStatus::Issued {
            return Ok(request);
        }

        let policy = self.policy_for(&request).await?;
        self.issue_grant(actor.actor_id, request, &policy).await
    }

    /// Bypass path: a bypasser force-approves past the remaining quorum.
    async fn apply_bypass(
        &self,
        actor: &ActorContext,
        request: &AccessApprovalRequest,
        policy: &ApprovalPolicy,
        status: ReviewStatus,
        bypass_reason: Option<String>,
    ) -> Result<ReviewOutcome> {
        let reviewer_id = actor.actor_id;
        if !policy.is_bypasser(reviewer_id) {
            return Err(ApprovalError::NotEligibleReviewer);
        }
        // Bypass only force-approves; a bypasser who wants to reject
        // must be an approver of the current step.
        if status == ReviewStatus::Rejected {
            return Err(ApprovalError::NotEligibleReviewer);
        }

        let reason = bypass_reason.ok_or(ApprovalError::BypassReasonRequired)?;
        let length = reason.chars().count();
        if !(BYPASS_REASON_MIN_LENGTH..=BYPASS_REASON_MAX_LENGTH).contains(&length) {
            return Err(ApprovalError::BypassReasonLength {
                min: BYPASS_REASON_MIN_LENGTH,
                max: BYPASS_REASON_MAX_LENGTH,
                actual: length,
            });
        }

        let review = self
            .ledger
            .record_review(request.id, reviewer_id, ReviewStatus::Approved, Some(reason.clone()))
            .await?;

        let updated = match self
            .ledger
            .finalize_if_pending(request.id, RequestStatus::Approved, true)
            .await?
        {
            Some(updated) => {
                warn!(
                    request_id = %request.id,
                    policy_id = %policy.id,
                    reviewer_id = %reviewer_id,
                    enforcement_level = ?policy.enforcement_level,
                    "approval quorum bypassed"
                );
                self.audit_store
                    .log_event(ApprovalAuditEventInput {
                        request_id: request.id,
                        policy_id: Some(policy.id),
                        action: ApprovalAuditAction::BypassExercised,
                        actor_id: reviewer_id,
                        detail: Some(json!({
                            "reason": reason,
                            "enforcement_level": policy.enforcement_level,
                        })),
                    })
                    .await?;
                self.issue_grant(reviewer_id, updated, policy).await?
            }
            // Someone else finalized first; their outcome stands.
            None => self.must_get(request.id).await?,
        };

        Ok(ReviewOutcome {
            review,
            request: updated,
        })
    }

    /// Finalize a rejection recorded by a step-eligible reviewer.
    async fn finalize_rejected(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
        policy: &ApprovalPolicy,
    ) -> Result<AccessApprovalRequest> {
        match self
            .ledger
            .finalize_if_pending(request_id, RequestStatus::Rejected, false)
            .await?
        {
            Some(updated) => {
                info!(request_id = %request_id, "access approval request rejected");
                self.audit_store
                    .log_event(ApprovalAuditEventInput {
                        request_id,
                        policy_id: Some(policy.id),
                        action: ApprovalAuditAction::RequestRejected,
                        actor_id: actor.actor_id,
                        detail: None,
                    })
                    .await?;
                Ok(updated)
            }
            None => self.must_get(request_id).await,
        }
    }

    /// Re-tally the current step, cascading through any steps whose
    /// quorum the recorded reviews already satisfy, and finalize when
    /// the last step is met.
    ///
    /// All transitions are compare-and-set against the ledger, so of
    /// several racing submissions exactly one finalizes (and issues the
    /// grant); the rest observe the winner's state.
    async fn advance_or_finalize(
        &self,
        actor: &ActorContext,
        request_id: RequestId,
        policy: &ApprovalPolicy,
    ) -> Result<AccessApprovalRequest> {
        let mut current = self.must_get(request_id).await?;

        loop {
            if current.status.is_terminal() {
                return Ok(current);
            }

            let step = policy.step(current.current_step).ok_or_else(|| {
                ApprovalError::Internal(format!(
                    "request {} points at missing step {}",
                    current.id, current.current_step
                ))
            })?;
            let approvers = self.identity.resolve_step_approvers(step).await?;
            let eligible = eligible_approvers(
                &approvers,
                current.requester_id,
                policy.allowed_self_approvals,
            );
            let reviews = self.ledger.latest_reviews(request_id).await?;
            let tally = tally_step(&eligible, &reviews, step.approvals_required);

            if tally.rejected {
                return self.finalize_rejected(actor, request_id, policy).await;
            }
            if !tally.is_satisfied() {
                return Ok(current);
            }

            if current.current_step + 1 < policy.total_steps() {
                match self
                    .ledger
                    .advance_step(request_id, current.current_step)
                    .await?
                {
                    Some(updated) => {
                        info!(
                            request_id = %request_id,
                            step = updated.current_step,
                            "approval sequence advanced"
                        );
                        current = updated;
                    }
                    None => current = self.must_get(request_id).await?,
                }
            } else {
                return match self
                    .ledger
                    .finalize_if_pending(request_id, RequestStatus::Approved, false)
                    .await?
                {
                    Some(updated) => {
                        info!(request_id = %request_id, "access approval request approved");
                        self.audit_store
                            .log_event(ApprovalAuditEventInput {
                                request_id,
                                policy_id: Some(policy.id),
                                action: ApprovalAuditAction::RequestApproved,
                                actor_id: actor.actor_id,
                                detail: None,
                            })
                            .await?;
                        self.issue_grant(actor.actor_id, updated, policy).await
                    }
                    None => self.must_get(request_id).await,
                };
            }
        }
    }

    /// Invoke the grant issuer for an approved request and record the
    /// outcome. Issuer failure never reverts the approval.
    async fn issue_grant(
        &self,
        actor_id: Uuid,
        request: AccessApprovalRequest,
        policy: &ApprovalPolicy,
    ) -> Result<AccessApprovalRequest> {
        let spec = GrantSpec::from(&request);
        match self.issuer.issue(&spec).await {
            Ok(()) => {
                let updated = self
                    .ledger
                    .set_grant_status(request.id, GrantStatus::Issued)
                    .await?
                    .unwrap_or(request);
                info!(request_id = %updated.id, "permission grant issued");
                self.audit_store
                    .log_event(ApprovalAuditEventInput {
                        request_id: updated.id,
                        policy_id: Some(policy.id),
                        action: ApprovalAuditAction::GrantIssued,
                        actor_id,
                        detail: None,
                    })
                    .await?;
                Ok(updated)
            }
            Err(err) => {
                warn!(
                    request_id = %request.id,
                    error = %err,
                    "grant issuance failed; approval stands"
                );
                let updated = self
                    .ledger
                    .set_grant_status(request.id, GrantStatus::Failed)
                    .await?
                    .unwrap_or(request);
                self.audit_store
                    .log_event(ApprovalAuditEventInput {
                        request_id: updated.id,
                        policy_id: Some(policy.id),
                        action: ApprovalAuditAction::GrantIssuanceFailed,
                        actor_id,
                        detail: Some(json!({ "error": err.to_string() })),
                    })
                    .await?;
                Ok(updated)
            }
        }
    }

    async fn must_get(&self, request_id: RequestId) -> Result<AccessApprovalRequest> {
        self.ledger
            .get(request_id)
            .await?
            .ok_or(ApprovalError::RequestNotFound(request_id.into_inner()))
    }

    async fn policy_for(&self, request: &AccessApprovalRequest) -> Result<ApprovalPolicy> {
        self.policy_store.get(request.policy_id).await?.ok_or_else(|| {
            ApprovalError::Internal(format!(
                "policy {} missing for request {}",
                request.policy_id, request.id
            ))
        })
    }
}
