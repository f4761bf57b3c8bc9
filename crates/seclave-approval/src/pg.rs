//! Postgres-backed implementations of the policy store and request
//! ledger, built on the `seclave-db` models.
//!
//! Review recording runs inside a transaction holding a `FOR UPDATE`
//! lock on the request row, so the terminal-state check and the review
//! upsert are atomic against concurrent reviewers. Step advancement and
//! finalization rely on the models' compare-and-set updates instead of
//! locks.

use async_trait::async_trait;
use uuid::Uuid;

use seclave_db::models::{
    AccessApprovalPolicy as DbPolicy, AccessApprovalPolicyStep as DbPolicyStep,
    AccessApprovalRequest as DbRequest, AccessApprovalReview as DbReview, ApprovalRequestStatus,
    ApprovalReviewStatus, CreateAccessApprovalPolicy, CreateAccessApprovalPolicyStep,
    CreateAccessApprovalRequest, GrantIssuanceStatus, PolicyEnforcementLevel,
    UpsertAccessApprovalReview,
};
use seclave_db::DbPool;

use crate::error::{ApprovalError, Result};
use crate::policy::{ApprovalPolicy, ApprovalPolicyStep, CreatePolicyInput, PolicyStore};
use crate::request::{
    AccessApprovalRequest, CreateRequestInput, RequestFilter, RequestLedger, Review,
};
use crate::types::{
    EnforcementLevel, GrantStatus, PolicyId, PolicyScope, RequestId, RequestStatus, ReviewStatus,
};

// ============================================================================
// Enum Mapping
// ============================================================================

impl From<PolicyEnforcementLevel> for EnforcementLevel {
    fn from(level: PolicyEnforcementLevel) -> Self {
        match level {
            PolicyEnforcementLevel::Soft => Self::Soft,
            PolicyEnforcementLevel::Hard => Self::Hard,
        }
    }
}

impl From<EnforcementLevel> for PolicyEnforcementLevel {
    fn from(level: EnforcementLevel) -> Self {
        match level {
            EnforcementLevel::Soft => Self::Soft,
            EnforcementLevel::Hard => Self::Hard,
        }
    }
}

impl From<ApprovalRequestStatus> for RequestStatus {
    fn from(status: ApprovalRequestStatus) -> Self {
        match status {
            ApprovalRequestStatus::Pending => Self::Pending,
            ApprovalRequestStatus::Approved => Self::Approved,
            ApprovalRequestStatus::Rejected => Self::Rejected,
        }
    }
}

impl From<RequestStatus> for ApprovalRequestStatus {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Pending => Self::Pending,
            RequestStatus::Approved => Self::Approved,
            RequestStatus::Rejected => Self::Rejected,
        }
    }
}

impl From<ApprovalReviewStatus> for ReviewStatus {
    fn from(status: ApprovalReviewStatus) -> Self {
        match status {
            ApprovalReviewStatus::Approved => Self::Approved,
            ApprovalReviewStatus::Rejected => Self::Rejected,
        }
    }
}

impl From<ReviewStatus> for ApprovalReviewStatus {
    fn from(status: ReviewStatus) -> Self {
        match status {
            ReviewStatus::Approved => Self::Approved,
            ReviewStatus::Rejected => Self::Rejected,
        }
    }
}

impl From<GrantIssuanceStatus> for GrantStatus {
    fn from(status: GrantIssuanceStatus) -> Self {
        match status {
            GrantIssuanceStatus::NotIssued => Self::NotIssued,
            GrantIssuanceStatus::Issued => Self::Issued,
            GrantIssuanceStatus::Failed => Self::Failed,
        }
    }
}

impl From<GrantStatus> for GrantIssuanceStatus {
    fn from(status: GrantStatus) -> Self {
        match status {
            GrantStatus::NotIssued => Self::NotIssued,
            GrantStatus::Issued => Self::Issued,
            GrantStatus::Failed => Self::Failed,
        }
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn policy_from_rows(policy: DbPolicy, steps: Vec<DbPolicyStep>) -> ApprovalPolicy {
    ApprovalPolicy {
        id: PolicyId::from(policy.id),
        project_id: policy.project_id,
        environment: policy.environment,
        secret_path: policy.secret_path,
        approvals_required: policy.approvals_required,
        steps: steps
            .into_iter()
            .map(|step| ApprovalPolicyStep {
                approver_user_ids: step.approver_user_ids,
                approver_group_ids: step.approver_group_ids,
                approvals_required: step.approvals_required,
            })
            .collect(),
        bypasser_ids: policy.bypasser_ids,
        allowed_self_approvals: policy.allowed_self_approvals,
        enforcement_level: policy.enforcement_level.into(),
        deleted_at: policy.deleted_at,
        created_at: policy.created_at,
    }
}

impl From<DbRequest> for AccessApprovalRequest {
    fn from(row: DbRequest) -> Self {
        Self {
            id: RequestId::from(row.id),
            policy_id: PolicyId::from(row.policy_id),
            requester_id: row.requester_id,
            permissions: row.permissions,
            is_temporary: row.is_temporary,
            temporary_range: row.temporary_range,
            note: row.note,
            status: row.status.into(),
            current_step: row.current_step,
            bypassed: row.bypassed,
            grant_status: row.grant_status.into(),
            resolved_at: row.resolved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<DbReview> for Review {
    fn from(row: DbReview) -> Self {
        Self {
            id: row.id,
            request_id: RequestId::from(row.request_id),
            reviewer_id: row.reviewer_id,
            status: row.status.into(),
            bypass_reason: row.bypass_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ============================================================================
// Policy Store
// ============================================================================

/// Postgres-backed policy store.
pub struct PgPolicyStore {
    pool: DbPool,
}

impl PgPolicyStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, policy: DbPolicy) -> Result<ApprovalPolicy> {
        let steps = DbPolicyStep::find_by_policy(self.pool.inner(), policy.id).await?;
        Ok(policy_from_rows(policy, steps))
    }
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn resolve(&self, scope: &PolicyScope) -> Result<Option<ApprovalPolicy>> {
        let row = DbPolicy::find_active_for_scope(
            self.pool.inner(),
            scope.project_id,
            &scope.environment,
            scope.secret_path.as_deref(),
        )
        .await?;
        match row {
            Some(policy) => Ok(Some(self.load_steps(policy).await?)),
            None => Ok(None),
        }
    }

    async fn get(&self, id: PolicyId) -> Result<Option<ApprovalPolicy>> {
        let row = DbPolicy::find_by_id(self.pool.inner(), id.into_inner()).await?;
        match row {
            Some(policy) => Ok(Some(self.load_steps(policy).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<ApprovalPolicy>> {
        let rows = DbPolicy::list_by_project(self.pool.inner(), project_id).await?;
        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            policies.push(self.load_steps(row).await?);
        }
        Ok(policies)
    }

    async fn insert(&self, input: CreatePolicyInput) -> Result<ApprovalPolicy> {
        if input.steps.is_empty() {
            return Err(ApprovalError::Validation(
                "policy must have at least one approval step".to_string(),
            ));
        }

        let policy = DbPolicy::create(
            self.pool.inner(),
            CreateAccessApprovalPolicy {
                project_id: input.project_id,
                environment: input.environment,
                secret_path: input.secret_path,
                approvals_required: input.approvals_required,
                bypasser_ids: input.bypasser_ids,
                allowed_self_approvals: input.allowed_self_approvals,
                enforcement_level: input.enforcement_level.into(),
            },
        )
        .await?;

        let step_inputs = input
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| CreateAccessApprovalPolicyStep {
                step_number: i32::try_from(i).unwrap_or(i32::MAX),
                approvals_required: step.approvals_required,
                approver_user_ids: step.approver_user_ids,
                approver_group_ids: step.approver_group_ids,
            })
            .collect();
        let steps = DbPolicyStep::create_batch(self.pool.inner(), policy.id, step_inputs).await?;

        Ok(policy_from_rows(policy, steps))
    }

    async fn soft_delete(&self, id: PolicyId) -> Result<bool> {
        let updated = DbPolicy::soft_delete(self.pool.inner(), id.into_inner()).await?;
        Ok(updated.is_some())
    }
}

// ============================================================================
// Request Ledger
// ============================================================================

/// Postgres-backed request ledger.
pub struct PgRequestLedger {
    pool: DbPool,
}

impl PgRequestLedger {
    /// Create a ledger over an existing pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestLedger for PgRequestLedger {
    async fn create(&self, input: CreateRequestInput) -> Result<AccessApprovalRequest> {
        let row = DbRequest::create(
            self.pool.inner(),
            CreateAccessApprovalRequest {
                policy_id: input.policy_id.into_inner(),
                requester_id: input.requester_id,
                permissions: input.permissions,
                is_temporary: input.is_temporary,
                temporary_range: input.temporary_range,
                note: input.note,
            },
        )
        .await?;
        Ok(row.into())
    }

    async fn get(&self, id: RequestId) -> Result<Option<AccessApprovalRequest>> {
        let row = DbRequest::find_by_id(self.pool.inner(), id.into_inner()).await?;
        Ok(row.map(Into::into))
    }

    async fn list_by_policies(
        &self,
        policy_ids: &[PolicyId],
        filter: &RequestFilter,
    ) -> Result<Vec<AccessApprovalRequest>> {
        let ids: Vec<Uuid> = policy_ids.iter().map(|id| id.into_inner()).collect();
        let db_filter = seclave_db::models::ApprovalRequestFilter {
            requester_id: filter.requester_id,
            status: filter.status.map(Into::into),
        };
        let rows = DbRequest::list_by_policies(self.pool.inner(), &ids, &db_filter).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_review(
        &self,
        request_id: RequestId,
        reviewer_id: Uuid,
        status: ReviewStatus,
        bypass_reason: Option<String>,
    ) -> Result<Review> {
        let mut tx = self.pool.inner().begin().await?;

        let request = DbRequest::find_by_id_for_update(&mut *tx, request_id.into_inner())
            .await?
            .ok_or(ApprovalError::RequestNotFound(request_id.into_inner()))?;
        if request.status.is_terminal() {
            return Err(ApprovalError::RequestAlreadyFinalized(
                request_id.into_inner(),
            ));
        }

        let review = DbReview::upsert(
            &mut *tx,
            UpsertAccessApprovalReview {
                request_id: request_id.into_inner(),
                reviewer_id,
                status: status.into(),
                bypass_reason,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(review.into())
    }

    async fn latest_reviews(&self, request_id: RequestId) -> Result<Vec<Review>> {
        let rows = DbReview::find_by_request(self.pool.inner(), request_id.into_inner()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn advance_step(
        &self,
        request_id: RequestId,
        from_step: i32,
    ) -> Result<Option<AccessApprovalRequest>> {
        let row =
            DbRequest::advance_step(self.pool.inner(), request_id.into_inner(), from_step).await?;
        Ok(row.map(Into::into))
    }

    async fn finalize_if_pending(
        &self,
        request_id: RequestId,
        status: RequestStatus,
        bypassed: bool,
    ) -> Result<Option<AccessApprovalRequest>> {
        let row = DbRequest::finalize_if_pending(
            self.pool.inner(),
            request_id.into_inner(),
            status.into(),
            bypassed,
        )
        .await?;
        Ok(row.map(Into::into))
    }

    async fn set_grant_status(
        &self,
        request_id: RequestId,
        grant_status: GrantStatus,
    ) -> Result<Option<AccessApprovalRequest>> {
        let row = DbRequest::set_grant_status(
            self.pool.inner(),
            request_id.into_inner(),
            grant_status.into(),
        )
        .await?;
        Ok(row.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_status_mapping_roundtrip() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
        ] {
            let db: ApprovalRequestStatus = status.into();
            assert_eq!(RequestStatus::from(db), status);
        }

        for status in [GrantStatus::NotIssued, GrantStatus::Issued, GrantStatus::Failed] {
            let db: GrantIssuanceStatus = status.into();
            assert_eq!(GrantStatus::from(db), status);
        }
    }

    #[test]
    fn test_policy_assembly_preserves_step_order() {
        let policy_id = Uuid::new_v4();
        let policy = DbPolicy {
            id: policy_id,
            project_id: Uuid::new_v4(),
            environment: "production".to_string(),
            secret_path: None,
            approvals_required: 3,
            bypasser_ids: vec![],
            allowed_self_approvals: false,
            enforcement_level: PolicyEnforcementLevel::Hard,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let steps = (0..3)
            .map(|n| DbPolicyStep {
                id: Uuid::new_v4(),
                policy_id,
                step_number: n,
                approvals_required: n + 1,
                approver_user_ids: vec![Uuid::new_v4()],
                approver_group_ids: vec![],
                created_at: Utc::now(),
            })
            .collect();

        let domain = policy_from_rows(policy, steps);
        assert_eq!(domain.total_steps(), 3);
        let required: Vec<i32> = domain.steps.iter().map(|s| s.approvals_required).collect();
        assert_eq!(required, vec![1, 2, 3]);
    }
}
