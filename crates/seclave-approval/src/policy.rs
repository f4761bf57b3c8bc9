//! Approval policies and the policy store.
//!
//! A policy defines how many and which approvers must sign off on an
//! access request within an environment / secret-path scope. Sequential
//! policies carry multiple steps; flat policies are a single step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ApprovalError, Result};
use crate::types::{EnforcementLevel, PolicyId, PolicyScope};

// ============================================================================
// Domain Types
// ============================================================================

/// One stage of an approval sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicyStep {
    /// Eligible approver user IDs.
    pub approver_user_ids: Vec<Uuid>,
    /// Eligible approver group IDs, expanded to users at review time.
    pub approver_group_ids: Vec<Uuid>,
    /// Approvals required to satisfy this step.
    pub approvals_required: i32,
}

impl ApprovalPolicyStep {
    /// A step satisfied by `approvals_required` approvals from the given users.
    #[must_use]
    pub fn users(approver_user_ids: Vec<Uuid>, approvals_required: i32) -> Self {
        Self {
            approver_user_ids,
            approver_group_ids: Vec::new(),
            approvals_required,
        }
    }
}

/// An approval policy scoped to an environment and optional secret path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Unique identifier.
    pub id: PolicyId,
    /// The project this policy belongs to.
    pub project_id: Uuid,
    /// Environment slug the policy applies to.
    pub environment: String,
    /// Optional secret-path prefix; `None` means environment-wide.
    pub secret_path: Option<String>,
    /// Overall number of approvals required by the policy.
    pub approvals_required: i32,
    /// Ordered approval sequence. Never empty.
    pub steps: Vec<ApprovalPolicyStep>,
    /// Identities permitted to force-approve with a justification.
    pub bypasser_ids: Vec<Uuid>,
    /// Whether the requester may count as their own approver.
    pub allowed_self_approvals: bool,
    /// Bypass enforcement level.
    pub enforcement_level: EnforcementLevel,
    /// Soft-delete marker; deleted policies are excluded from resolution
    /// but preserved for historic requests.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the policy was created.
    pub created_at: DateTime<Utc>,
}

impl ApprovalPolicy {
    /// Check whether the policy is active (not soft-deleted).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether this is a single-step (flat) policy.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.steps.len() == 1
    }

    /// The step at the given 0-based position.
    #[must_use]
    pub fn step(&self, index: i32) -> Option<&ApprovalPolicyStep> {
        usize::try_from(index).ok().and_then(|i| self.steps.get(i))
    }

    /// Total number of steps in the sequence.
    #[must_use]
    pub fn total_steps(&self) -> i32 {
        self.steps.len() as i32
    }

    /// Whether the given identity may exercise a bypass.
    #[must_use]
    pub fn is_bypasser(&self, user_id: Uuid) -> bool {
        self.bypasser_ids.contains(&user_id)
    }

    /// How specific this policy's scope is; used to pick the winner when
    /// several policies cover the same path.
    fn specificity(&self) -> usize {
        self.secret_path.as_ref().map_or(0, String::len)
    }

    /// Whether the policy covers the given scope.
    fn covers(&self, scope: &PolicyScope) -> bool {
        if self.project_id != scope.project_id || self.environment != scope.environment {
            return false;
        }
        match (&self.secret_path, &scope.secret_path) {
            // Environment-wide policy covers every path.
            (None, _) => true,
            // Path-scoped policy needs a request path under its prefix.
            (Some(prefix), Some(path)) => path.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }
}

/// Input for creating an approval policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePolicyInput {
    pub project_id: Uuid,
    pub environment: String,
    pub secret_path: Option<String>,
    pub approvals_required: i32,
    pub steps: Vec<ApprovalPolicyStep>,
    pub bypasser_ids: Vec<Uuid>,
    pub allowed_self_approvals: bool,
    pub enforcement_level: EnforcementLevel,
}

impl CreatePolicyInput {
    /// A flat policy: one step containing all approvers.
    #[must_use]
    pub fn flat(
        project_id: Uuid,
        environment: impl Into<String>,
        approver_user_ids: Vec<Uuid>,
        approvals_required: i32,
    ) -> Self {
        Self {
            project_id,
            environment: environment.into(),
            secret_path: None,
            approvals_required,
            steps: vec![ApprovalPolicyStep::users(
                approver_user_ids,
                approvals_required,
            )],
            bypasser_ids: Vec::new(),
            allowed_self_approvals: false,
            enforcement_level: EnforcementLevel::Hard,
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Repository interface for approval policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Resolve the active policy for a scope.
    ///
    /// The most specific secret-path prefix wins; an environment-wide
    /// policy is the fallback. Soft-deleted policies are excluded.
    async fn resolve(&self, scope: &PolicyScope) -> Result<Option<ApprovalPolicy>>;

    /// Get a policy by ID, including soft-deleted policies.
    ///
    /// Historic requests keep referencing their policy after deletion.
    async fn get(&self, id: PolicyId) -> Result<Option<ApprovalPolicy>>;

    /// List all policies for a project, including soft-deleted ones.
    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<ApprovalPolicy>>;

    /// Create a new policy.
    async fn insert(&self, input: CreatePolicyInput) -> Result<ApprovalPolicy>;

    /// Soft-delete a policy. Returns false if it was already deleted or unknown.
    async fn soft_delete(&self, id: PolicyId) -> Result<bool>;
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory policy store for testing.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: Arc<RwLock<HashMap<Uuid, ApprovalPolicy>>>,
}

impl InMemoryPolicyStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Clear all policies.
    pub async fn clear(&self) {
        self.policies.write().await.clear();
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn resolve(&self, scope: &PolicyScope) -> Result<Option<ApprovalPolicy>> {
        let policies = self.policies.read().await;
        Ok(policies
            .values()
            .filter(|p| p.is_active() && p.covers(scope))
            .max_by_key(|p| p.specificity())
            .cloned())
    }

    async fn get(&self, id: PolicyId) -> Result<Option<ApprovalPolicy>> {
        let policies = self.policies.read().await;
        Ok(policies.get(&id.into_inner()).cloned())
    }

    async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<ApprovalPolicy>> {
        let policies = self.policies.read().await;
        let mut results: Vec<_> = policies
            .values()
            .filter(|p| p.project_id == project_id)
            .cloned()
            .collect();
        results.sort_by_key(|p| p.created_at);
        Ok(results)
    }

    async fn insert(&self, input: CreatePolicyInput) -> Result<ApprovalPolicy> {
        if input.steps.is_empty() {
            return Err(ApprovalError::Validation(
                "policy must have at least one approval step".to_string(),
            ));
        }

        let policy = ApprovalPolicy {
            id: PolicyId::new(),
            project_id: input.project_id,
            environment: input.environment,
            secret_path: input.secret_path,
            approvals_required: input.approvals_required,
            steps: input.steps,
            bypasser_ids: input.bypasser_ids,
            allowed_self_approvals: input.allowed_self_approvals,
            enforcement_level: input.enforcement_level,
            deleted_at: None,
            created_at: Utc::now(),
        };

        let mut policies = self.policies.write().await;
        policies.insert(policy.id.into_inner(), policy.clone());
        Ok(policy)
    }

    async fn soft_delete(&self, id: PolicyId) -> Result<bool> {
        let mut policies = self.policies.write().await;
        match policies.get_mut(&id.into_inner()) {
            Some(policy) if policy.deleted_at.is_none() => {
                policy.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
