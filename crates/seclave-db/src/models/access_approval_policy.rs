//! Access Approval Policy model.
//!
//! A policy defines how many and which approvers must sign off on an
//! access request within an environment / secret-path scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Enforcement level for a policy's bypass rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "policy_enforcement_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PolicyEnforcementLevel {
    /// Bypass is audited but tolerated.
    Soft,
    /// Bypass requires explicit bypasser membership.
    Hard,
}

/// An approval policy scoped to an environment and optional secret path.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessApprovalPolicy {
    /// Unique identifier for the policy.
    pub id: Uuid,

    /// The project this policy belongs to.
    pub project_id: Uuid,

    /// Environment slug the policy applies to.
    pub environment: String,

    /// Optional secret-path prefix; `None` means environment-wide.
    pub secret_path: Option<String>,

    /// Overall number of approvals required by the policy.
    pub approvals_required: i32,

    /// Identities permitted to force-approve with a justification.
    pub bypasser_ids: Vec<Uuid>,

    /// Whether the requester may count as their own approver.
    pub allowed_self_approvals: bool,

    /// Bypass enforcement level.
    pub enforcement_level: PolicyEnforcementLevel,

    /// Soft-delete marker; deleted policies are kept for historic requests.
    pub deleted_at: Option<DateTime<Utc>>,

    /// When the policy was created.
    pub created_at: DateTime<Utc>,

    /// When the policy was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Request to create a new approval policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccessApprovalPolicy {
    pub project_id: Uuid,
    pub environment: String,
    pub secret_path: Option<String>,
    pub approvals_required: i32,
    pub bypasser_ids: Vec<Uuid>,
    pub allowed_self_approvals: bool,
    pub enforcement_level: PolicyEnforcementLevel,
}

impl AccessApprovalPolicy {
    /// Find a policy by ID, including soft-deleted policies.
    ///
    /// Historic requests keep referencing their policy after deletion, so
    /// lookups by ID never filter on `deleted_at`.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM access_approval_policies
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Resolve the active policy for a scope.
    ///
    /// The most specific secret-path prefix wins; an environment-wide policy
    /// (`secret_path IS NULL`) is the fallback. Soft-deleted policies are
    /// excluded.
    pub async fn find_active_for_scope(
        pool: &sqlx::PgPool,
        project_id: Uuid,
        environment: &str,
        secret_path: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM access_approval_policies
            WHERE project_id = $1
              AND environment = $2
              AND deleted_at IS NULL
              AND (secret_path IS NULL
                   OR ($3::TEXT IS NOT NULL AND $3 LIKE secret_path || '%'))
            ORDER BY LENGTH(secret_path) DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(environment)
        .bind(secret_path)
        .fetch_optional(pool)
        .await
    }

    /// List all policies for a project, including soft-deleted ones.
    pub async fn list_by_project(
        pool: &sqlx::PgPool,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM access_approval_policies
            WHERE project_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    /// Create a new policy.
    pub async fn create(
        pool: &sqlx::PgPool,
        input: CreateAccessApprovalPolicy,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO access_approval_policies (
                project_id, environment, secret_path, approvals_required,
                bypasser_ids, allowed_self_approvals, enforcement_level
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(input.project_id)
        .bind(&input.environment)
        .bind(&input.secret_path)
        .bind(input.approvals_required)
        .bind(&input.bypasser_ids)
        .bind(input.allowed_self_approvals)
        .bind(input.enforcement_level)
        .fetch_one(pool)
        .await
    }

    /// Soft-delete a policy. Returns the updated row if it was still active.
    pub async fn soft_delete(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE access_approval_policies
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Check whether the policy is active (not soft-deleted).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforcement_level_serialization() {
        let soft = PolicyEnforcementLevel::Soft;
        let json = serde_json::to_string(&soft).unwrap();
        assert_eq!(json, "\"soft\"");

        let hard = PolicyEnforcementLevel::Hard;
        let json = serde_json::to_string(&hard).unwrap();
        assert_eq!(json, "\"hard\"");
    }

    #[test]
    fn test_is_active() {
        let policy = AccessApprovalPolicy {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            environment: "production".to_string(),
            secret_path: Some("/payments".to_string()),
            approvals_required: 2,
            bypasser_ids: vec![],
            allowed_self_approvals: false,
            enforcement_level: PolicyEnforcementLevel::Hard,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(policy.is_active());

        let deleted = AccessApprovalPolicy {
            deleted_at: Some(Utc::now()),
            ..policy
        };
        assert!(!deleted.is_active());
    }
}
