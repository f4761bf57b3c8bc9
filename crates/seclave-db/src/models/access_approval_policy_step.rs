//! Access Approval Policy Step model.
//!
//! Represents a single stage within a sequential approval policy. Flat
//! policies are stored as a single step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single approval stage within a policy.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessApprovalPolicyStep {
    /// Unique identifier for the step.
    pub id: Uuid,

    /// The policy this step belongs to.
    pub policy_id: Uuid,

    /// Position in the approval sequence (0-based).
    pub step_number: i32,

    /// Approvals required to satisfy this step.
    pub approvals_required: i32,

    /// Eligible approver user IDs.
    pub approver_user_ids: Vec<Uuid>,

    /// Eligible approver group IDs, expanded to users at review time.
    pub approver_group_ids: Vec<Uuid>,

    /// When the step was created.
    pub created_at: DateTime<Utc>,
}

/// Request to create a new policy step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccessApprovalPolicyStep {
    pub step_number: i32,
    pub approvals_required: i32,
    pub approver_user_ids: Vec<Uuid>,
    pub approver_group_ids: Vec<Uuid>,
}

impl AccessApprovalPolicyStep {
    /// Find all steps for a policy, ordered by `step_number`.
    pub async fn find_by_policy(
        pool: &sqlx::PgPool,
        policy_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM access_approval_policy_steps
            WHERE policy_id = $1
            ORDER BY step_number ASC
            "#,
        )
        .bind(policy_id)
        .fetch_all(pool)
        .await
    }

    /// Create a new step.
    pub async fn create(
        pool: &sqlx::PgPool,
        policy_id: Uuid,
        input: CreateAccessApprovalPolicyStep,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO access_approval_policy_steps (
                policy_id, step_number, approvals_required,
                approver_user_ids, approver_group_ids
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(policy_id)
        .bind(input.step_number)
        .bind(input.approvals_required)
        .bind(&input.approver_user_ids)
        .bind(&input.approver_group_ids)
        .fetch_one(pool)
        .await
    }

    /// Create multiple steps in sequence order.
    pub async fn create_batch(
        pool: &sqlx::PgPool,
        policy_id: Uuid,
        steps: Vec<CreateAccessApprovalPolicyStep>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            let created = Self::create(pool, policy_id, step).await?;
            results.push(created);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_serialization_roundtrip() {
        let input = CreateAccessApprovalPolicyStep {
            step_number: 1,
            approvals_required: 2,
            approver_user_ids: vec![Uuid::new_v4()],
            approver_group_ids: vec![],
        };

        let json = serde_json::to_string(&input).unwrap();
        let back: CreateAccessApprovalPolicyStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step_number, 1);
        assert_eq!(back.approvals_required, 2);
        assert_eq!(back.approver_user_ids, input.approver_user_ids);
    }
}
