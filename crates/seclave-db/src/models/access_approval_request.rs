//! Access Approval Request model.
//!
//! Represents a user's request for elevated permissions, gated by an
//! approval policy. Terminal transitions are compare-and-set: the
//! `WHERE status = 'pending'` guard ensures that concurrent reviewers
//! cannot both finalize the same request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status for access-approval requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "approval_request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRequestStatus {
    /// Awaiting reviews.
    Pending,
    /// Quorum reached or bypass exercised.
    Approved,
    /// Rejected by an eligible reviewer.
    Rejected,
}

impl ApprovalRequestStatus {
    /// Check if the request can still be actioned.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Check if the request is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// Grant materialization status for an approved request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "grant_issuance_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GrantIssuanceStatus {
    /// No grant has been issued yet.
    NotIssued,
    /// The permission grant was materialized.
    Issued,
    /// The issuer failed; approval stands and issuance can be retried.
    Failed,
}

/// A request for elevated permissions.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessApprovalRequest {
    /// Unique identifier for the request.
    pub id: Uuid,

    /// The policy governing this request.
    pub policy_id: Uuid,

    /// The user asking for access.
    pub requester_id: Uuid,

    /// Opaque permission-set payload.
    pub permissions: serde_json::Value,

    /// Whether the requested access is time-bound.
    pub is_temporary: bool,

    /// Duration string for temporary access (required when temporary).
    pub temporary_range: Option<String>,

    /// Optional requester note.
    pub note: Option<String>,

    /// Request status.
    pub status: ApprovalRequestStatus,

    /// Current step in the policy's approval sequence (0-based).
    pub current_step: i32,

    /// Whether the approval came through a bypass.
    pub bypassed: bool,

    /// Grant materialization status.
    pub grant_status: GrantIssuanceStatus,

    /// When the request reached a terminal state.
    pub resolved_at: Option<DateTime<Utc>>,

    /// When the request was submitted.
    pub created_at: DateTime<Utc>,

    /// When the request was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Request to create a new access-approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccessApprovalRequest {
    pub policy_id: Uuid,
    pub requester_id: Uuid,
    pub permissions: serde_json::Value,
    pub is_temporary: bool,
    pub temporary_range: Option<String>,
    pub note: Option<String>,
}

/// Filter options for listing requests.
#[derive(Debug, Clone, Default)]
pub struct ApprovalRequestFilter {
    pub requester_id: Option<Uuid>,
    pub status: Option<ApprovalRequestStatus>,
}

impl AccessApprovalRequest {
    /// Find a request by ID.
    pub async fn find_by_id(pool: &sqlx::PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM access_approval_requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find a request by ID with a row-level lock.
    ///
    /// Uses `FOR UPDATE` so review recording can serialize against other
    /// reviewers inside a transaction.
    pub async fn find_by_id_for_update<'e, E>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as(
            r#"
            SELECT * FROM access_approval_requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// List requests for a set of policies with optional filters.
    pub async fn list_by_policies(
        pool: &sqlx::PgPool,
        policy_ids: &[Uuid],
        filter: &ApprovalRequestFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = String::from(
            r#"
            SELECT * FROM access_approval_requests
            WHERE policy_id = ANY($1)
            "#,
        );
        let mut param_count = 1;

        if filter.requester_id.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND requester_id = ${param_count}"));
        }
        if filter.status.is_some() {
            param_count += 1;
            query.push_str(&format!(" AND status = ${param_count}"));
        }

        query.push_str(" ORDER BY created_at DESC");

        let mut q = sqlx::query_as::<_, Self>(&query).bind(policy_ids);

        if let Some(requester_id) = filter.requester_id {
            q = q.bind(requester_id);
        }
        if let Some(status) = filter.status {
            q = q.bind(status);
        }

        q.fetch_all(pool).await
    }

    /// Create a new request in the pending state.
    pub async fn create(
        pool: &sqlx::PgPool,
        input: CreateAccessApprovalRequest,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO access_approval_requests (
                policy_id, requester_id, permissions, is_temporary,
                temporary_range, note
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(input.policy_id)
        .bind(input.requester_id)
        .bind(&input.permissions)
        .bind(input.is_temporary)
        .bind(&input.temporary_range)
        .bind(&input.note)
        .fetch_one(pool)
        .await
    }

    /// Advance a pending request to the next approval step.
    ///
    /// Compare-and-set on both status and the expected step; returns `None`
    /// if another submission advanced or finalized the request first.
    pub async fn advance_step(
        pool: &sqlx::PgPool,
        id: Uuid,
        from_step: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE access_approval_requests
            SET current_step = current_step + 1, updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND current_step = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from_step)
        .fetch_optional(pool)
        .await
    }

    /// Transition a pending request to a terminal status.
    ///
    /// Compare-and-set: only the submission that observes `pending` wins;
    /// losers get `None` and must re-read the already-terminal row.
    pub async fn finalize_if_pending(
        pool: &sqlx::PgPool,
        id: Uuid,
        status: ApprovalRequestStatus,
        bypassed: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE access_approval_requests
            SET status = $2, bypassed = $3, resolved_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(bypassed)
        .fetch_optional(pool)
        .await
    }

    /// Update the grant materialization status.
    pub async fn set_grant_status(
        pool: &sqlx::PgPool,
        id: Uuid,
        grant_status: GrantIssuanceStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE access_approval_requests
            SET grant_status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(grant_status)
        .fetch_optional(pool)
        .await
    }
}
