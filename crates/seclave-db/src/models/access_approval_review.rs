//! Access Approval Review model.
//!
//! One row per (request, reviewer); a reviewer resubmitting supersedes
//! their previous review through an upsert on the unique index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "approval_review_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalReviewStatus {
    /// Reviewer approved the request.
    Approved,
    /// Reviewer rejected the request.
    Rejected,
}

/// A review of an access-approval request.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccessApprovalReview {
    /// Unique identifier for the review.
    pub id: Uuid,

    /// The request being reviewed.
    pub request_id: Uuid,

    /// The reviewing user.
    pub reviewer_id: Uuid,

    /// The verdict.
    pub status: ApprovalReviewStatus,

    /// Justification when the review is a bypass.
    pub bypass_reason: Option<String>,

    /// When the review was first submitted.
    pub created_at: DateTime<Utc>,

    /// When the review was last superseded.
    pub updated_at: DateTime<Utc>,
}

/// Input for recording or superseding a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAccessApprovalReview {
    pub request_id: Uuid,
    pub reviewer_id: Uuid,
    pub status: ApprovalReviewStatus,
    pub bypass_reason: Option<String>,
}

impl AccessApprovalReview {
    /// Record a review, superseding any earlier review by the same reviewer.
    pub async fn upsert<'e, E>(
        executor: E,
        input: UpsertAccessApprovalReview,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as(
            r#"
            INSERT INTO access_approval_reviews (request_id, reviewer_id, status, bypass_reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (request_id, reviewer_id)
            DO UPDATE SET status = EXCLUDED.status,
                          bypass_reason = EXCLUDED.bypass_reason,
                          updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(input.request_id)
        .bind(input.reviewer_id)
        .bind(input.status)
        .bind(&input.bypass_reason)
        .fetch_one(executor)
        .await
    }

    /// Find all live reviews for a request.
    pub async fn find_by_request(
        pool: &sqlx::PgPool,
        request_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM access_approval_reviews
            WHERE request_id = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(pool)
        .await
    }
}
