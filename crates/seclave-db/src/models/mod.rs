//! Database entity models for seclave-db.
//!
//! These models represent the database tables and provide
//! type-safe interactions with PostgreSQL.

pub mod access_approval_policy;
pub mod access_approval_policy_step;
pub mod access_approval_request;
pub mod access_approval_review;

pub use access_approval_policy::{
    AccessApprovalPolicy, CreateAccessApprovalPolicy, PolicyEnforcementLevel,
};
pub use access_approval_policy_step::{AccessApprovalPolicyStep, CreateAccessApprovalPolicyStep};
pub use access_approval_request::{
    AccessApprovalRequest, ApprovalRequestFilter, ApprovalRequestStatus, CreateAccessApprovalRequest,
    GrantIssuanceStatus,
};
pub use access_approval_review::{
    AccessApprovalReview, ApprovalReviewStatus, UpsertAccessApprovalReview,
};
