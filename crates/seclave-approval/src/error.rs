//! Error types for the access-approval workflow core.

use thiserror::Error;
use uuid::Uuid;

/// Result type for approval operations.
pub type Result<T> = std::result::Result<T, ApprovalError>;

/// Errors raised by the approval workflow core.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A temporary request is missing its duration.
    #[error("Temporary requests must specify a temporary range")]
    TemporaryRangeRequired,

    /// A permanent request carries a temporary range.
    #[error("Permanent requests must not specify a temporary range")]
    TemporaryRangeNotAllowed,

    /// The temporary range string could not be parsed.
    #[error("Invalid temporary range: {0}")]
    InvalidTemporaryRange(String),

    /// A bypass review was submitted without a justification.
    #[error("Bypass approvals require a justification")]
    BypassReasonRequired,

    /// The bypass justification is outside the accepted length bounds.
    #[error("Bypass reason must be between {min} and {max} characters, got {actual}")]
    BypassReasonLength {
        min: usize,
        max: usize,
        actual: usize,
    },

    /// No active policy covers the requested scope.
    #[error("No active approval policy found for the requested scope")]
    PolicyNotFound,

    /// Unknown request.
    #[error("Access approval request not found: {0}")]
    RequestNotFound(Uuid),

    /// Reviewer is neither step-eligible nor a bypasser.
    #[error("Reviewer is not eligible to review this request")]
    NotEligibleReviewer,

    /// Requester tried to review their own request under a policy
    /// that forbids self-approval.
    #[error("Self-approval is not allowed by this policy")]
    SelfApprovalNotAllowed,

    /// The request already reached a terminal state.
    #[error("Request {0} is already finalized")]
    RequestAlreadyFinalized(Uuid),

    /// The policy demands more approvers than exist; the request could
    /// never resolve.
    #[error("Approval policy is unsatisfiable: {required} approvals required but only {available} eligible approvers exist")]
    UnsatisfiablePolicy { required: i32, available: usize },

    /// Grant issuance failed after approval; the approval stands and
    /// issuance can be retried.
    #[error("Grant issuance failed: {0}")]
    GrantIssuance(String),

    /// Ledger or store state that should be impossible.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database error from a persistent store.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApprovalError {
    /// Errors that map to a 404 at the API boundary.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PolicyNotFound | Self::RequestNotFound(_))
    }

    /// Errors that map to a 409.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::RequestAlreadyFinalized(_) | Self::UnsatisfiablePolicy { .. }
        )
    }

    /// Errors that map to a 403.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::NotEligibleReviewer | Self::SelfApprovalNotAllowed)
    }

    /// Errors caused by malformed input.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::TemporaryRangeRequired
                | Self::TemporaryRangeNotAllowed
                | Self::InvalidTemporaryRange(_)
                | Self::BypassReasonRequired
                | Self::BypassReasonLength { .. }
        )
    }

    /// Errors that are safe to retry without losing state.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GrantIssuance(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ApprovalError::PolicyNotFound.is_not_found());
        assert!(ApprovalError::RequestNotFound(Uuid::new_v4()).is_not_found());
        assert!(!ApprovalError::NotEligibleReviewer.is_not_found());
    }

    #[test]
    fn test_conflict_classification() {
        assert!(ApprovalError::RequestAlreadyFinalized(Uuid::new_v4()).is_conflict());
        assert!(ApprovalError::UnsatisfiablePolicy {
            required: 3,
            available: 2
        }
        .is_conflict());
        assert!(!ApprovalError::PolicyNotFound.is_conflict());
    }

    #[test]
    fn test_forbidden_classification() {
        assert!(ApprovalError::NotEligibleReviewer.is_forbidden());
        assert!(ApprovalError::SelfApprovalNotAllowed.is_forbidden());
        assert!(!ApprovalError::BypassReasonRequired.is_forbidden());
    }

    #[test]
    fn test_validation_classification() {
        assert!(ApprovalError::TemporaryRangeRequired.is_validation());
        assert!(ApprovalError::BypassReasonLength {
            min: 10,
            max: 1000,
            actual: 4
        }
        .is_validation());
        assert!(!ApprovalError::GrantIssuance("timeout".to_string()).is_validation());
    }

    #[test]
    fn test_grant_issuance_is_retryable() {
        assert!(ApprovalError::GrantIssuance("downstream 503".to_string()).is_retryable());
        assert!(!ApprovalError::NotEligibleReviewer.is_retryable());
    }
}
