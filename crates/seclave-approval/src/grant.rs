//! Grant issuance boundary.
//!
//! The Grant Issuer is an external collaborator: once a request is
//! approved, it materializes the actual permission grant. Issuance is
//! idempotent on the request ID, and an issuer failure never reverts an
//! approval; the ledger tracks a separate grant status that can be
//! retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ApprovalError, Result};
use crate::request::AccessApprovalRequest;
use crate::types::RequestId;

/// Everything the permission system needs to materialize a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSpec {
    /// The approved request; doubles as the idempotency key.
    pub request_id: RequestId,
    /// Who receives the elevated permissions.
    pub requester_id: Uuid,
    /// Opaque permission-set payload.
    pub permissions: serde_json::Value,
    /// Whether the grant is time-bound.
    pub is_temporary: bool,
    /// Duration string for temporary grants.
    pub temporary_range: Option<String>,
}

impl From<&AccessApprovalRequest> for GrantSpec {
    fn from(request: &AccessApprovalRequest) -> Self {
        Self {
            request_id: request.id,
            requester_id: request.requester_id,
            permissions: request.permissions.clone(),
            is_temporary: request.is_temporary,
            temporary_range: request.temporary_range.clone(),
        }
    }
}

/// External collaborator that applies approved permission grants.
#[async_trait]
pub trait GrantIssuer: Send + Sync {
    /// Materialize the grant for an approved request.
    ///
    /// Must be safe to call more than once for the same request.
    async fn issue(&self, spec: &GrantSpec) -> Result<()>;
}

// ============================================================================
// Test Doubles
// ============================================================================

/// Grant issuer that records every issued spec; dedupes on request ID.
#[derive(Debug, Default)]
pub struct RecordingGrantIssuer {
    issued: Arc<Mutex<Vec<GrantSpec>>>,
    fail: AtomicBool,
}

impl RecordingGrantIssuer {
    /// Create a new recording issuer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `issue` calls fail (until cleared).
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of distinct grant invocations recorded.
    pub async fn issued_count(&self) -> usize {
        self.issued.lock().await.len()
    }

    /// All recorded grant specs.
    pub async fn issued(&self) -> Vec<GrantSpec> {
        self.issued.lock().await.clone()
    }
}

#[async_trait]
impl GrantIssuer for RecordingGrantIssuer {
    async fn issue(&self, spec: &GrantSpec) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApprovalError::GrantIssuance(
                "simulated downstream failure".to_string(),
            ));
        }

        let mut issued = self.issued.lock().await;
        // Idempotent on request id.
        if !issued.iter().any(|s| s.request_id == spec.request_id) {
            issued.push(spec.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(request_id: RequestId) -> GrantSpec {
        GrantSpec {
            request_id,
            requester_id: Uuid::new_v4(),
            permissions: serde_json::json!([{"action": "read"}]),
            is_temporary: true,
            temporary_range: Some("1h".to_string()),
        }
    }

    #[tokio::test]
    async fn test_recording_issuer_dedupes_on_request_id() {
        let issuer = RecordingGrantIssuer::new();
        let s = spec(RequestId::new());

        issuer.issue(&s).await.unwrap();
        issuer.issue(&s).await.unwrap();

        assert_eq!(issuer.issued_count().await, 1);
    }

    #[tokio::test]
    async fn test_recording_issuer_failure_mode() {
        let issuer = RecordingGrantIssuer::new();
        issuer.fail_next(true);

        let err = issuer.issue(&spec(RequestId::new())).await.unwrap_err();
        assert!(matches!(err, ApprovalError::GrantIssuance(_)));
        assert_eq!(issuer.issued_count().await, 0);

        issuer.fail_next(false);
        issuer.issue(&spec(RequestId::new())).await.unwrap();
        assert_eq!(issuer.issued_count().await, 1);
    }

    #[test]
    fn test_grant_spec_from_request() {
        let request = AccessApprovalRequest {
            id: RequestId::new(),
            policy_id: crate::types::PolicyId::new(),
            requester_id: Uuid::new_v4(),
            permissions: serde_json::json!([{"action": "edit", "secretPath": "/db"}]),
            is_temporary: true,
            temporary_range: Some("4h".to_string()),
            note: None,
            status: crate::types::RequestStatus::Approved,
            current_step: 0,
            bypassed: false,
            grant_status: crate::types::GrantStatus::NotIssued,
            resolved_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let spec = GrantSpec::from(&request);
        assert_eq!(spec.request_id, request.id);
        assert_eq!(spec.requester_id, request.requester_id);
        assert!(spec.is_temporary);
        assert_eq!(spec.temporary_range.as_deref(), Some("4h"));
    }
}
