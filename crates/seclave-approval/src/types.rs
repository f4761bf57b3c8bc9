//! Type definitions for the approval workflow domain.
//!
//! Includes newtype wrappers for IDs, status enums, and the scope /
//! actor context handed in by the (out-of-scope) caller layer.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ApprovalError;

// ============================================================================
// ID Types (Newtype Pattern)
// ============================================================================

/// Unique identifier for an approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(pub Uuid);

impl PolicyId {
    /// Create a new random `PolicyId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    #[must_use]
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PolicyId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<PolicyId> for Uuid {
    fn from(id: PolicyId) -> Self {
        id.0
    }
}

/// Unique identifier for an access-approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new random `RequestId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    #[must_use]
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<RequestId> for Uuid {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

// ============================================================================
// Status Enums
// ============================================================================

/// Lifecycle status of an access-approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting reviews.
    Pending,
    /// Quorum reached or bypass exercised.
    Approved,
    /// Rejected by an eligible reviewer.
    Rejected,
}

impl RequestStatus {
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

/// A reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Reviewer approved the request.
    Approved,
    /// Reviewer rejected the request.
    Rejected,
}

/// Enforcement level for a policy's bypass rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    /// Bypass is audited but tolerated.
    Soft,
    /// Bypass requires explicit bypasser membership.
    Hard,
}

/// Grant materialization status for an approved request.
///
/// Approval is the ledger's source of truth; grant issuance is
/// eventually-consistent and tracked separately so an issuer failure
/// never reverts an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// No grant has been issued yet.
    NotIssued,
    /// The permission grant was materialized.
    Issued,
    /// The issuer failed; issuance can be retried.
    Failed,
}

// ============================================================================
// Caller Context
// ============================================================================

/// Kind of authenticated actor invoking the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human user.
    User,
    /// A machine identity.
    Identity,
}

/// Already-authenticated identity context handed in by the caller layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// The acting identity.
    pub actor_id: Uuid,
    /// What kind of actor this is.
    pub actor_type: ActorType,
    /// The organization the actor is operating in.
    pub actor_org_id: Uuid,
}

impl ActorContext {
    /// Convenience constructor for a human user actor.
    #[must_use]
    pub fn user(actor_id: Uuid, actor_org_id: Uuid) -> Self {
        Self {
            actor_id,
            actor_type: ActorType::User,
            actor_org_id,
        }
    }
}

/// Scope an approval policy or request applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyScope {
    /// The project the secrets live in.
    pub project_id: Uuid,
    /// Environment slug (e.g. `production`).
    pub environment: String,
    /// Optional secret path; more specific paths beat the
    /// environment-wide fallback during policy resolution.
    pub secret_path: Option<String>,
}

impl PolicyScope {
    /// Environment-wide scope.
    #[must_use]
    pub fn environment(project_id: Uuid, environment: impl Into<String>) -> Self {
        Self {
            project_id,
            environment: environment.into(),
            secret_path: None,
        }
    }

    /// Scope narrowed to a secret path.
    #[must_use]
    pub fn secret_path(
        project_id: Uuid,
        environment: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            environment: environment.into(),
            secret_path: Some(path.into()),
        }
    }
}

// ============================================================================
// Temporary Range
// ============================================================================

/// Parse a temporary-range duration string such as `"30s"`, `"15m"`,
/// `"4h"`, `"7d"` or `"2w"`.
///
/// # Errors
///
/// Returns `ApprovalError::InvalidTemporaryRange` for empty strings,
/// unknown units, zero durations, or non-numeric magnitudes.
pub fn parse_temporary_range(range: &str) -> Result<Duration, ApprovalError> {
    let trimmed = range.trim();

    // Split on the final char, not a byte index; the unit may be any
    // (multi-byte) character and must fail as a typed error.
    let mut chars = trimmed.chars();
    let unit = chars
        .next_back()
        .ok_or_else(|| ApprovalError::InvalidTemporaryRange(range.to_string()))?;
    let magnitude = chars.as_str();

    let value: i64 = magnitude
        .parse()
        .map_err(|_| ApprovalError::InvalidTemporaryRange(range.to_string()))?;

    if value <= 0 {
        return Err(ApprovalError::InvalidTemporaryRange(range.to_string()));
    }

    match unit {
        's' => Ok(Duration::seconds(value)),
        'm' => Ok(Duration::minutes(value)),
        'h' => Ok(Duration::hours(value)),
        'd' => Ok(Duration::days(value)),
        'w' => Ok(Duration::weeks(value)),
        _ => Err(ApprovalError::InvalidTemporaryRange(range.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_status_transitions() {
        assert!(RequestStatus::Pending.is_pending());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_policy_id_display_roundtrip() {
        let raw = Uuid::new_v4();
        let id = PolicyId::from(raw);
        assert_eq!(id.to_string(), raw.to_string());
        assert_eq!(Uuid::from(id), raw);
    }

    #[test]
    fn test_parse_temporary_range_units() {
        assert_eq!(parse_temporary_range("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_temporary_range("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_temporary_range("4h").unwrap(), Duration::hours(4));
        assert_eq!(parse_temporary_range("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_temporary_range("2w").unwrap(), Duration::weeks(2));
    }

    #[test]
    fn test_parse_temporary_range_rejects_garbage() {
        assert!(parse_temporary_range("").is_err());
        assert!(parse_temporary_range("h").is_err());
        assert!(parse_temporary_range("4x").is_err());
        assert!(parse_temporary_range("0h").is_err());
        assert!(parse_temporary_range("-2d").is_err());
        assert!(parse_temporary_range("4.5h").is_err());
    }

    #[test]
    fn test_parse_temporary_range_rejects_multibyte_units() {
        assert!(matches!(
            parse_temporary_range("1µ"),
            Err(ApprovalError::InvalidTemporaryRange(_))
        ));
        assert!(matches!(
            parse_temporary_range("4時"),
            Err(ApprovalError::InvalidTemporaryRange(_))
        ));
    }

    #[test]
    fn test_parse_temporary_range_trims_whitespace() {
        assert_eq!(parse_temporary_range(" 1h ").unwrap(), Duration::hours(1));
    }

    #[test]
    fn test_scope_constructors() {
        let project = Uuid::new_v4();
        let wide = PolicyScope::environment(project, "staging");
        assert!(wide.secret_path.is_none());

        let narrow = PolicyScope::secret_path(project, "staging", "/payments/stripe");
        assert_eq!(narrow.secret_path.as_deref(), Some("/payments/stripe"));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RequestStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");

        let json = serde_json::to_string(&GrantStatus::NotIssued).unwrap();
        assert_eq!(json, "\"not_issued\"");

        let json = serde_json::to_string(&EnforcementLevel::Soft).unwrap();
        assert_eq!(json, "\"soft\"");
    }
}
