//! Access-approval workflow core for secret scopes.
//!
//! This crate provides the domain logic gating access to sensitive
//! secret scopes behind human review: approval policies, access
//! requests, review tallying, and grant issuance.
//!
//! # Features
//!
//! - Environment and secret-path scoped approval policies, with the
//!   most specific path prefix winning resolution
//! - Flat quorums and sequential multi-step approval sequences
//! - One live review per (request, reviewer); resubmission supersedes
//! - Bypass force-approval for designated identities with a mandatory
//!   justification
//! - Temporary (time-bound) and permanent access requests
//! - Exactly-once grant issuance under concurrent final approvals
//! - Grant failure isolation: an issuer error never reverts an approval
//! - Audit logging for every lifecycle transition
//!
//! # Services
//!
//! The [`services`] module provides the business logic:
//! - [`services::RequestService`] - request intake, counts and list views
//! - [`services::ReviewService`] - review tallying, bypass and grants
//!
//! # Storage
//!
//! Policies and requests live behind the [`policy::PolicyStore`] and
//! [`request::RequestLedger`] traits. In-memory implementations back
//! the test suite; the [`pg`] module implements both over Postgres via
//! the `seclave-db` models.

pub mod audit;
pub mod error;
pub mod grant;
pub mod identity;
pub mod pg;
pub mod policy;
pub mod request;
pub mod services;
pub mod tally;
pub mod types;

// Re-export commonly used types
pub use error::{ApprovalError, Result};
pub use types::{
    parse_temporary_range, ActorContext, ActorType, EnforcementLevel, GrantStatus, PolicyId,
    PolicyScope, RequestId, RequestStatus, ReviewStatus,
};

pub use audit::{ApprovalAuditAction, ApprovalAuditEvent, AuditStore, InMemoryAuditStore};
pub use grant::{GrantIssuer, GrantSpec, RecordingGrantIssuer};
pub use identity::{IdentityResolver, InMemoryIdentityResolver, UserIdentity};
pub use pg::{PgPolicyStore, PgRequestLedger};
pub use policy::{
    ApprovalPolicy, ApprovalPolicyStep, CreatePolicyInput, InMemoryPolicyStore, PolicyStore,
};
pub use request::{
    AccessApprovalRequest, CreateRequestInput, InMemoryRequestLedger, RequestFilter, RequestLedger,
    Review,
};
pub use services::{
    CreateAccessRequestInput, EnrichedAccessRequest, ListRequestsFilter, RequestCounts,
    RequestService, ReviewOutcome, ReviewService, ReviewSummary,
};
