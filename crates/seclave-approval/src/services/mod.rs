//! Service layer for the access-approval workflow.
//!
//! This module provides the business logic services gating access to
//! sensitive secret scopes: request intake and listing, and review
//! tallying with grant issuance.

pub mod request_service;
pub mod review_service;

// Re-export commonly used types
pub use request_service::{
    CreateAccessRequestInput, EnrichedAccessRequest, ListRequestsFilter, RequestCounts,
    RequestService, ReviewSummary, MAX_NOTE_LENGTH,
};
pub use review_service::{
    ReviewOutcome, ReviewService, BYPASS_REASON_MAX_LENGTH, BYPASS_REASON_MIN_LENGTH,
};
