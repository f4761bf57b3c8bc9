//! Pure tally logic for the review engine.
//!
//! Given the eligible approver set for the current step and the live
//! reviews (one per reviewer), these helpers decide whether the step is
//! satisfied or the request must fail fast on a rejection. Keeping this
//! free of storage concerns makes the quorum rules directly testable.

use std::collections::HashSet;

use uuid::Uuid;

use crate::request::Review;
use crate::types::ReviewStatus;

/// Outcome of tallying one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTally {
    /// Distinct eligible approvers whose latest review is an approval.
    pub approvals: usize,
    /// Approvals required by the step.
    pub required: usize,
    /// Whether any eligible reviewer's latest review is a rejection.
    pub rejected: bool,
}

impl StepTally {
    /// Whether the step quorum is met (and nothing was rejected).
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        !self.rejected && self.approvals >= self.required
    }
}

/// Narrow a step's resolved approver set by the self-approval rule.
///
/// When the policy forbids self-approval, the requester never counts as
/// an eligible approver even if listed in the step.
#[must_use]
pub fn eligible_approvers(
    step_approvers: &HashSet<Uuid>,
    requester_id: Uuid,
    allowed_self_approvals: bool,
) -> HashSet<Uuid> {
    let mut eligible = step_approvers.clone();
    if !allowed_self_approvals {
        eligible.remove(&requester_id);
    }
    eligible
}

/// Tally the current step against the live reviews.
///
/// Reviews from ineligible identities (bypassers, earlier-step approvers
/// not in this step) are ignored here; bypass short-circuits before the
/// tally ever runs.
#[must_use]
pub fn tally_step(eligible: &HashSet<Uuid>, reviews: &[Review], required: i32) -> StepTally {
    let mut approvals = 0usize;
    let mut rejected = false;

    for review in reviews {
        if !eligible.contains(&review.reviewer_id) {
            continue;
        }
        match review.status {
            ReviewStatus::Approved => approvals += 1,
            ReviewStatus::Rejected => rejected = true,
        }
    }

    StepTally {
        approvals,
        required: usize::try_from(required.max(0)).unwrap_or(0),
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestId;
    use chrono::Utc;

    fn review(reviewer_id: Uuid, status: ReviewStatus) -> Review {
        Review {
            id: Uuid::new_v4(),
            request_id: RequestId::new(),
            reviewer_id,
            status,
            bypass_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_quorum_met_by_distinct_eligible_approvers() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let eligible: HashSet<_> = [a, b, c].into_iter().collect();

        let reviews = vec![
            review(a, ReviewStatus::Approved),
            review(b, ReviewStatus::Approved),
        ];

        let tally = tally_step(&eligible, &reviews, 2);
        assert_eq!(tally.approvals, 2);
        assert!(tally.is_satisfied());
    }

    #[test]
    fn test_quorum_short_by_one() {
        let a = Uuid::new_v4();
        let eligible: HashSet<_> = [a, Uuid::new_v4()].into_iter().collect();

        let reviews = vec![review(a, ReviewStatus::Approved)];

        let tally = tally_step(&eligible, &reviews, 2);
        assert_eq!(tally.approvals, 1);
        assert!(!tally.is_satisfied());
    }

    #[test]
    fn test_ineligible_reviews_are_ignored() {
        let a = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let eligible: HashSet<_> = [a].into_iter().collect();

        let reviews = vec![
            review(a, ReviewStatus::Approved),
            review(outsider, ReviewStatus::Approved),
            review(outsider, ReviewStatus::Rejected),
        ];

        let tally = tally_step(&eligible, &reviews, 2);
        assert_eq!(tally.approvals, 1);
        assert!(!tally.rejected);
    }

    #[test]
    fn test_single_eligible_rejection_blocks_satisfaction() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let eligible: HashSet<_> = [a, b, c].into_iter().collect();

        let reviews = vec![
            review(a, ReviewStatus::Approved),
            review(b, ReviewStatus::Approved),
            review(c, ReviewStatus::Rejected),
        ];

        let tally = tally_step(&eligible, &reviews, 2);
        assert!(tally.rejected);
        assert!(!tally.is_satisfied());
    }

    #[test]
    fn test_self_approval_filtering() {
        let requester = Uuid::new_v4();
        let other = Uuid::new_v4();
        let step: HashSet<_> = [requester, other].into_iter().collect();

        let strict = eligible_approvers(&step, requester, false);
        assert_eq!(strict.len(), 1);
        assert!(!strict.contains(&requester));

        let lenient = eligible_approvers(&step, requester, true);
        assert_eq!(lenient.len(), 2);
        assert!(lenient.contains(&requester));
    }

    #[test]
    fn test_empty_reviews_pending() {
        let eligible: HashSet<_> = [Uuid::new_v4()].into_iter().collect();
        let tally = tally_step(&eligible, &[], 1);
        assert_eq!(tally.approvals, 0);
        assert!(!tally.is_satisfied());
    }
}
