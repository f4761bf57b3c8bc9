//! Identity resolution for approval eligibility.
//!
//! Expands policy steps (user IDs plus group IDs) into the concrete set
//! of eligible approver users. System accounts are filtered here, once,
//! rather than being special-cased in every query.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::policy::ApprovalPolicyStep;

/// Minimal identity profile used to enrich request listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Unique identifier.
    pub id: Uuid,
    /// Email address.
    pub email: Option<String>,
    /// Login name.
    pub username: String,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Machine/service accounts never count as approvers.
    pub is_system_account: bool,
}

/// Resolves policy steps and user lookups against the identity system.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Expand a policy step into its distinct eligible approver users.
    ///
    /// Group members are flattened in and system accounts are dropped.
    async fn resolve_step_approvers(&self, step: &ApprovalPolicyStep) -> Result<HashSet<Uuid>>;

    /// Look up a user's profile.
    async fn resolve_user(&self, user_id: Uuid) -> Result<Option<UserIdentity>>;
}

// ============================================================================
// In-Memory Resolver (for testing)
// ============================================================================

#[derive(Debug, Default)]
struct ResolverInner {
    users: HashMap<Uuid, UserIdentity>,
    group_members: HashMap<Uuid, Vec<Uuid>>,
}

/// In-memory identity resolver for testing.
#[derive(Debug, Default)]
pub struct InMemoryIdentityResolver {
    inner: Arc<RwLock<ResolverInner>>,
}

impl InMemoryIdentityResolver {
    /// Create a new in-memory resolver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ResolverInner::default())),
        }
    }

    /// Register a user and return its ID.
    pub async fn add_user(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        let user = UserIdentity {
            id,
            email: Some(format!("{username}@example.com")),
            username: username.to_string(),
            first_name: None,
            last_name: None,
            is_system_account: false,
        };
        self.inner.write().await.users.insert(id, user);
        id
    }

    /// Register a system account (excluded from approver sets).
    pub async fn add_system_account(&self, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        let user = UserIdentity {
            id,
            email: None,
            username: username.to_string(),
            first_name: None,
            last_name: None,
            is_system_account: true,
        };
        self.inner.write().await.users.insert(id, user);
        id
    }

    /// Register a group with the given members and return its ID.
    pub async fn add_group(&self, member_ids: Vec<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.write().await.group_members.insert(id, member_ids);
        id
    }
}

#[async_trait]
impl IdentityResolver for InMemoryIdentityResolver {
    async fn resolve_step_approvers(&self, step: &ApprovalPolicyStep) -> Result<HashSet<Uuid>> {
        let inner = self.inner.read().await;

        let mut approvers: HashSet<Uuid> = step.approver_user_ids.iter().copied().collect();
        for group_id in &step.approver_group_ids {
            if let Some(members) = inner.group_members.get(group_id) {
                approvers.extend(members.iter().copied());
            }
        }

        approvers.retain(|id| {
            inner
                .users
                .get(id)
                .is_none_or(|user| !user.is_system_account)
        });

        Ok(approvers)
    }

    async fn resolve_user(&self, user_id: Uuid) -> Result<Option<UserIdentity>> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_direct_users() {
        let resolver = InMemoryIdentityResolver::new();
        let alice = resolver.add_user("alice").await;
        let bob = resolver.add_user("bob").await;

        let step = ApprovalPolicyStep::users(vec![alice, bob], 2);
        let approvers = resolver.resolve_step_approvers(&step).await.unwrap();

        assert_eq!(approvers.len(), 2);
        assert!(approvers.contains(&alice));
        assert!(approvers.contains(&bob));
    }

    #[tokio::test]
    async fn test_expands_groups_and_dedupes() {
        let resolver = InMemoryIdentityResolver::new();
        let alice = resolver.add_user("alice").await;
        let bob = resolver.add_user("bob").await;
        let group = resolver.add_group(vec![alice, bob]).await;

        // Alice is both a direct approver and a group member.
        let step = ApprovalPolicyStep {
            approver_user_ids: vec![alice],
            approver_group_ids: vec![group],
            approvals_required: 2,
        };

        let approvers = resolver.resolve_step_approvers(&step).await.unwrap();
        assert_eq!(approvers.len(), 2);
    }

    #[tokio::test]
    async fn test_filters_system_accounts() {
        let resolver = InMemoryIdentityResolver::new();
        let alice = resolver.add_user("alice").await;
        let bot = resolver.add_system_account("ci-bot").await;
        let group = resolver.add_group(vec![alice, bot]).await;

        let step = ApprovalPolicyStep {
            approver_user_ids: vec![],
            approver_group_ids: vec![group],
            approvals_required: 1,
        };

        let approvers = resolver.resolve_step_approvers(&step).await.unwrap();
        assert_eq!(approvers.len(), 1);
        assert!(approvers.contains(&alice));
        assert!(!approvers.contains(&bot));
    }

    #[tokio::test]
    async fn test_resolve_user_profile() {
        let resolver = InMemoryIdentityResolver::new();
        let alice = resolver.add_user("alice").await;

        let profile = resolver.resolve_user(alice).await.unwrap().unwrap();
        assert_eq!(profile.username, "alice");
        assert_eq!(profile.email.as_deref(), Some("alice@example.com"));

        assert!(resolver.resolve_user(Uuid::new_v4()).await.unwrap().is_none());
    }
}
