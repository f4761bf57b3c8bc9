//! Common test utilities for seclave-approval integration tests.
//!
//! All tests use the in-memory stores for isolation and speed.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use seclave_approval::audit::InMemoryAuditStore;
use seclave_approval::grant::RecordingGrantIssuer;
use seclave_approval::identity::InMemoryIdentityResolver;
use seclave_approval::policy::{ApprovalPolicy, CreatePolicyInput, InMemoryPolicyStore, PolicyStore};
use seclave_approval::request::{AccessApprovalRequest, InMemoryRequestLedger};
use seclave_approval::services::{CreateAccessRequestInput, RequestService, ReviewService};
use seclave_approval::types::{ActorContext, PolicyScope};

/// All the in-memory stores for test isolation.
#[derive(Clone)]
pub struct TestStores {
    pub policy_store: Arc<InMemoryPolicyStore>,
    pub ledger: Arc<InMemoryRequestLedger>,
    pub identity: Arc<InMemoryIdentityResolver>,
    pub issuer: Arc<RecordingGrantIssuer>,
    pub audit_store: Arc<InMemoryAuditStore>,
}

impl TestStores {
    /// Create a new set of isolated test stores.
    pub fn new() -> Self {
        Self {
            policy_store: Arc::new(InMemoryPolicyStore::new()),
            ledger: Arc::new(InMemoryRequestLedger::new()),
            identity: Arc::new(InMemoryIdentityResolver::new()),
            issuer: Arc::new(RecordingGrantIssuer::new()),
            audit_store: Arc::new(InMemoryAuditStore::new()),
        }
    }
}

/// The approval services backed by the test stores.
pub struct TestServices {
    pub requests: RequestService,
    pub reviews: Arc<ReviewService>,
}

impl TestServices {
    /// Create services backed by the provided stores.
    pub fn new(stores: &TestStores) -> Self {
        Self {
            requests: RequestService::new(
                stores.policy_store.clone(),
                stores.ledger.clone(),
                stores.identity.clone(),
                stores.audit_store.clone(),
            ),
            reviews: Arc::new(ReviewService::new(
                stores.policy_store.clone(),
                stores.ledger.clone(),
                stores.identity.clone(),
                stores.issuer.clone(),
                stores.audit_store.clone(),
            )),
        }
    }
}

/// Test context containing stores, services, and test data.
pub struct TestContext {
    pub stores: TestStores,
    pub services: TestServices,
    pub project_id: Uuid,
    pub org_id: Uuid,
}

impl TestContext {
    /// Create a new isolated test context.
    pub fn new() -> Self {
        let stores = TestStores::new();
        let services = TestServices::new(&stores);
        Self {
            stores,
            services,
            project_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
        }
    }

    /// Register a user and return its ID.
    pub async fn user(&self, username: &str) -> Uuid {
        self.stores.identity.add_user(username).await
    }

    /// Actor context for a registered user.
    pub fn actor(&self, user_id: Uuid) -> ActorContext {
        ActorContext::user(user_id, self.org_id)
    }

    /// Environment-wide scope for `production` in the test project.
    pub fn production_scope(&self) -> PolicyScope {
        PolicyScope::environment(self.project_id, "production")
    }

    /// Insert a flat production policy.
    pub async fn flat_policy(
        &self,
        approver_user_ids: Vec<Uuid>,
        approvals_required: i32,
    ) -> ApprovalPolicy {
        self.stores
            .policy_store
            .insert(CreatePolicyInput::flat(
                self.project_id,
                "production",
                approver_user_ids,
                approvals_required,
            ))
            .await
            .expect("Failed to create policy")
    }

    /// Insert a production policy from a full input, fixing the project.
    pub async fn policy(&self, mut input: CreatePolicyInput) -> ApprovalPolicy {
        input.project_id = self.project_id;
        self.stores
            .policy_store
            .insert(input)
            .await
            .expect("Failed to create policy")
    }

    /// A permanent read request payload.
    pub fn permanent_input(&self) -> CreateAccessRequestInput {
        CreateAccessRequestInput {
            permissions: json!([{"action": "read", "secretPath": "/"}]),
            is_temporary: false,
            temporary_range: None,
            note: None,
        }
    }

    /// Create a permanent request in the production scope.
    pub async fn permanent_request(&self, requester_id: Uuid) -> AccessApprovalRequest {
        self.services
            .requests
            .create_request(
                &self.actor(requester_id),
                &self.production_scope(),
                self.permanent_input(),
            )
            .await
            .expect("Failed to create request")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
