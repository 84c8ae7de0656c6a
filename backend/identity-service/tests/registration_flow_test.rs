mod common;

use async_trait::async_trait;
use common::{request, request_with_tenant, token_issuer, ScriptedConnector};
use event_schema::AccountRegisteredEvent;
use identity_service::db::{CredentialStore, InMemoryCredentialStore};
use identity_service::error::{BrokerError, PublishError, RegistrationErrorKind, StoreError};
use identity_service::models::{
    Account, NewAccount, RegistrationResponse, Role, RoleAssignmentResult, UserCreationResult,
};
use identity_service::registration::{
    RegistrationContext, RegistrationCoordinator, StoreBackedValidator, StrategySelector,
};
use identity_service::services::{DeliveryStatus, EventPublisher, IntegrationEventPublisher};
use mockall::mock;
use resilience::presets;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mock! {
    pub Store {}

    #[async_trait]
    impl CredentialStore for Store {
        async fn create(&self, new_account: NewAccount) -> Result<UserCreationResult, StoreError>;
        async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
        async fn assign_role(&self, account: &Account, role: Role) -> Result<RoleAssignmentResult, StoreError>;
    }
}

mock! {
    pub Publisher {}

    #[async_trait]
    impl EventPublisher for Publisher {
        async fn publish_account_registered(
            &self,
            event: &AccountRegisteredEvent,
            cancel: &CancellationToken,
        ) -> Result<DeliveryStatus, PublishError>;
        async fn shutdown(&self);
    }
}

fn coordinator(
    store: Arc<dyn CredentialStore>,
    publisher: Arc<dyn EventPublisher>,
) -> RegistrationCoordinator {
    let context = RegistrationContext {
        validator: Arc::new(StoreBackedValidator::new(Arc::clone(&store))),
        store,
        tokens: Arc::new(token_issuer()),
        publisher,
    };
    RegistrationCoordinator::new(StrategySelector::new(context))
}

fn scripted_publisher(
    connector: &ScriptedConnector,
) -> Arc<IntegrationEventPublisher<ScriptedConnector>> {
    let preset = presets::broker_publish_config();
    Arc::new(IntegrationEventPublisher::new(
        connector.clone(),
        preset.retry.unwrap(),
        preset.timeout.duration,
    ))
}

fn account(email: &str, tenant_id: Option<Uuid>) -> Account {
    let now = chrono::Utc::now();
    Account {
        id: Uuid::new_v4(),
        email: email.to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        tenant_id,
        created_at: now,
        updated_at: now,
        concurrency_stamp: Uuid::new_v4(),
    }
}

fn assert_failure_is_bare(response: &RegistrationResponse) {
    assert!(!response.success);
    assert!(response.account_id.is_none());
    assert!(response.token.is_none());
    assert!(response.tenant_id.is_none());
}

#[tokio::test]
async fn test_customer_then_duplicate() {
    let connector = ScriptedConnector::new();
    let coordinator = coordinator(
        Arc::new(InMemoryCredentialStore::new()),
        scripted_publisher(&connector),
    );
    let cancel = CancellationToken::new();

    let first = coordinator
        .register_user(request("a@x.com", "Customer"), &cancel)
        .await;
    assert!(first.success, "{}", first.message);
    assert!(first.tenant_id.is_none());
    assert!(first.account_id.is_some());

    let second = coordinator
        .register_user(request("a@x.com", "Customer"), &cancel)
        .await;
    assert_failure_is_bare(&second);
    assert!(second.message.contains("already exists"));
    assert_eq!(second.error_kind, Some(RegistrationErrorKind::DuplicateEmail));

    assert_eq!(connector.delivered().await, 1);
}

#[tokio::test]
async fn test_seller_admins_get_distinct_tenants() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let connector = ScriptedConnector::new();
    let coordinator = coordinator(store.clone(), scripted_publisher(&connector));
    let cancel = CancellationToken::new();
    let forged = Uuid::new_v4();

    let mut tenants = HashSet::new();
    for email in ["b@x.com", "c@x.com", "d@x.com"] {
        let response = coordinator
            .register_user(request_with_tenant(email, "SellerAdmin", forged), &cancel)
            .await;
        assert!(response.success, "{}", response.message);

        let tenant_id = response.tenant_id.unwrap();
        assert!(!tenant_id.is_nil());
        assert_ne!(tenant_id, forged);
        assert!(tenants.insert(tenant_id));

        let stored = store.find_by_email(email).await.unwrap().unwrap();
        assert_eq!(stored.tenant_id, Some(tenant_id));
    }

    let events = connector.broker().messages("account-registered").await;
    let tenant_ids: HashSet<Uuid> = events
        .iter()
        .map(|m| serde_json::from_slice::<AccountRegisteredEvent>(&m.payload).unwrap())
        .filter_map(|e| e.tenant_id)
        .collect();
    assert_eq!(tenant_ids, tenants);
}

#[tokio::test]
async fn test_customer_tenant_is_forced_absent() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let coordinator = coordinator(
        store.clone(),
        scripted_publisher(&ScriptedConnector::new()),
    );

    let response = coordinator
        .register_user(
            request_with_tenant("e@x.com", "Customer", Uuid::new_v4()),
            &CancellationToken::new(),
        )
        .await;

    assert!(response.success);
    assert!(response.tenant_id.is_none());
    let stored = store.find_by_email("e@x.com").await.unwrap().unwrap();
    assert!(stored.tenant_id.is_none());
}

#[tokio::test]
async fn test_duplicate_email_touches_nothing() {
    let mut store = MockStore::new();
    store
        .expect_find_by_email()
        .returning(|email| Ok(Some(account(email, None))));
    store.expect_create().times(0);
    store.expect_assign_role().times(0);

    let mut publisher = MockPublisher::new();
    publisher.expect_publish_account_registered().times(0);

    let coordinator = coordinator(Arc::new(store), Arc::new(publisher));
    let response = coordinator
        .register_user(request("taken@x.com", "Customer"), &CancellationToken::new())
        .await;

    assert_failure_is_bare(&response);
    assert_eq!(
        response.message,
        "User with email 'taken@x.com' already exists."
    );
}

#[tokio::test]
async fn test_token_claims() {
    let connector = ScriptedConnector::new();
    let coordinator = coordinator(
        Arc::new(InMemoryCredentialStore::new()),
        scripted_publisher(&connector),
    );
    let issuer = token_issuer();
    let cancel = CancellationToken::new();

    let customer = coordinator
        .register_user(request("f@x.com", "Customer"), &cancel)
        .await;
    let claims = assert_ok!(issuer.validate(customer.token.as_deref().unwrap())).claims;
    assert_eq!(claims.sub, customer.account_id.unwrap().to_string());
    assert_eq!(claims.email, "f@x.com");
    assert_eq!(claims.role, "Customer");
    assert!(!claims.jti.is_empty());
    assert!(claims.tenant_id.is_none());

    let seller = coordinator
        .register_user(request("g@x.com", "SellerAdmin"), &cancel)
        .await;
    let seller_claims = assert_ok!(issuer.validate(seller.token.as_deref().unwrap())).claims;
    assert_eq!(seller_claims.role, "SellerAdmin");
    assert_eq!(
        seller_claims.tenant_id,
        seller.tenant_id.map(|id| id.to_string())
    );
    assert_ne!(seller_claims.jti, claims.jti);
}

#[tokio::test]
async fn test_role_assignment_failure_is_reported_verbatim() {
    let mut store = MockStore::new();
    store.expect_find_by_email().returning(|_| Ok(None));
    store
        .expect_create()
        .times(1)
        .returning(|new_account| Ok(UserCreationResult::success(account(&new_account.email, None))));
    store.expect_assign_role().times(1).returning(|_, _| {
        Ok(RoleAssignmentResult::failed(vec![
            "Role 'Customer' does not exist.".to_string(),
            "Role store is read-only.".to_string(),
        ]))
    });

    let mut publisher = MockPublisher::new();
    publisher.expect_publish_account_registered().times(0);

    let coordinator = coordinator(Arc::new(store), Arc::new(publisher));
    let response = coordinator
        .register_user(request("h@x.com", "Customer"), &CancellationToken::new())
        .await;

    assert_failure_is_bare(&response);
    assert_eq!(
        response.message,
        "Role 'Customer' does not exist., Role store is read-only."
    );
    assert_eq!(response.error_kind, Some(RegistrationErrorKind::RoleAssignment));
}

#[tokio::test]
async fn test_missing_role_in_store() {
    let coordinator = coordinator(
        Arc::new(InMemoryCredentialStore::with_roles([Role::Customer])),
        scripted_publisher(&ScriptedConnector::new()),
    );

    let response = coordinator
        .register_user(request("i@x.com", "SellerAdmin"), &CancellationToken::new())
        .await;

    assert_failure_is_bare(&response);
    assert_eq!(response.message, "Role 'SellerAdmin' does not exist.");
}

#[tokio::test(start_paused = true)]
async fn test_flaky_broker_does_not_affect_registration() {
    let connector = ScriptedConnector::new()
        .fail_publish(BrokerError::Unreachable("connection reset".to_string()))
        .fail_publish(BrokerError::ChannelClosed("channel closed".to_string()));
    let coordinator = coordinator(
        Arc::new(InMemoryCredentialStore::new()),
        scripted_publisher(&connector),
    );

    let response = coordinator
        .register_user(request("j@x.com", "Customer"), &CancellationToken::new())
        .await;

    assert!(response.success);
    assert_eq!(connector.publish_calls(), 3);
    assert_eq!(connector.delivered().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_broker_error_keeps_registration() {
    let connector = ScriptedConnector::new().fail_connect(BrokerError::AuthenticationFailed(
        "bad credentials".to_string(),
    ));
    let store = Arc::new(InMemoryCredentialStore::new());
    let coordinator = coordinator(store.clone(), scripted_publisher(&connector));

    let response = coordinator
        .register_user(request("k@x.com", "Customer"), &CancellationToken::new())
        .await;

    assert!(response.success);
    assert!(response.token.is_some());
    assert_eq!(connector.connect_calls(), 1);
    assert_eq!(store.account_count().await, 1);
}

#[tokio::test]
async fn test_unsupported_and_unknown_roles() {
    let coordinator = coordinator(
        Arc::new(InMemoryCredentialStore::new()),
        scripted_publisher(&ScriptedConnector::new()),
    );
    let cancel = CancellationToken::new();

    let admin = coordinator
        .register_user(request("root@x.com", "Admin"), &cancel)
        .await;
    assert_failure_is_bare(&admin);
    assert_eq!(admin.error_kind, Some(RegistrationErrorKind::UnsupportedRole));

    let wizard = coordinator
        .register_user(request("merlin@x.com", "Wizard"), &cancel)
        .await;
    assert_failure_is_bare(&wizard);
    assert_eq!(wizard.error_kind, Some(RegistrationErrorKind::UnknownRole));
    assert_ne!(admin.message, wizard.message);
}

#[tokio::test]
async fn test_store_fault_returns_generic_message() {
    let mut store = MockStore::new();
    store
        .expect_find_by_email()
        .returning(|_| Err(StoreError::Database("connection reset by peer".to_string())));

    let mut publisher = MockPublisher::new();
    publisher.expect_publish_account_registered().times(0);

    let coordinator = coordinator(Arc::new(store), Arc::new(publisher));
    let response = coordinator
        .register_user(request("l@x.com", "Customer"), &CancellationToken::new())
        .await;

    assert_failure_is_bare(&response);
    assert!(!response.message.contains("connection reset"));
    assert_eq!(response.error_kind, Some(RegistrationErrorKind::Internal));
}

#[tokio::test]
async fn test_concurrent_same_email_registers_once() {
    let coordinator = Arc::new(coordinator(
        Arc::new(InMemoryCredentialStore::new()),
        scripted_publisher(&ScriptedConnector::new()),
    ));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .register_user(request("race@x.com", "Customer"), &CancellationToken::new())
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().success {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}
