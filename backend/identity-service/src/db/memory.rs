/// In-process credential store used when no database is configured and in tests
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{already_in_role_error, duplicate_email_error, missing_role_error, CredentialStore};
use crate::error::StoreError;
use crate::models::{Account, NewAccount, Role, RoleAssignmentResult, UserCreationResult};
use crate::security::password::hash_password;
use crate::validators::{normalize_email, password_policy_errors};

struct StoredAccount {
    account: Account,
    password_hash: String,
    roles: HashSet<Role>,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, StoredAccount>,
    ids_by_email: HashMap<String, Uuid>,
}

pub struct InMemoryCredentialStore {
    state: RwLock<MemoryState>,
    provisioned_roles: HashSet<Role>,
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCredentialStore {
    /// Store with every known role provisioned
    pub fn new() -> Self {
        Self::with_roles(Role::ALL)
    }

    /// Store with only `roles` provisioned; assigning any other role fails
    pub fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            provisioned_roles: roles.into_iter().collect(),
        }
    }

    pub async fn account_count(&self) -> usize {
        self.state.read().await.accounts.len()
    }

    /// PHC string stored for the account
    pub async fn password_hash_of(&self, account_id: Uuid) -> Option<String> {
        let state = self.state.read().await;
        state
            .accounts
            .get(&account_id)
            .map(|stored| stored.password_hash.clone())
    }

    pub async fn roles_of(&self, account_id: Uuid) -> Vec<Role> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state
            .accounts
            .get(&account_id)
            .map(|stored| stored.roles.iter().copied().collect())
            .unwrap_or_default();
        roles.sort_by_key(|role| role.as_str());
        roles
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create(&self, new_account: NewAccount) -> Result<UserCreationResult, StoreError> {
        let email = normalize_email(&new_account.email);

        let policy_errors = password_policy_errors(&new_account.password);
        if !policy_errors.is_empty() {
            return Ok(UserCreationResult::failed(policy_errors));
        }

        // Hash before taking the write lock
        let password_hash = hash_password(&new_account.password)?;

        let mut state = self.state.write().await;
        if state.ids_by_email.contains_key(&email) {
            return Ok(UserCreationResult::failed(vec![duplicate_email_error(
                &email,
            )]));
        }

        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            email: email.clone(),
            first_name: new_account.first_name,
            last_name: new_account.last_name,
            tenant_id: new_account.tenant_id,
            created_at: now,
            updated_at: now,
            concurrency_stamp: Uuid::new_v4(),
        };

        state.ids_by_email.insert(email, account.id);
        state.accounts.insert(
            account.id,
            StoredAccount {
                account: account.clone(),
                password_hash,
                roles: HashSet::new(),
            },
        );

        Ok(UserCreationResult::success(account))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let email = normalize_email(email);
        let state = self.state.read().await;

        Ok(state
            .ids_by_email
            .get(&email)
            .and_then(|id| state.accounts.get(id))
            .map(|stored| stored.account.clone()))
    }

    async fn assign_role(
        &self,
        account: &Account,
        role: Role,
    ) -> Result<RoleAssignmentResult, StoreError> {
        if !self.provisioned_roles.contains(&role) {
            return Ok(RoleAssignmentResult::failed(vec![missing_role_error(role)]));
        }

        let mut state = self.state.write().await;
        let Some(stored) = state.accounts.get_mut(&account.id) else {
            return Ok(RoleAssignmentResult::failed(vec![format!(
                "Account '{}' not found.",
                account.id
            )]));
        };

        if !stored.roles.insert(role) {
            return Ok(RoleAssignmentResult::failed(vec![already_in_role_error(
                role,
            )]));
        }

        stored.account.updated_at = Utc::now();
        stored.account.concurrency_stamp = Uuid::new_v4();

        Ok(RoleAssignmentResult::success())
    }
}
