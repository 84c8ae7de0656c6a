/// Credential and role storage for identity service
///
/// Expected identity-provider rejections (duplicate email, password policy,
/// missing role) come back as result error lists. Only infrastructure faults
/// are returned as [`StoreError`].
use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Account, NewAccount, Role, RoleAssignmentResult, UserCreationResult};

pub mod accounts;
pub mod memory;

pub use accounts::PgCredentialStore;
pub use memory::InMemoryCredentialStore;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create an account; the email is normalized and must be unique
    async fn create(&self, new_account: NewAccount) -> Result<UserCreationResult, StoreError>;

    /// Look up an account by (normalized) email
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Add `account` to `role`
    async fn assign_role(
        &self,
        account: &Account,
        role: Role,
    ) -> Result<RoleAssignmentResult, StoreError>;
}

/// Error text reported for an email that is already registered
pub fn duplicate_email_error(email: &str) -> String {
    format!("Email '{}' is already taken.", email)
}

pub fn missing_role_error(role: Role) -> String {
    format!("Role '{}' does not exist.", role)
}

pub fn already_in_role_error(role: Role) -> String {
    format!("User already in role '{}'.", role)
}
