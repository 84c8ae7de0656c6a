use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account model - persisted identity without credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    /// Normalized (trimmed, lowercased) and unique
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Present iff the account's role owns a tenant
    pub tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, regenerated on every write
    pub concurrency_stamp: Uuid,
}

/// Input to a credential store's create operation.
///
/// The password is plaintext and only lives long enough to be hashed.
#[derive(Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub tenant_id: Option<Uuid>,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}
