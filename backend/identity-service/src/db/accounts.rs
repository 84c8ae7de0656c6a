/// PostgreSQL credential store
///
/// Uniqueness of emails is enforced by `idx_accounts_email`; a violation is
/// reported as the same duplicate-email error list the existence check uses,
/// so concurrent registrations for one address cannot both succeed.
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{already_in_role_error, duplicate_email_error, missing_role_error, CredentialStore};
use crate::error::StoreError;
use crate::models::{Account, NewAccount, Role, RoleAssignmentResult, UserCreationResult};
use crate::security::password::hash_password;
use crate::validators::{normalize_email, password_policy_errors};

const UNIQUE_VIOLATION: &str = "23505";

const ACCOUNT_COLUMNS: &str =
    "id, email, first_name, last_name, tenant_id, created_at, updated_at, concurrency_stamp";

/// Find account by normalized email
pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Account>, StoreError> {
    let account = sqlx::query_as::<_, Account>(&format!(
        "SELECT {} FROM accounts WHERE email = $1",
        ACCOUNT_COLUMNS
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

/// Insert a new account. Returns `None` when the email is already taken.
pub async fn insert_account(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    first_name: &str,
    last_name: &str,
    tenant_id: Option<Uuid>,
) -> Result<Option<Account>, StoreError> {
    let now = Utc::now();

    let result = sqlx::query_as::<_, Account>(&format!(
        r#"
        INSERT INTO accounts (id, email, password_hash, first_name, last_name, tenant_id, created_at, updated_at, concurrency_stamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8)
        RETURNING {}
        "#,
        ACCOUNT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(first_name)
    .bind(last_name)
    .bind(tenant_id)
    .bind(now)
    .bind(Uuid::new_v4())
    .fetch_one(pool)
    .await;

    match result {
        Ok(account) => Ok(Some(account)),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Add an account to a role, refreshing its concurrency stamp
pub async fn add_to_role(
    pool: &PgPool,
    account_id: Uuid,
    role: Role,
) -> Result<RoleAssignmentResult, StoreError> {
    let mut tx = pool.begin().await?;

    let role_id: Option<i16> = sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
        .bind(role.as_str())
        .fetch_optional(&mut *tx)
        .await?;

    let Some(role_id) = role_id else {
        return Ok(RoleAssignmentResult::failed(vec![missing_role_error(role)]));
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO account_roles (account_id, role_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(role_id)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Ok(RoleAssignmentResult::failed(vec![already_in_role_error(
            role,
        )]));
    }

    sqlx::query(
        "UPDATE accounts SET updated_at = CURRENT_TIMESTAMP, concurrency_stamp = $2 WHERE id = $1",
    )
    .bind(account_id)
    .bind(Uuid::new_v4())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(RoleAssignmentResult::success())
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create(&self, new_account: NewAccount) -> Result<UserCreationResult, StoreError> {
        let email = normalize_email(&new_account.email);

        let policy_errors = password_policy_errors(&new_account.password);
        if !policy_errors.is_empty() {
            return Ok(UserCreationResult::failed(policy_errors));
        }

        let password_hash = hash_password(&new_account.password)?;

        let inserted = insert_account(
            &self.pool,
            &email,
            &password_hash,
            &new_account.first_name,
            &new_account.last_name,
            new_account.tenant_id,
        )
        .await?;

        Ok(match inserted {
            Some(account) => UserCreationResult::success(account),
            None => UserCreationResult::failed(vec![duplicate_email_error(&email)]),
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        find_by_email(&self.pool, &normalize_email(email)).await
    }

    async fn assign_role(
        &self,
        account: &Account,
        role: Role,
    ) -> Result<RoleAssignmentResult, StoreError> {
        add_to_role(&self.pool, account.id, role).await
    }
}
