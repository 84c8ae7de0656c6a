/// Role-specific registration strategies
///
/// Every strategy runs the same pipeline, short-circuiting on the first
/// failure: validate, check the role, apply the tenant policy, create the
/// account, assign the role, issue a token, publish `AccountRegistered`.
/// Publishing is best effort; once the account exists the registration
/// succeeds whatever the broker does.
use async_trait::async_trait;
use event_schema::AccountRegisteredEvent;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::validator::RequestValidator;
use crate::db::CredentialStore;
use crate::error::{PublishError, RegistrationError, Result};
use crate::metrics;
use crate::models::{NewAccount, RegistrationRequest, RegistrationResponse, Role};
use crate::security::TokenIssuer;
use crate::services::EventPublisher;

#[async_trait]
pub trait RegistrationStrategy: Send + Sync {
    fn role(&self) -> Role;

    /// Never fails; business and unexpected failures become failure responses
    async fn register(
        &self,
        request: RegistrationRequest,
        cancel: &CancellationToken,
    ) -> RegistrationResponse;
}

/// Collaborators shared by every strategy
#[derive(Clone)]
pub struct RegistrationContext {
    pub validator: Arc<dyn RequestValidator>,
    pub store: Arc<dyn CredentialStore>,
    pub tokens: Arc<TokenIssuer>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub struct CustomerRegistrationStrategy {
    context: RegistrationContext,
}

impl CustomerRegistrationStrategy {
    pub fn new(context: RegistrationContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl RegistrationStrategy for CustomerRegistrationStrategy {
    fn role(&self) -> Role {
        Role::Customer
    }

    async fn register(
        &self,
        request: RegistrationRequest,
        cancel: &CancellationToken,
    ) -> RegistrationResponse {
        register_as(&self.context, self.role(), request, cancel).await
    }
}

pub struct SellerAdminRegistrationStrategy {
    context: RegistrationContext,
}

impl SellerAdminRegistrationStrategy {
    pub fn new(context: RegistrationContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl RegistrationStrategy for SellerAdminRegistrationStrategy {
    fn role(&self) -> Role {
        Role::SellerAdmin
    }

    async fn register(
        &self,
        request: RegistrationRequest,
        cancel: &CancellationToken,
    ) -> RegistrationResponse {
        register_as(&self.context, self.role(), request, cancel).await
    }
}

/// Outermost boundary: convert every error into a response
async fn register_as(
    context: &RegistrationContext,
    role: Role,
    request: RegistrationRequest,
    cancel: &CancellationToken,
) -> RegistrationResponse {
    let email = request.email.clone();

    match run_pipeline(context, role, request, cancel).await {
        Ok(response) => {
            metrics::record_registration(role.as_str(), "success");
            response
        }
        Err(err) => {
            let kind = err.kind();
            if err.is_expected() {
                info!(
                    role = %role,
                    email = %email,
                    kind = kind.as_str(),
                    reason = %err,
                    "Registration rejected"
                );
            } else {
                error!(
                    role = %role,
                    email = %email,
                    kind = kind.as_str(),
                    error = %err,
                    "Registration failed unexpectedly"
                );
            }
            metrics::record_registration(role.as_str(), kind.as_str());
            RegistrationResponse::failed(&err)
        }
    }
}

async fn run_pipeline(
    context: &RegistrationContext,
    role: Role,
    request: RegistrationRequest,
    cancel: &CancellationToken,
) -> Result<RegistrationResponse> {
    context
        .validator
        .validate(&request)
        .await?
        .into_result(&request.email)?;

    let requested: Role = request
        .role
        .parse()
        .map_err(|_| RegistrationError::RoleMismatch(role))?;
    if requested != role {
        return Err(RegistrationError::RoleMismatch(role));
    }

    // Tenant ids are generated here, never taken from the client
    let tenant_id = role.owns_tenant().then(Uuid::new_v4);
    if request.tenant_id.is_some() {
        debug!(role = %role, "Ignoring client-supplied tenant id");
    }

    if cancel.is_cancelled() {
        return Err(RegistrationError::Internal(
            "registration cancelled before account creation".to_string(),
        ));
    }

    let creation = context
        .store
        .create(NewAccount {
            email: request.email,
            password: request.password,
            first_name: request.first_name,
            last_name: request.last_name,
            tenant_id,
        })
        .await?;
    if !creation.succeeded {
        return Err(RegistrationError::AccountCreation(creation.errors));
    }
    let account = creation.account.ok_or_else(|| {
        RegistrationError::Internal("store reported success without an account".to_string())
    })?;

    let assignment = context.store.assign_role(&account, role).await?;
    if !assignment.succeeded {
        warn!(
            account_id = %account.id,
            role = %role,
            "Account created but role assignment failed"
        );
        return Err(RegistrationError::RoleAssignment(assignment.errors));
    }

    let token = context.tokens.generate_token(&account, role)?;

    let event = AccountRegisteredEvent::new(
        account.id,
        account.email.as_str(),
        role.as_str(),
        account.tenant_id,
    );
    match context
        .publisher
        .publish_account_registered(&event, cancel)
        .await
    {
        Ok(_) => {}
        Err(err @ PublishError::Fatal(_)) => error!(
            fatal = true,
            account_id = %account.id,
            error = %err,
            "AccountRegistered not published; registration kept"
        ),
        Err(err) => warn!(
            account_id = %account.id,
            outcome = err.outcome(),
            error = %err,
            "AccountRegistered not published; registration kept"
        ),
    }

    info!(
        account_id = %account.id,
        role = %role,
        tenant_id = ?account.tenant_id,
        "Account registered"
    );

    Ok(RegistrationResponse::succeeded(
        account.id,
        token,
        account.tenant_id,
    ))
}
