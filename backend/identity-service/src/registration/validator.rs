use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

use crate::db::CredentialStore;
use crate::error::StoreError;
use crate::models::{RegistrationRequest, ValidationResult};
use crate::validators::validation_messages;

#[async_trait]
pub trait RequestValidator: Send + Sync {
    /// Check shape and uniqueness. Performs no writes.
    async fn validate(&self, request: &RegistrationRequest)
        -> Result<ValidationResult, StoreError>;
}

/// Field rules from the request type, then an existence check against the store
pub struct StoreBackedValidator {
    store: Arc<dyn CredentialStore>,
}

impl StoreBackedValidator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestValidator for StoreBackedValidator {
    async fn validate(
        &self,
        request: &RegistrationRequest,
    ) -> Result<ValidationResult, StoreError> {
        if let Err(errors) = request.validate() {
            return Ok(ValidationResult::invalid(validation_messages(&errors)));
        }

        if self.store.find_by_email(&request.email).await?.is_some() {
            debug!(email = %request.email, "Registration rejected, email already registered");
            return Ok(ValidationResult::duplicate_email(&request.email));
        }

        Ok(ValidationResult::valid())
    }
}
