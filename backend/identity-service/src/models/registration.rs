use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::Account;
use crate::error::{RegistrationError, RegistrationErrorKind};

/// Self-registration request as received from the API layer
#[derive(Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[validate(email(message = "Email address is not valid."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "First name is required."))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required."))]
    pub last_name: String,
    pub role: String,
    /// Never trusted: tenant-owning roles get a server-generated id and
    /// every other role is stored without one
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("role", &self.role)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Uniform terminal output of a registration attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub success: bool,
    pub message: String,
    pub account_id: Option<Uuid>,
    pub token: Option<String>,
    pub tenant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RegistrationErrorKind>,
}

impl RegistrationResponse {
    pub fn succeeded(account_id: Uuid, token: String, tenant_id: Option<Uuid>) -> Self {
        Self {
            success: true,
            message: "Registration successful.".to_string(),
            account_id: Some(account_id),
            token: Some(token),
            tenant_id,
            error_kind: None,
        }
    }

    /// Failure responses never carry an account id, token or tenant id
    pub fn failed(err: &RegistrationError) -> Self {
        Self {
            success: false,
            message: err.user_message(),
            account_id: None,
            token: None,
            tenant_id: None,
            error_kind: Some(err.kind()),
        }
    }
}

/// Outcome of a credential store create call
#[derive(Debug, Clone)]
pub struct UserCreationResult {
    pub succeeded: bool,
    pub account: Option<Account>,
    pub errors: Vec<String>,
}

impl UserCreationResult {
    pub fn success(account: Account) -> Self {
        Self {
            succeeded: true,
            account: Some(account),
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            succeeded: false,
            account: None,
            errors,
        }
    }
}

/// Outcome of a credential store role assignment
#[derive(Debug, Clone)]
pub struct RoleAssignmentResult {
    pub succeeded: bool,
    pub errors: Vec<String>,
}

impl RoleAssignmentResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            succeeded: false,
            errors,
        }
    }
}

/// Outcome of request validation, errors in reporting order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// Rejected because the email is already registered
    pub conflict: bool,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            conflict: false,
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            conflict: false,
        }
    }

    pub fn duplicate_email(email: &str) -> Self {
        Self {
            is_valid: false,
            errors: vec![RegistrationError::DuplicateEmail(email.to_string()).to_string()],
            conflict: true,
        }
    }

    pub fn message(&self) -> String {
        self.errors.join(" ")
    }

    /// Map a rejection onto the registration error it stands for
    pub fn into_result(self, email: &str) -> Result<(), RegistrationError> {
        match (self.is_valid, self.conflict) {
            (true, _) => Ok(()),
            (false, true) => Err(RegistrationError::DuplicateEmail(email.to_string())),
            (false, false) => Err(RegistrationError::Validation(self.message())),
        }
    }
}
