use axum::http::StatusCode;
use thiserror::Error;

use crate::models::Role;

pub type Result<T> = std::result::Result<T, RegistrationError>;

/// Message returned to callers for faults that must not leak details
pub const GENERIC_FAILURE_MESSAGE: &str =
    "An unexpected error occurred while processing the registration.";

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{0}")]
    Validation(String),

    #[error("User with email '{0}' already exists.")]
    DuplicateEmail(String),

    #[error("Invalid role for {0} registration strategy.")]
    RoleMismatch(Role),

    #[error("Role '{0}' cannot be registered through self-registration; it is provisioned at startup.")]
    UnsupportedRole(Role),

    #[error("Unknown role '{0}'.")]
    UnknownRole(String),

    #[error("{}", .0.join(", "))]
    AccountCreation(Vec<String>),

    #[error("{}", .0.join(", "))]
    RoleAssignment(Vec<String>),

    #[error("Token issuance failed: {0}")]
    Token(String),

    #[error("Credential store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Stable discriminant carried on responses so callers can tell failures apart
/// without parsing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationErrorKind {
    Validation,
    DuplicateEmail,
    RoleMismatch,
    UnsupportedRole,
    UnknownRole,
    AccountCreation,
    RoleAssignment,
    Internal,
}

impl RegistrationError {
    pub fn kind(&self) -> RegistrationErrorKind {
        match self {
            RegistrationError::Validation(_) => RegistrationErrorKind::Validation,
            RegistrationError::DuplicateEmail(_) => RegistrationErrorKind::DuplicateEmail,
            RegistrationError::RoleMismatch(_) => RegistrationErrorKind::RoleMismatch,
            RegistrationError::UnsupportedRole(_) => RegistrationErrorKind::UnsupportedRole,
            RegistrationError::UnknownRole(_) => RegistrationErrorKind::UnknownRole,
            RegistrationError::AccountCreation(_) => RegistrationErrorKind::AccountCreation,
            RegistrationError::RoleAssignment(_) => RegistrationErrorKind::RoleAssignment,
            RegistrationError::Token(_)
            | RegistrationError::Store(_)
            | RegistrationError::Internal(_) => RegistrationErrorKind::Internal,
        }
    }

    /// Expected business failures are reported verbatim; faults are not
    pub fn is_expected(&self) -> bool {
        self.kind() != RegistrationErrorKind::Internal
    }

    /// Message safe to hand back to the caller
    pub fn user_message(&self) -> String {
        if self.is_expected() {
            self.to_string()
        } else {
            // Don't leak internal details
            GENERIC_FAILURE_MESSAGE.to_string()
        }
    }
}

impl RegistrationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationErrorKind::Validation => "validation",
            RegistrationErrorKind::DuplicateEmail => "duplicate_email",
            RegistrationErrorKind::RoleMismatch => "role_mismatch",
            RegistrationErrorKind::UnsupportedRole => "unsupported_role",
            RegistrationErrorKind::UnknownRole => "unknown_role",
            RegistrationErrorKind::AccountCreation => "account_creation",
            RegistrationErrorKind::RoleAssignment => "role_assignment",
            RegistrationErrorKind::Internal => "internal",
        }
    }

    /// Convert to HTTP status for the REST surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistrationErrorKind::Validation
            | RegistrationErrorKind::RoleMismatch
            | RegistrationErrorKind::UnknownRole => StatusCode::BAD_REQUEST,
            RegistrationErrorKind::DuplicateEmail => StatusCode::CONFLICT,
            RegistrationErrorKind::UnsupportedRole
            | RegistrationErrorKind::AccountCreation
            | RegistrationErrorKind::RoleAssignment => StatusCode::UNPROCESSABLE_ENTITY,
            RegistrationErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Infrastructure faults raised by a credential store.
///
/// Expected identity-provider rejections (password policy, duplicate email,
/// missing role) are reported through result error lists instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);
        StoreError::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for RegistrationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::error!("JWT error: {}", err);
        RegistrationError::Token(err.to_string())
    }
}

/// Failures raised by a broker transport
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Connection already closed: {0}")]
    ConnectionClosed(String),

    #[error("Channel already closed: {0}")]
    ChannelClosed(String),

    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Broker authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("TLS negotiation rejected: {0}")]
    TlsRejected(String),

    #[error("Topology recovery failed: {0}")]
    TopologyRecovery(String),

    #[error("Invalid broker configuration: {0}")]
    Configuration(String),

    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Worth another attempt after backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable(_)
                | BrokerError::ConnectionClosed(_)
                | BrokerError::ChannelClosed(_)
                | BrokerError::Interrupted(_)
                | BrokerError::PublishFailed(_)
        )
    }

    /// Retrying cannot succeed until configuration or credentials change
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::AuthenticationFailed(_)
                | BrokerError::TlsRejected(_)
                | BrokerError::Configuration(_)
        )
    }

    /// The cached connection must not be reused after this error
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable(_)
                | BrokerError::ConnectionClosed(_)
                | BrokerError::AuthenticationFailed(_)
                | BrokerError::TlsRejected(_)
        )
    }
}

/// Outcome of a failed integration event publish
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize integration event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Non-recoverable broker failure: {0}")]
    Fatal(BrokerError),

    #[error("Broker publish failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    #[error("Publish cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("Unexpected broker failure: {0}")]
    Unexpected(BrokerError),
}

impl PublishError {
    /// Label used for the publish outcome metric
    pub fn outcome(&self) -> &'static str {
        match self {
            PublishError::Serialization(_) | PublishError::Unexpected(_) => "unexpected",
            PublishError::Fatal(_) => "fatal",
            PublishError::RetriesExhausted { .. } => "transient_exhausted",
            PublishError::Cancelled { .. } => "cancelled",
        }
    }
}
