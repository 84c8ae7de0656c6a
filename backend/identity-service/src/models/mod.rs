/// Data models for registration and accounts
pub mod account;
pub mod registration;
pub mod role;

pub use account::{Account, NewAccount};
pub use registration::{
    RegistrationRequest, RegistrationResponse, RoleAssignmentResult, UserCreationResult,
    ValidationResult,
};
pub use role::Role;
