use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RegistrationError;

/// Closed set of account roles known to the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Shopper account with no tenant of its own
    Customer,
    /// Owner of a seller tenant; the tenant is created with the account
    SellerAdmin,
    /// Platform administrator, seeded at startup only
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Customer, Role::SellerAdmin, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "Customer",
            Role::SellerAdmin => "SellerAdmin",
            Role::Admin => "Admin",
        }
    }

    /// Whether registering this role provisions a new tenant
    pub fn owns_tenant(&self) -> bool {
        matches!(self, Role::SellerAdmin)
    }

    /// Whether the public registration flow may create this role
    pub fn is_self_registrable(&self) -> bool {
        !matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RegistrationError;

    /// Case-insensitive; surrounding whitespace is ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| RegistrationError::UnknownRole(trimmed.to_string()))
    }
}
