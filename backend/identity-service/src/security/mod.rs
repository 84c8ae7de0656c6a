/// Security primitives for identity-service
///
/// - **password**: Argon2id password hashing
/// - **token**: role-aware JWT issuance and validation
pub mod password;
pub mod token;

pub use jsonwebtoken::TokenData;
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenIssuer};
