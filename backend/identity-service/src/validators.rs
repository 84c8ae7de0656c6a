use validator::ValidationErrors;

/// Input validation utilities for identity service

/// Minimum password length enforced by the credential stores
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Canonical form used for lookups and persistence
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Password composition policy, reported the way an identity provider does:
/// every violated rule, in a stable order
pub fn password_policy_errors(password: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "Passwords must be at least {} characters.",
            MIN_PASSWORD_LENGTH
        ));
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        errors.push("Passwords must have at least one non alphanumeric character.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Passwords must have at least one digit ('0'-'9').".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        errors.push("Passwords must have at least one lowercase ('a'-'z').".to_string());
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        errors.push("Passwords must have at least one uppercase ('A'-'Z').".to_string());
    }

    errors
}

/// Flatten `validator` output into human-readable messages, ordered by field
pub fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |err| {
                err.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid.", field))
            })
        })
        .collect()
}
