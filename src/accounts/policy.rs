//! Password strength rules applied to self-service registration and password
//! changes. Account creation itself accepts any password.

use super::{email::local_part, error::AccountError};

pub const MIN_PASSWORD_LEN: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password123", "passw0rd", "12345678", "123456789",
    "1234567890", "qwerty123", "qwertyuiop", "iloveyou", "sunshine", "princess",
    "football", "baseball", "welcome1", "letmein1", "admin123", "abc12345",
    "11111111", "00000000", "asdfghjkl", "1q2w3e4r", "q1w2e3r4", "zxcvbnm1",
];

/// Attributes the password must not resemble.
#[derive(Debug, Default)]
pub struct PolicyContext<'a> {
    pub email: &'a str,
    pub name: &'a str,
}

pub fn validate_password(password: &str, ctx: &PolicyContext<'_>) -> Result<(), AccountError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(AccountError::validation("password is entirely numeric"));
    }
    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        return Err(AccountError::validation("password is too common"));
    }
    let attrs = [local_part(ctx.email), ctx.name];
    if attrs.iter().any(|attr| too_similar(&lowered, attr)) {
        return Err(AccountError::validation(
            "password is too similar to the account details",
        ));
    }
    Ok(())
}

fn too_similar(password: &str, attr: &str) -> bool {
    let attr = attr.trim().to_lowercase();
    if attr.chars().count() < 3 {
        return false;
    }
    password.contains(&attr) || attr.contains(password)
}
