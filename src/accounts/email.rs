use lazy_static::lazy_static;
use regex::Regex;

use super::error::AccountError;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Canonical form of an email used for storage and lookups.
///
/// Surrounding whitespace is trimmed and the whole address is lower-cased, so
/// `Student@Example.com` and `student@example.com` name the same account.
pub fn normalize_email(raw: &str) -> Result<String, AccountError> {
    let email = raw.trim();
    if email.is_empty() {
        return Err(AccountError::validation("email is required"));
    }
    let email = email.to_lowercase();
    if !is_valid_email(&email) {
        return Err(AccountError::validation("email is malformed"));
    }
    Ok(email)
}

/// Local part of an already-normalized address.
pub(crate) fn local_part(email: &str) -> &str {
    email.rsplit_once('@').map(|(local, _)| local).unwrap_or(email)
}
