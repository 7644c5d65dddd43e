//! Local input validation for registration, plus the password strength
//! score the host renders as a meter.
//!
//! Validation runs before any store round-trip and short-circuits on the
//! first failing rule, in a fixed order: username length, username
//! charset, password length, confirmation match.

use thiserror::Error;

/// Minimum username length (after normalization).
pub const MIN_USERNAME_LEN: usize = 3;

/// Minimum password length for new accounts.
pub const MIN_PASSWORD_LEN: usize = 8;

/// A registration field failed a local shape check.
///
/// These are field-specific by design — the user is establishing a new
/// identity, so enumeration concerns do not apply the way they do at
/// login.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Username must be at least {MIN_USERNAME_LEN} characters.")]
    UsernameTooShort,
    #[error("Use letters, numbers, and underscores only.")]
    UsernameCharset,
    #[error("Password must be at least {MIN_PASSWORD_LEN} characters.")]
    PasswordTooShort,
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Enter both username and password.")]
    EmptyCredentials,
}

/// Validate registration input. `username` must already be normalized.
pub fn validate_registration(
    username: &str,
    password: &str,
    confirm: &str,
) -> Result<(), ValidationError> {
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(ValidationError::UsernameTooShort);
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ValidationError::UsernameCharset);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

/// Password strength score, 0–100.
///
/// Length contributes up to 40 points (6 per character), each character
/// class (upper, lower, digit, symbol) adds 15, and 12+ characters add a
/// final 10.
pub fn password_strength(password: &str) -> u8 {
    if password.is_empty() {
        return 0;
    }
    let length = password.chars().count();
    let mut score = (length * 6).min(40);
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        score += 15;
    }
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        score += 15;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        score += 15;
    }
    if password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace() && c != '_')
    {
        score += 15;
    }
    if length >= 12 {
        score += 10;
    }
    score.min(100) as u8
}
