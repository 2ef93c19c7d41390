// Client-side signup validation

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::SignupForm;
use crate::error::{Result, SessionError};

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 6;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Check a signup form before anything is sent.
///
/// The first failing check wins. A confirmation mismatch is reported ahead of
/// the length rule.
pub fn validate_signup(form: &SignupForm) -> Result<()> {
    if form.first_name.trim().is_empty() || form.last_name.trim().is_empty() {
        return Err(invalid("Please enter your full name."));
    }
    if !is_valid_email(form.email.trim()) {
        return Err(invalid("Please enter a valid email address."));
    }
    if form.password != form.confirm_password {
        return Err(invalid("Passwords do not match."));
    }
    if form.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(invalid("Password must be at least 6 characters long."));
    }
    Ok(())
}

/// Loose `local@domain.tld` shape check
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

fn invalid(message: &str) -> SessionError {
    SessionError::Validation(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> SignupForm {
        SignupForm {
            first_name: "Jo".to_string(),
            last_name: "Doe".to_string(),
            email: "jo@example.edu".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        }
    }

    fn message(form: &SignupForm) -> String {
        validate_signup(form).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_form_passes() {
        assert!(validate_signup(&form()).is_ok());
    }

    #[test]
    fn test_missing_names() {
        let mut f = form();
        f.last_name = "   ".to_string();
        assert_eq!(message(&f), "Please enter your full name.");
    }

    #[test]
    fn test_bad_email() {
        for email in ["", "jo", "jo@example", "jo @example.edu", "@example.edu"] {
            let mut f = form();
            f.email = email.to_string();
            assert_eq!(message(&f), "Please enter a valid email address.", "{email}");
        }
    }

    #[test]
    fn test_short_password() {
        let mut f = form();
        f.password = "abc".to_string();
        f.confirm_password = "abc".to_string();
        assert_eq!(message(&f), "Password must be at least 6 characters long.");
    }

    #[test]
    fn test_password_mismatch() {
        let mut f = form();
        f.confirm_password = "secret2".to_string();
        assert_eq!(message(&f), "Passwords do not match.");
    }

    #[test]
    fn test_mismatch_reported_before_length() {
        let mut f = form();
        f.password = "abc".to_string();
        f.confirm_password = "xyz".to_string();
        assert_eq!(message(&f), "Passwords do not match.");
    }

    #[test]
    fn test_email_shapes() {
        assert!(is_valid_email("student@example.com"));
        assert!(is_valid_email("a.b+c@campus.example.edu"));
        assert!(!is_valid_email("student@@example.com"));
    }
}
