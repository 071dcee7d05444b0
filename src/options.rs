//! Policy knobs consumed by the managers and the built-in validators.
//!
//! Options are read-mostly configuration: established when a manager is
//! constructed and never mutated afterwards.

use chrono::Duration;

/// Characters permitted in user names when no override is configured.
pub const DEFAULT_ALLOWED_USER_NAME_CHARACTERS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-._@+";

/// Aggregated identity policy.
#[derive(Debug, Clone)]
pub struct IdentityOptions {
    pub user: UserOptions,
    pub password: PasswordOptions,
    pub lockout: LockoutOptions,
}

impl Default for IdentityOptions {
    fn default() -> Self {
        Self {
            user: UserOptions::default(),
            password: PasswordOptions::default(),
            lockout: LockoutOptions::default(),
        }
    }
}

/// User naming and email policy.
#[derive(Debug, Clone)]
pub struct UserOptions {
    /// The set of characters permitted in user names. `None` lifts the
    /// restriction entirely.
    pub allowed_user_name_characters: Option<String>,
    /// Require each user's normalized email to be unique across the store.
    pub require_unique_email: bool,
    /// Run the basic email-shape check against non-empty emails.
    pub validate_email_format: bool,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            allowed_user_name_characters: Some(DEFAULT_ALLOWED_USER_NAME_CHARACTERS.to_string()),
            require_unique_email: false,
            validate_email_format: true,
        }
    }
}

/// Password strength policy enforced by the default password validator.
#[derive(Debug, Clone)]
pub struct PasswordOptions {
    pub required_length: usize,
    pub require_non_letter_or_digit: bool,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            required_length: 6,
            require_non_letter_or_digit: true,
        }
    }
}

/// Lockout accounting policy. The store only persists the counters; the
/// credential-checking path in the user manager enforces these thresholds.
#[derive(Debug, Clone)]
pub struct LockoutOptions {
    pub max_failed_access_attempts: u32,
    pub default_lockout: Duration,
}

impl Default for LockoutOptions {
    fn default() -> Self {
        Self {
            max_failed_access_attempts: 5,
            default_lockout: Duration::minutes(5),
        }
    }
}
