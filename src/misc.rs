//! Error types and small helpers shared across the crate.
//!
//! Every fallible operation in this crate surfaces an [`IdentityError`].
//! Domain failures (duplicate names, missing memberships, stamp mismatches)
//! are ordinary values the caller inspects; they are never panics. Each error
//! carries a stable machine-readable code alongside its human description.

use thiserror::Error;
use uuid::Uuid;

/// Default error type for this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// An operational call was made after the owning manager was disposed
    #[error("the manager has been disposed and can no longer be used")]
    Disposed,
    /// Another user already holds this normalized user name
    #[error("user name '{0}' is already taken")]
    DuplicateUserName(String),
    /// Another user already holds this normalized email
    #[error("email '{0}' is already taken")]
    DuplicateEmail(String),
    /// Another role already holds this normalized name
    #[error("role name '{0}' is already taken")]
    DuplicateRoleName(String),
    /// The user name is empty or contains a disallowed character
    #[error("user name '{0}' is invalid")]
    InvalidUserName(String),
    /// The role name is empty
    #[error("role name '{0}' is invalid")]
    InvalidRoleName(String),
    /// The email does not look like an email address
    #[error("email '{0}' is invalid")]
    InvalidEmail(String),
    /// The password is shorter than the configured minimum
    #[error("passwords must be at least {0} characters long")]
    PasswordTooShort(usize),
    /// The password policy requires a non-alphanumeric character
    #[error("passwords must contain at least one non-letter, non-digit character")]
    PasswordRequiresNonAlphanumeric,
    /// A first-password set was attempted while a password already exists
    #[error("user already has a password set")]
    UserAlreadyHasPassword,
    /// Duplicate role membership add, rejected at the manager layer
    #[error("user is already in role '{0}'")]
    UserAlreadyInRole(String),
    /// Membership removal for a role the user does not hold
    #[error("user is not in role '{0}'")]
    UserNotInRole(String),
    /// A membership operation referenced a role that does not exist
    #[error("role '{0}' does not exist")]
    RoleNotFound(String),
    /// The (provider, key) pair is already associated with another user
    #[error("a user with that external login already exists")]
    LoginAlreadyAssociated,
    /// Login removal for a (provider, key) pair the user does not hold
    #[error("no login found for the given provider and key")]
    LoginNotFound,
    /// Token removal for a (provider, name) pair the user does not hold
    #[error("no token found for the given provider and name")]
    TokenNotFound,
    /// Optimistic concurrency stamp mismatch; re-read and retry
    #[error("the entity was modified concurrently; re-read and retry")]
    ConcurrencyFailure,
    /// The backend lacks the requested capability
    #[error("operation not supported by this backend: {0}")]
    NotSupported(String),
    /// Input/output or serialization failure in the backing store
    #[error("storage failure: {0}")]
    Storage(String),
    /// One or more validator failures, collected without short-circuiting
    #[error("validation failed: [{}]", join_codes(.0))]
    Validation(Vec<IdentityError>),
    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl IdentityError {
    pub(crate) fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Generic(msg.into())
    }

    /// A stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::Disposed => "Disposed",
            IdentityError::DuplicateUserName(_) => "DuplicateUserName",
            IdentityError::DuplicateEmail(_) => "DuplicateEmail",
            IdentityError::DuplicateRoleName(_) => "DuplicateRoleName",
            IdentityError::InvalidUserName(_) => "InvalidUserName",
            IdentityError::InvalidRoleName(_) => "InvalidRoleName",
            IdentityError::InvalidEmail(_) => "InvalidEmail",
            IdentityError::PasswordTooShort(_) => "PasswordTooShort",
            IdentityError::PasswordRequiresNonAlphanumeric => "PasswordRequiresNonAlphanumeric",
            IdentityError::UserAlreadyHasPassword => "UserAlreadyHasPassword",
            IdentityError::UserAlreadyInRole(_) => "UserAlreadyInRole",
            IdentityError::UserNotInRole(_) => "UserNotInRole",
            IdentityError::RoleNotFound(_) => "RoleNotFound",
            IdentityError::LoginAlreadyAssociated => "LoginAlreadyAssociated",
            IdentityError::LoginNotFound => "LoginNotFound",
            IdentityError::TokenNotFound => "TokenNotFound",
            IdentityError::ConcurrencyFailure => "ConcurrencyFailure",
            IdentityError::NotSupported(_) => "NotSupported",
            IdentityError::Storage(_) => "Storage",
            IdentityError::Validation(_) => "Validation",
            IdentityError::Generic(_) => "Generic",
        }
    }

    /// All codes carried by this error. A [`IdentityError::Validation`]
    /// aggregate flattens to the codes of its members.
    pub fn codes(&self) -> Vec<&'static str> {
        match self {
            IdentityError::Validation(errors) => errors.iter().map(|e| e.code()).collect(),
            other => vec![other.code()],
        }
    }
}

impl From<std::io::Error> for IdentityError {
    fn from(e: std::io::Error) -> Self {
        IdentityError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(e: serde_json::Error) -> Self {
        IdentityError::Storage(e.to_string())
    }
}

fn join_codes(errors: &[IdentityError]) -> String {
    errors
        .iter()
        .map(|e| e.code())
        .collect::<Vec<_>>()
        .join(";")
}

/// Collapses the failures gathered from a validator run into a single error.
/// A lone failure is returned as-is; multiple failures aggregate.
pub(crate) fn aggregate(mut errors: Vec<IdentityError>) -> IdentityError {
    if errors.len() == 1 {
        errors.remove(0)
    } else {
        IdentityError::Validation(errors)
    }
}

/// Generates an opaque version/invalidation stamp. Stamps only need to be
/// unique across rapid successive updates, never ordered.
pub fn generate_stamp() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_aggregate_flattens_codes() {
        let err = IdentityError::Validation(vec![
            IdentityError::DuplicateUserName("BOB".into()),
            IdentityError::InvalidEmail("nope".into()),
        ]);
        assert_eq!(err.codes(), vec!["DuplicateUserName", "InvalidEmail"]);
        assert_eq!(
            err.to_string(),
            "validation failed: [DuplicateUserName;InvalidEmail]"
        );
    }

    #[test]
    fn single_failure_is_not_wrapped() {
        let err = aggregate(vec![IdentityError::ConcurrencyFailure]);
        assert_eq!(err, IdentityError::ConcurrencyFailure);
    }

    #[test]
    fn stamps_are_unique() {
        assert_ne!(generate_stamp(), generate_stamp());
    }
}
