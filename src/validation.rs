//! Validator pipeline run by the managers before every create and update.
//!
//! Validators never short-circuit each other: the manager runs every
//! registered validator and pools the failures, so a caller fixing bad
//! input sees all of it at once rather than one failure per round trip.

use async_trait::async_trait;

use crate::misc::IdentityError;
use crate::role_account::IdentityRole;
use crate::role_manager::RoleManager;
use crate::user_account::IdentityUser;
use crate::user_manager::UserManager;
use crate::Key;

/// Inspects a user before it is written. Returns every failure found.
#[async_trait]
pub trait UserValidator<K: Key>: Send + Sync {
    async fn validate(
        &self,
        manager: &UserManager<K>,
        user: &IdentityUser<K>,
    ) -> Result<(), Vec<IdentityError>>;
}

/// Inspects a role before it is written. Returns every failure found.
#[async_trait]
pub trait RoleValidator<K: Key>: Send + Sync {
    async fn validate(
        &self,
        manager: &RoleManager<K>,
        role: &IdentityRole<K>,
    ) -> Result<(), Vec<IdentityError>>;
}

/// Inspects a candidate password. Purely syntactic, so synchronous.
pub trait PasswordValidator: Send + Sync {
    fn validate(&self, password: &str) -> Result<(), Vec<IdentityError>>;
}

/// The stock user validator: non-empty name drawn from the allowed
/// character set, unique normalized name, and (per policy) a well-shaped,
/// unique email.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUserValidator;

#[async_trait]
impl<K: Key> UserValidator<K> for DefaultUserValidator {
    async fn validate(
        &self,
        manager: &UserManager<K>,
        user: &IdentityUser<K>,
    ) -> Result<(), Vec<IdentityError>> {
        let mut errors = Vec::new();
        let options = manager.options();

        if user.user_name.trim().is_empty() {
            errors.push(IdentityError::InvalidUserName(user.user_name.clone()));
        } else if let Some(allowed) = options.user.allowed_user_name_characters.as_deref() {
            if user.user_name.chars().any(|c| !allowed.contains(c)) {
                errors.push(IdentityError::InvalidUserName(user.user_name.clone()));
            }
        }

        match manager.find_by_name(&user.user_name).await {
            Ok(Some(owner)) if owner.id != user.id => {
                errors.push(IdentityError::DuplicateUserName(user.user_name.clone()));
            }
            Ok(_) => {}
            Err(err) => errors.push(err),
        }

        match user.email.as_deref() {
            Some(email) => {
                if options.user.validate_email_format && !email_has_valid_shape(email) {
                    errors.push(IdentityError::InvalidEmail(email.to_string()));
                } else if options.user.require_unique_email {
                    match manager.find_by_email(email).await {
                        Ok(Some(owner)) if owner.id != user.id => {
                            errors.push(IdentityError::DuplicateEmail(email.to_string()));
                        }
                        Ok(_) => {}
                        Err(err) => errors.push(err),
                    }
                }
            }
            None => {
                if options.user.require_unique_email {
                    errors.push(IdentityError::InvalidEmail(String::new()));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The stock role validator: non-empty name, unique normalized name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRoleValidator;

#[async_trait]
impl<K: Key> RoleValidator<K> for DefaultRoleValidator {
    async fn validate(
        &self,
        manager: &RoleManager<K>,
        role: &IdentityRole<K>,
    ) -> Result<(), Vec<IdentityError>> {
        let mut errors = Vec::new();

        if role.name.trim().is_empty() {
            errors.push(IdentityError::InvalidRoleName(role.name.clone()));
        }

        match manager.find_by_name(&role.name).await {
            Ok(Some(owner)) if owner.id != role.id => {
                errors.push(IdentityError::DuplicateRoleName(role.name.clone()));
            }
            Ok(_) => {}
            Err(err) => errors.push(err),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The stock password validator, driven by [`crate::options::PasswordOptions`].
#[derive(Debug, Clone)]
pub struct DefaultPasswordValidator {
    pub options: crate::options::PasswordOptions,
}

impl DefaultPasswordValidator {
    pub fn new(options: crate::options::PasswordOptions) -> Self {
        Self { options }
    }
}

impl PasswordValidator for DefaultPasswordValidator {
    fn validate(&self, password: &str) -> Result<(), Vec<IdentityError>> {
        let mut errors = Vec::new();

        if password.chars().count() < self.options.required_length {
            errors.push(IdentityError::PasswordTooShort(self.options.required_length));
        }

        if self.options.require_non_letter_or_digit
            && password.chars().all(|c| c.is_alphanumeric())
        {
            errors.push(IdentityError::PasswordRequiresNonAlphanumeric);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The minimal shape check used by the default user validator: exactly one
/// `@` with a non-empty local part and domain. Full RFC validation belongs
/// to the caller's mail layer, not here.
pub(crate) fn email_has_valid_shape(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => !local.is_empty() && !domain.is_empty(),
        _ => false,
    }
}
