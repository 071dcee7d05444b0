//! Opaque credential capabilities consumed by the user manager.
//!
//! Hashing and token algorithms are deliberately outside this crate: the
//! manager only needs a pass/fail answer and an opaque string, so both are
//! modeled as injected traits. Production deployments supply an Argon2 or
//! similar implementation; the test suites supply trivial doubles.

use async_trait::async_trait;

use crate::misc::IdentityError;
use crate::user_account::IdentityUser;
use crate::Key;

/// Hashes and verifies passwords. The hash format is opaque to this crate.
pub trait PasswordHasher: Send + Sync {
    fn hash_password(&self, password: &str) -> Result<String, IdentityError>;
    fn verify_password(&self, hash: &str, password: &str) -> Result<bool, IdentityError>;
}

/// Generates and validates purpose-bound user tokens (password reset, email
/// confirmation, and the like). Token contents are opaque to this crate.
#[async_trait]
pub trait UserTokenProvider<K: Key>: Send + Sync {
    async fn generate(
        &self,
        purpose: &str,
        user: &IdentityUser<K>,
    ) -> Result<String, IdentityError>;

    async fn validate(
        &self,
        purpose: &str,
        token: &str,
        user: &IdentityUser<K>,
    ) -> Result<bool, IdentityError>;
}
