//! High-level user orchestration: normalization, validation, credential
//! handling, lockout accounting, and logging, layered over [`UserStore`].
//!
//! The manager owns the lifecycle: once [`UserManager::dispose`] runs, every
//! subsequent operational call fails with [`IdentityError::Disposed`]. An
//! in-flight operation is cancelled by dropping its future; no mutation
//! happens after a drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::credentials::{PasswordHasher, UserTokenProvider};
use crate::misc::{aggregate, generate_stamp, IdentityError};
use crate::normalization::LookupNormalizer;
use crate::options::IdentityOptions;
use crate::user_account::{Claim, IdentityUser, UserLoginInfo};
use crate::user_store::UserStore;
use crate::validation::{DefaultPasswordValidator, DefaultUserValidator, PasswordValidator, UserValidator};
use crate::Key;

/// Orchestrates user operations over a [`UserStore`].
pub struct UserManager<K: Key> {
    store: UserStore<K>,
    options: IdentityOptions,
    normalizer: Option<Arc<dyn LookupNormalizer>>,
    user_validators: Vec<Arc<dyn UserValidator<K>>>,
    password_validators: Vec<Arc<dyn PasswordValidator>>,
    password_hasher: Arc<dyn PasswordHasher>,
    token_provider: Option<Arc<dyn UserTokenProvider<K>>>,
    disposed: AtomicBool,
}

impl<K: Key> UserManager<K> {
    /// Creates a manager with the default options, normalizer, and
    /// validators.
    pub fn new(store: UserStore<K>, password_hasher: Arc<dyn PasswordHasher>) -> Self {
        let options = IdentityOptions::default();
        let password_validator = DefaultPasswordValidator::new(options.password.clone());
        Self {
            store,
            normalizer: Some(Arc::new(crate::normalization::UpperInvariantNormalizer)),
            user_validators: vec![Arc::new(DefaultUserValidator)],
            password_validators: vec![Arc::new(password_validator)],
            password_hasher,
            token_provider: None,
            disposed: AtomicBool::new(false),
            options,
        }
    }

    pub fn with_options(mut self, options: IdentityOptions) -> Self {
        self.password_validators = vec![Arc::new(DefaultPasswordValidator::new(
            options.password.clone(),
        ))];
        self.options = options;
        self
    }

    /// Overrides the normalizer. `None` disables normalization entirely;
    /// lookups then compare raw values.
    pub fn with_normalizer(mut self, normalizer: Option<Arc<dyn LookupNormalizer>>) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Replaces the validator chain. All validators run on every write; the
    /// failures pool.
    pub fn with_user_validators(mut self, validators: Vec<Arc<dyn UserValidator<K>>>) -> Self {
        self.user_validators = validators;
        self
    }

    pub fn with_password_validators(mut self, validators: Vec<Arc<dyn PasswordValidator>>) -> Self {
        self.password_validators = validators;
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn UserTokenProvider<K>>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn options(&self) -> &IdentityOptions {
        &self.options
    }

    /// Applies the configured normalizer, or passes the value through when
    /// normalization is disabled.
    pub fn normalize_name(&self, raw: &str) -> String {
        match &self.normalizer {
            Some(normalizer) => normalizer.normalize(raw),
            None => raw.to_string(),
        }
    }

    /// Releases the manager. Idempotent; any later operational call fails
    /// with [`IdentityError::Disposed`].
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            tracing::info!(target: "identity", "User manager disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_not_disposed(&self) -> Result<(), IdentityError> {
        if self.is_disposed() {
            return Err(IdentityError::Disposed);
        }
        Ok(())
    }

    fn apply_normalization(&self, user: &mut IdentityUser<K>) {
        user.normalized_user_name = self.normalize_name(&user.user_name);
        user.normalized_email = user.email.as_deref().map(|e| self.normalize_name(e));
    }

    async fn run_validators(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        let mut errors = Vec::new();
        for validator in &self.user_validators {
            if let Err(mut batch) = validator.validate(self, user).await {
                errors.append(&mut batch);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                target: "identity",
                "User {:?} validation failed: {:?}",
                user.id,
                errors.iter().map(|e| e.code()).collect::<Vec<_>>()
            );
            Err(aggregate(errors))
        }
    }

    fn validate_password(&self, password: &str) -> Result<(), IdentityError> {
        let mut errors = Vec::new();
        for validator in &self.password_validators {
            if let Err(mut batch) = validator.validate(password) {
                errors.append(&mut batch);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(aggregate(errors))
        }
    }

    fn log_store_failure(&self, op: &str, id: &K, err: &IdentityError) {
        tracing::warn!(
            target: "identity",
            "User {id:?} {op} failed: {:?}",
            err.codes()
        );
    }

    /// Normalizes, validates, and persists a new user.
    pub async fn create(&self, user: &mut IdentityUser<K>) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.apply_normalization(user);
        self.run_validators(user).await?;
        if let Err(err) = self.store.create(user).await {
            self.log_store_failure("create", &user.id, &err);
            return Err(err);
        }
        tracing::info!(target: "identity", "Created user {:?}", user.id);
        Ok(())
    }

    /// Normalizes, validates, and persists changes to an existing user
    /// under optimistic concurrency.
    pub async fn update(&self, user: &mut IdentityUser<K>) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.apply_normalization(user);
        self.run_validators(user).await?;
        if let Err(err) = self.store.update(user).await {
            self.log_store_failure("update", &user.id, &err);
            return Err(err);
        }
        tracing::info!(target: "identity", "Updated user {:?}", user.id);
        Ok(())
    }

    pub async fn delete(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        if let Err(err) = self.store.delete(user).await {
            self.log_store_failure("delete", &user.id, &err);
            return Err(err);
        }
        tracing::info!(target: "identity", "Deleted user {:?}", user.id);
        Ok(())
    }

    pub async fn find_by_id(&self, id: &K) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.find_by_id(id).await
    }

    /// Lookup by display name; the name is normalized before the search.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.find_by_name(&self.normalize_name(name)).await
    }

    pub async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.find_by_email(&self.normalize_name(email)).await
    }

    pub async fn get_claims(&self, user: &IdentityUser<K>) -> Result<Vec<Claim>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.get_claims(user).await
    }

    pub async fn add_claim(
        &self,
        user: &mut IdentityUser<K>,
        claim: &Claim,
    ) -> Result<(), IdentityError> {
        self.add_claims(user, std::slice::from_ref(claim)).await
    }

    pub async fn add_claims(
        &self,
        user: &mut IdentityUser<K>,
        claims: &[Claim],
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.add_claims(user, claims).await
    }

    pub async fn replace_claim(
        &self,
        user: &mut IdentityUser<K>,
        claim: &Claim,
        new_claim: &Claim,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.replace_claim(user, claim, new_claim).await
    }

    pub async fn remove_claims(
        &self,
        user: &mut IdentityUser<K>,
        claims: &[Claim],
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.remove_claims(user, claims).await
    }

    pub async fn add_login(
        &self,
        user: &mut IdentityUser<K>,
        login: &UserLoginInfo,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.add_login(user, login).await
    }

    /// Removes an external login and invalidates existing credentials by
    /// rotating the security stamp.
    pub async fn remove_login(
        &self,
        user: &mut IdentityUser<K>,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store
            .remove_login(user, login_provider, provider_key)
            .await?;
        user.security_stamp = generate_stamp();
        self.store.update(user).await
    }

    pub async fn get_logins(
        &self,
        user: &IdentityUser<K>,
    ) -> Result<Vec<UserLoginInfo>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.get_logins(user).await
    }

    pub async fn find_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.find_by_login(login_provider, provider_key).await
    }

    /// Adds the user to a role. Fails if the membership already exists or
    /// the role does not.
    pub async fn add_to_role(
        &self,
        user: &mut IdentityUser<K>,
        role_name: &str,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        let normalized = self.normalize_name(role_name);
        if self.store.is_in_role(user, &normalized).await? {
            return Err(IdentityError::UserAlreadyInRole(role_name.to_string()));
        }
        self.store.add_to_role(user, &normalized).await
    }

    /// Adds the user to each named role. Duplicate names within the call
    /// are collapsed; an existing membership still fails the call.
    pub async fn add_to_roles(
        &self,
        user: &mut IdentityUser<K>,
        role_names: &[&str],
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        let mut seen = Vec::new();
        for role_name in role_names {
            let normalized = self.normalize_name(role_name);
            if seen.contains(&normalized) {
                continue;
            }
            if self.store.is_in_role(user, &normalized).await? {
                return Err(IdentityError::UserAlreadyInRole(role_name.to_string()));
            }
            self.store.add_to_role(user, &normalized).await?;
            seen.push(normalized);
        }
        Ok(())
    }

    /// Removes a role membership. Fails if the user does not hold it.
    pub async fn remove_from_role(
        &self,
        user: &mut IdentityUser<K>,
        role_name: &str,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        let normalized = self.normalize_name(role_name);
        if !self.store.is_in_role(user, &normalized).await? {
            return Err(IdentityError::UserNotInRole(role_name.to_string()));
        }
        self.store.remove_from_role(user, &normalized).await
    }

    pub async fn is_in_role(
        &self,
        user: &IdentityUser<K>,
        role_name: &str,
    ) -> Result<bool, IdentityError> {
        self.ensure_not_disposed()?;
        self.store
            .is_in_role(user, &self.normalize_name(role_name))
            .await
    }

    /// Normalized names of the roles the user currently belongs to.
    pub async fn get_roles(&self, user: &IdentityUser<K>) -> Result<Vec<String>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.get_roles(user).await
    }

    pub async fn get_users_in_role(
        &self,
        role_name: &str,
    ) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store
            .get_users_in_role(&self.normalize_name(role_name))
            .await
    }

    pub async fn set_token(
        &self,
        user: &mut IdentityUser<K>,
        login_provider: &str,
        name: &str,
        value: &str,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.set_token(user, login_provider, name, value).await
    }

    pub async fn get_token(
        &self,
        user: &IdentityUser<K>,
        login_provider: &str,
        name: &str,
    ) -> Result<Option<String>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.get_token(user, login_provider, name).await
    }

    pub async fn remove_token(
        &self,
        user: &mut IdentityUser<K>,
        login_provider: &str,
        name: &str,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.remove_token(user, login_provider, name).await
    }

    /// Sets a first password for a user that has none. The password runs
    /// through the validator chain before hashing; setting it rotates the
    /// security stamp.
    pub async fn add_password(
        &self,
        user: &mut IdentityUser<K>,
        password: &str,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        if user.password_hash.is_some() {
            return Err(IdentityError::UserAlreadyHasPassword);
        }
        self.validate_password(password)?;
        user.password_hash = Some(self.password_hasher.hash_password(password)?);
        user.security_stamp = generate_stamp();
        self.store.update(user).await
    }

    /// Clears the stored password hash and rotates the security stamp.
    pub async fn remove_password(&self, user: &mut IdentityUser<K>) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        user.password_hash = None;
        user.security_stamp = generate_stamp();
        self.store.update(user).await
    }

    pub fn has_password(&self, user: &IdentityUser<K>) -> bool {
        user.password_hash.is_some()
    }

    /// Verifies a password and runs lockout accounting on the outcome: a
    /// success clears the failure counter, a failure increments it, and
    /// crossing the configured threshold starts a lockout window.
    pub async fn check_password(
        &self,
        user: &mut IdentityUser<K>,
        password: &str,
    ) -> Result<bool, IdentityError> {
        self.ensure_not_disposed()?;

        let verified = match user.password_hash.as_deref() {
            Some(hash) => self.password_hasher.verify_password(hash, password)?,
            None => false,
        };

        if verified {
            if user.access_failed_count != 0 {
                user.access_failed_count = 0;
                self.store.update(user).await?;
            }
            return Ok(true);
        }

        if user.lockout_enabled {
            user.access_failed_count += 1;
            if user.access_failed_count >= self.options.lockout.max_failed_access_attempts {
                user.lockout_end = Some(Utc::now() + self.options.lockout.default_lockout);
                user.access_failed_count = 0;
                tracing::warn!(target: "identity", "User {:?} locked out after repeated failures", user.id);
            }
            self.store.update(user).await?;
        }

        Ok(false)
    }

    /// Whether an active lockout window covers the current instant.
    pub fn is_locked_out(&self, user: &IdentityUser<K>) -> bool {
        user.lockout_enabled
            && user
                .lockout_end
                .map(|end| end > Utc::now())
                .unwrap_or(false)
    }

    /// Generates a purpose-bound token via the configured provider.
    pub async fn generate_token(
        &self,
        user: &IdentityUser<K>,
        purpose: &str,
    ) -> Result<String, IdentityError> {
        self.ensure_not_disposed()?;
        match &self.token_provider {
            Some(provider) => provider.generate(purpose, user).await,
            None => Err(IdentityError::NotSupported(
                "no token provider is configured".into(),
            )),
        }
    }

    pub async fn verify_token(
        &self,
        user: &IdentityUser<K>,
        purpose: &str,
        token: &str,
    ) -> Result<bool, IdentityError> {
        self.ensure_not_disposed()?;
        match &self.token_provider {
            Some(provider) => provider.validate(purpose, token, user).await,
            None => Err(IdentityError::NotSupported(
                "no token provider is configured".into(),
            )),
        }
    }

    pub fn supports_queryable_users(&self) -> bool {
        self.store.supports_queryable_users()
    }

    /// All users, where the backend supports enumeration.
    pub async fn users(&self) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.all_users().await
    }
}

impl<K: Key> Drop for UserManager<K> {
    fn drop(&mut self) {
        self.dispose();
    }
}
