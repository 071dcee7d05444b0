//! High-level role orchestration over [`RoleStore`], mirroring the user
//! manager's normalize/validate/persist template and disposal lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::misc::{aggregate, IdentityError};
use crate::normalization::LookupNormalizer;
use crate::role_account::IdentityRole;
use crate::role_store::RoleStore;
use crate::user_account::Claim;
use crate::validation::{DefaultRoleValidator, RoleValidator};
use crate::Key;

/// Orchestrates role operations over a [`RoleStore`].
pub struct RoleManager<K: Key> {
    store: RoleStore<K>,
    normalizer: Option<Arc<dyn LookupNormalizer>>,
    role_validators: Vec<Arc<dyn RoleValidator<K>>>,
    disposed: AtomicBool,
}

impl<K: Key> RoleManager<K> {
    pub fn new(store: RoleStore<K>) -> Self {
        Self {
            store,
            normalizer: Some(Arc::new(crate::normalization::UpperInvariantNormalizer)),
            role_validators: vec![Arc::new(DefaultRoleValidator)],
            disposed: AtomicBool::new(false),
        }
    }

    /// Overrides the normalizer. `None` disables normalization entirely.
    pub fn with_normalizer(mut self, normalizer: Option<Arc<dyn LookupNormalizer>>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_role_validators(mut self, validators: Vec<Arc<dyn RoleValidator<K>>>) -> Self {
        self.role_validators = validators;
        self
    }

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
            tracing::info!(target: "identity", "Role manager disposed");
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

    async fn run_validators(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        let mut errors = Vec::new();
        for validator in &self.role_validators {
            if let Err(mut batch) = validator.validate(self, role).await {
                errors.append(&mut batch);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                target: "identity",
                "Role {:?} validation failed: {:?}",
                role.id,
                errors.iter().map(|e| e.code()).collect::<Vec<_>>()
            );
            Err(aggregate(errors))
        }
    }

    fn log_store_failure(&self, op: &str, id: &K, err: &IdentityError) {
        tracing::warn!(
            target: "identity",
            "Role {id:?} {op} failed: {:?}",
            err.codes()
        );
    }

    /// Normalizes, validates, and persists a new role.
    pub async fn create(&self, role: &mut IdentityRole<K>) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        role.normalized_name = self.normalize_name(&role.name);
        self.run_validators(role).await?;
        if let Err(err) = self.store.create(role).await {
            self.log_store_failure("create", &role.id, &err);
            return Err(err);
        }
        tracing::info!(target: "identity", "Created role {:?}", role.id);
        Ok(())
    }

    /// Normalizes, validates, and persists changes under optimistic
    /// concurrency. Renames propagate to user membership lists.
    pub async fn update(&self, role: &mut IdentityRole<K>) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        role.normalized_name = self.normalize_name(&role.name);
        self.run_validators(role).await?;
        if let Err(err) = self.store.update(role).await {
            self.log_store_failure("update", &role.id, &err);
            return Err(err);
        }
        tracing::info!(target: "identity", "Updated role {:?}", role.id);
        Ok(())
    }

    /// Deletes the role and scrubs its membership references.
    pub async fn delete(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        if let Err(err) = self.store.delete(role).await {
            self.log_store_failure("delete", &role.id, &err);
            return Err(err);
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: &K) -> Result<Option<IdentityRole<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.find_by_id(id).await
    }

    /// Lookup by display name; the name is normalized before the search.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<IdentityRole<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.find_by_name(&self.normalize_name(name)).await
    }

    pub async fn role_exists(&self, name: &str) -> Result<bool, IdentityError> {
        Ok(self.find_by_name(name).await?.is_some())
    }

    /// Renames a role in place. The caller persists the change via
    /// [`Self::update`], which handles membership propagation.
    pub fn set_role_name<N: Into<String>>(&self, role: &mut IdentityRole<K>, name: N) {
        role.name = name.into();
    }

    pub async fn get_claims(&self, role: &IdentityRole<K>) -> Result<Vec<Claim>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.get_claims(role).await
    }

    pub async fn add_claim(
        &self,
        role: &mut IdentityRole<K>,
        claim: &Claim,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.add_claim(role, claim).await
    }

    pub async fn remove_claim(
        &self,
        role: &mut IdentityRole<K>,
        claim: &Claim,
    ) -> Result<(), IdentityError> {
        self.ensure_not_disposed()?;
        self.store.remove_claim(role, claim).await
    }

    pub fn supports_queryable_roles(&self) -> bool {
        self.store.supports_queryable_roles()
    }

    /// All roles, where the backend supports enumeration.
    pub async fn roles(&self) -> Result<Vec<IdentityRole<K>>, IdentityError> {
        self.ensure_not_disposed()?;
        self.store.all_roles().await
    }
}

impl<K: Key> Drop for RoleManager<K> {
    fn drop(&mut self) {
        self.dispose();
    }
}
