//! Store-level role operations, including the membership propagation that
//! keeps user documents consistent across role renames and deletions.

use std::sync::Arc;

use crate::backend::{BackendConnection, PersistenceHandler};
use crate::misc::{generate_stamp, IdentityError};
use crate::role_account::{IdentityRole, IdentityRoleClaim};
use crate::user_account::Claim;
use crate::Key;

type RoleClaimFactory<K> = Arc<dyn Fn(&IdentityRole<K>, &Claim) -> IdentityRoleClaim + Send + Sync>;

/// Persistence operations over role documents.
pub struct RoleStore<K: Key> {
    handler: PersistenceHandler<K>,
    claim_factory: RoleClaimFactory<K>,
}

impl<K: Key> Clone for RoleStore<K> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            claim_factory: self.claim_factory.clone(),
        }
    }
}

impl<K: Key> RoleStore<K> {
    pub fn new(handler: PersistenceHandler<K>) -> Self {
        Self {
            handler,
            claim_factory: Arc::new(|_, claim| IdentityRoleClaim::from_claim(claim)),
        }
    }

    pub fn with_claim_factory(mut self, factory: RoleClaimFactory<K>) -> Self {
        self.claim_factory = factory;
        self
    }

    pub async fn create(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        self.handler.insert_role(role).await
    }

    /// Full-document update under optimistic concurrency. If the update
    /// changed the normalized name, membership references in user documents
    /// are rewritten afterwards.
    pub async fn update(&self, role: &mut IdentityRole<K>) -> Result<(), IdentityError> {
        let stored = self
            .handler
            .find_role_by_id(&role.id)
            .await?
            .ok_or(IdentityError::ConcurrencyFailure)?;

        let expected = role.concurrency_stamp.clone();
        role.concurrency_stamp = generate_stamp();

        if let Err(err) = self.handler.replace_role(role, &expected).await {
            role.concurrency_stamp = expected;
            return Err(err);
        }

        if stored.normalized_name != role.normalized_name {
            let touched = self
                .handler
                .rename_role_references(&stored.normalized_name, &role.normalized_name)
                .await?;
            tracing::info!(
                target: "identity",
                "Role rename {} -> {} propagated to {touched} user(s)",
                stored.normalized_name,
                role.normalized_name
            );
        }

        Ok(())
    }

    /// Deletes the role document, then scrubs membership references from
    /// user documents. The scrub is best-effort: the role itself is already
    /// gone if reference cleanup fails partway.
    pub async fn delete(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        self.handler.delete_role(&role.id).await?;

        match self
            .handler
            .remove_role_references(&role.normalized_name)
            .await
        {
            Ok(touched) => {
                if touched != 0 {
                    tracing::info!(
                        target: "identity",
                        "Deleted role {} and scrubbed {touched} membership(s)",
                        role.normalized_name
                    );
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    target: "identity",
                    "Role {} deleted but membership scrub failed: {err}",
                    role.normalized_name
                );
                Err(err)
            }
        }
    }

    pub async fn find_by_id(&self, id: &K) -> Result<Option<IdentityRole<K>>, IdentityError> {
        self.handler.find_role_by_id(id).await
    }

    pub async fn find_by_name(
        &self,
        normalized_name: &str,
    ) -> Result<Option<IdentityRole<K>>, IdentityError> {
        self.handler.find_role_by_name(normalized_name).await
    }

    /// Claims as currently persisted. An absent role yields the empty list.
    pub async fn get_claims(&self, role: &IdentityRole<K>) -> Result<Vec<Claim>, IdentityError> {
        Ok(self
            .handler
            .find_role_by_id(&role.id)
            .await?
            .map(|r| r.claims.iter().map(|c| c.to_claim()).collect())
            .unwrap_or_default())
    }

    pub async fn add_claim(
        &self,
        role: &mut IdentityRole<K>,
        claim: &Claim,
    ) -> Result<(), IdentityError> {
        let record = (self.claim_factory)(role, claim);
        role.claims.push(record);
        self.handler.save_role(role).await
    }

    /// Removes every record exactly matching `claim`. No match is a no-op.
    pub async fn remove_claim(
        &self,
        role: &mut IdentityRole<K>,
        claim: &Claim,
    ) -> Result<(), IdentityError> {
        role.claims.retain(|record| !record.matches_exact(claim));
        self.handler.save_role(role).await
    }

    pub fn supports_queryable_roles(&self) -> bool {
        self.handler.supports_queryable_roles()
    }

    pub async fn all_roles(&self) -> Result<Vec<IdentityRole<K>>, IdentityError> {
        self.handler.all_roles().await
    }
}
