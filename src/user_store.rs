//! Store-level user operations: document CRUD plus the embedded
//! sub-collection logic (claims, logins, tokens, role memberships).
//!
//! The store works exclusively with normalized values; the manager layer is
//! responsible for folding raw names and emails before calling in. Single
//! writer per user is assumed for sub-collection writes, which re-save the
//! whole document last-writer-wins; full updates go through the
//! compare-and-swap path instead.

use std::sync::Arc;

use crate::backend::{BackendConnection, PersistenceHandler};
use crate::misc::{generate_stamp, IdentityError};
use crate::user_account::{
    Claim, IdentityUser, IdentityUserClaim, IdentityUserLogin, IdentityUserToken, UserLoginInfo,
};
use crate::Key;

type ClaimFactory<K> = Arc<dyn Fn(&IdentityUser<K>, &Claim) -> IdentityUserClaim + Send + Sync>;
type LoginFactory<K> =
    Arc<dyn Fn(&IdentityUser<K>, &UserLoginInfo) -> IdentityUserLogin + Send + Sync>;
type TokenFactory<K> =
    Arc<dyn Fn(&IdentityUser<K>, &str, &str, &str) -> IdentityUserToken + Send + Sync>;

/// Callbacks for constructing embedded records. Deployments that persist
/// extra per-record fields override these to populate each record's `extra`
/// map; the defaults build the plain records.
pub struct RecordFactories<K: Key> {
    pub claim: ClaimFactory<K>,
    pub login: LoginFactory<K>,
    /// Arguments after the owner: login_provider, name, value.
    pub token: TokenFactory<K>,
}

impl<K: Key> Default for RecordFactories<K> {
    fn default() -> Self {
        Self {
            claim: Arc::new(|_, claim| IdentityUserClaim::from_claim(claim)),
            login: Arc::new(|_, login| IdentityUserLogin::from_login(login)),
            token: Arc::new(|_, provider, name, value| {
                IdentityUserToken::new(provider, name, value)
            }),
        }
    }
}

impl<K: Key> Clone for RecordFactories<K> {
    fn clone(&self) -> Self {
        Self {
            claim: self.claim.clone(),
            login: self.login.clone(),
            token: self.token.clone(),
        }
    }
}

/// Persistence operations over user documents.
pub struct UserStore<K: Key> {
    handler: PersistenceHandler<K>,
    factories: RecordFactories<K>,
}

impl<K: Key> Clone for UserStore<K> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            factories: self.factories.clone(),
        }
    }
}

impl<K: Key> UserStore<K> {
    pub fn new(handler: PersistenceHandler<K>) -> Self {
        Self {
            handler,
            factories: RecordFactories::default(),
        }
    }

    pub fn with_factories(mut self, factories: RecordFactories<K>) -> Self {
        self.factories = factories;
        self
    }

    /// Inserts a new user document.
    pub async fn create(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        self.handler.insert_user(user).await
    }

    /// Full-document update under optimistic concurrency. On success the
    /// caller's document carries a fresh concurrency stamp; on failure it is
    /// left exactly as passed in.
    pub async fn update(&self, user: &mut IdentityUser<K>) -> Result<(), IdentityError> {
        let expected = user.concurrency_stamp.clone();
        user.concurrency_stamp = generate_stamp();

        if let Err(err) = self.handler.replace_user(user, &expected).await {
            user.concurrency_stamp = expected;
            return Err(err);
        }

        Ok(())
    }

    /// Deletes the user document, cascading over every embedded record.
    pub async fn delete(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        self.handler.delete_user(&user.id).await
    }

    pub async fn find_by_id(&self, id: &K) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.handler.find_user_by_id(id).await
    }

    pub async fn find_by_name(
        &self,
        normalized_user_name: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.handler.find_user_by_name(normalized_user_name).await
    }

    pub async fn find_by_email(
        &self,
        normalized_email: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.handler.find_user_by_email(normalized_email).await
    }

    /// Claims as currently persisted. A user that no longer exists yields
    /// the empty list rather than an error.
    pub async fn get_claims(&self, user: &IdentityUser<K>) -> Result<Vec<Claim>, IdentityError> {
        Ok(self
            .handler
            .find_user_by_id(&user.id)
            .await?
            .map(|u| u.claims.iter().map(|c| c.to_claim()).collect())
            .unwrap_or_default())
    }

    /// Appends claim records. Duplicates are permitted; claims are
    /// multi-valued by design.
    pub async fn add_claims(
        &self,
        user: &mut IdentityUser<K>,
        claims: &[Claim],
    ) -> Result<(), IdentityError> {
        let records: Vec<IdentityUserClaim> = claims
            .iter()
            .map(|claim| (self.factories.claim)(user, claim))
            .collect();
        user.claims.extend(records);
        self.handler.save_user(user).await
    }

    /// Rewrites every record matching `claim` on type+value to
    /// `new_claim`. No match is a no-op.
    pub async fn replace_claim(
        &self,
        user: &mut IdentityUser<K>,
        claim: &Claim,
        new_claim: &Claim,
    ) -> Result<(), IdentityError> {
        for record in user
            .claims
            .iter_mut()
            .filter(|r| r.matches_type_value(claim))
        {
            record.apply(new_claim);
        }
        self.handler.save_user(user).await
    }

    /// Removes every record exactly matching one of `claims`. Absent
    /// matches are no-ops.
    pub async fn remove_claims(
        &self,
        user: &mut IdentityUser<K>,
        claims: &[Claim],
    ) -> Result<(), IdentityError> {
        user.claims
            .retain(|record| !claims.iter().any(|claim| record.matches_exact(claim)));
        self.handler.save_user(user).await
    }

    /// Associates an external login. The `(provider, key)` pair must not be
    /// held by any user, including this one.
    pub async fn add_login(
        &self,
        user: &mut IdentityUser<K>,
        login: &UserLoginInfo,
    ) -> Result<(), IdentityError> {
        if self
            .handler
            .find_user_by_login(&login.login_provider, &login.provider_key)
            .await?
            .is_some()
        {
            return Err(IdentityError::LoginAlreadyAssociated);
        }

        let record = (self.factories.login)(user, login);
        user.logins.push(record);
        self.handler.save_user(user).await
    }

    pub async fn remove_login(
        &self,
        user: &mut IdentityUser<K>,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<(), IdentityError> {
        let before = user.logins.len();
        user.logins
            .retain(|l| !(l.login_provider == login_provider && l.provider_key == provider_key));
        if user.logins.len() == before {
            return Err(IdentityError::LoginNotFound);
        }
        self.handler.save_user(user).await
    }

    pub async fn get_logins(
        &self,
        user: &IdentityUser<K>,
    ) -> Result<Vec<UserLoginInfo>, IdentityError> {
        Ok(self
            .handler
            .find_user_by_id(&user.id)
            .await?
            .map(|u| u.logins.iter().map(|l| l.to_login()).collect())
            .unwrap_or_default())
    }

    pub async fn find_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.handler
            .find_user_by_login(login_provider, provider_key)
            .await
    }

    /// Upserts the token keyed by `(login_provider, name)`.
    pub async fn set_token(
        &self,
        user: &mut IdentityUser<K>,
        login_provider: &str,
        name: &str,
        value: &str,
    ) -> Result<(), IdentityError> {
        match user.token_position(login_provider, name) {
            Some(pos) => user.tokens[pos].value = value.to_string(),
            None => {
                let record = (self.factories.token)(user, login_provider, name, value);
                user.tokens.push(record);
            }
        }
        self.handler.save_user(user).await
    }

    pub async fn get_token(
        &self,
        user: &IdentityUser<K>,
        login_provider: &str,
        name: &str,
    ) -> Result<Option<String>, IdentityError> {
        Ok(self
            .handler
            .find_user_by_id(&user.id)
            .await?
            .and_then(|u| {
                u.token_position(login_provider, name)
                    .map(|pos| u.tokens[pos].value.clone())
            }))
    }

    pub async fn remove_token(
        &self,
        user: &mut IdentityUser<K>,
        login_provider: &str,
        name: &str,
    ) -> Result<(), IdentityError> {
        match user.token_position(login_provider, name) {
            Some(pos) => {
                let _ = user.tokens.remove(pos);
                self.handler.save_user(user).await
            }
            None => Err(IdentityError::TokenNotFound),
        }
    }

    /// Adds the user to a role that must already exist. Idempotent at this
    /// layer; the manager rejects duplicate adds before calling in.
    pub async fn add_to_role(
        &self,
        user: &mut IdentityUser<K>,
        normalized_role_name: &str,
    ) -> Result<(), IdentityError> {
        if self
            .handler
            .find_role_by_name(normalized_role_name)
            .await?
            .is_none()
        {
            return Err(IdentityError::RoleNotFound(normalized_role_name.to_string()));
        }

        if !user.roles.iter().any(|r| r == normalized_role_name) {
            user.roles.push(normalized_role_name.to_string());
        }
        self.handler.save_user(user).await
    }

    /// Removes the membership reference. Idempotent at this layer.
    pub async fn remove_from_role(
        &self,
        user: &mut IdentityUser<K>,
        normalized_role_name: &str,
    ) -> Result<(), IdentityError> {
        user.roles.retain(|r| r != normalized_role_name);
        self.handler.save_user(user).await
    }

    /// Membership as currently persisted; absent users are in no roles.
    pub async fn is_in_role(
        &self,
        user: &IdentityUser<K>,
        normalized_role_name: &str,
    ) -> Result<bool, IdentityError> {
        Ok(self
            .handler
            .find_user_by_id(&user.id)
            .await?
            .map(|u| u.roles.iter().any(|r| r == normalized_role_name))
            .unwrap_or(false))
    }

    pub async fn get_roles(&self, user: &IdentityUser<K>) -> Result<Vec<String>, IdentityError> {
        Ok(self
            .handler
            .find_user_by_id(&user.id)
            .await?
            .map(|u| u.roles)
            .unwrap_or_default())
    }

    pub async fn get_users_in_role(
        &self,
        normalized_role_name: &str,
    ) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        self.handler.users_in_role(normalized_role_name).await
    }

    pub fn supports_queryable_users(&self) -> bool {
        self.handler.supports_queryable_users()
    }

    pub async fn all_users(&self) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        self.handler.all_users().await
    }
}
