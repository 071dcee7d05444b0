//! Pluggable document backends.
//!
//! [`BackendConnection`] is the raw document-CRUD seam: one collection per
//! entity kind, whole-document writes, exact-match lookups on normalized
//! fields, and the membership scans that role rename/delete propagation
//! needs. Everything above this trait (stores, managers) is backend
//! agnostic, so an alternate backing technology slots in here without
//! touching manager behavior.

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;

use crate::misc::IdentityError;
use crate::role_account::IdentityRole;
use crate::user_account::IdentityUser;
use crate::Key;

/// Implementation for the default filesystem backend
pub mod filesystem_backend;
/// Implementation for an in-memory backend. No synchronization occurs.
/// Data is lost between program executions; ideal for tests.
pub mod memory;

/// Used when constructing the persistence handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendType {
    /// No durable synchronization; documents live in process memory only.
    InMemory,
    /// Documents synchronized as JSON files under the given directory.
    Filesystem(String),
}

impl BackendType {
    /// Creates a new [`BackendType`] from the provided `url`. Returns an
    /// error if the URL does not name a known backend.
    pub fn new<T: Into<String>>(url: T) -> Result<Self, IdentityError> {
        let addr = url.into();

        if addr == "memory" {
            return Ok(BackendType::InMemory);
        }

        if addr.starts_with("file:") {
            return Ok(Self::filesystem(addr));
        }

        Err(IdentityError::msg(format!(
            "the addr '{addr}' is not a valid backend target (expected 'memory' or 'file:/path')"
        )))
    }

    /// For requesting the use of the local filesystem as a backend.
    /// URL format: file:/path/to/directory
    pub fn filesystem<T: Into<String>>(path: T) -> Self {
        Self::Filesystem(path.into().replace("file:", ""))
    }
}

/// An interface for synchronizing identity documents to a backing target.
///
/// Uniqueness of `normalized_user_name` and role `normalized_name` is
/// enforced here, playing the role a unique index plays on a remote
/// database. Uniqueness of the `(login_provider, provider_key)` pair is
/// guarded one level up, by the user store's lookup-before-save in its
/// add-login path; implementations only need to answer
/// [`Self::find_user_by_login`] correctly. `replace_*` operations are
/// compare-and-swap on the stored concurrency stamp; `save_*` operations
/// overwrite whole documents and back the last-writer-wins sub-collection
/// writes.
#[async_trait]
pub trait BackendConnection<K: Key>: Send + Sync {
    /// This should be run for handling any types of underlying connect operations
    async fn connect(&mut self) -> Result<(), IdentityError>;
    /// Determines if connected or not
    async fn is_connected(&self) -> Result<bool, IdentityError>;

    /// Inserts a new user document; fails with a duplicate error if the
    /// normalized user name or id is already present.
    async fn insert_user(&self, user: &IdentityUser<K>) -> Result<(), IdentityError>;
    /// Replaces a user document if and only if the stored concurrency stamp
    /// equals `expected_stamp`; otherwise fails with a concurrency conflict.
    async fn replace_user(
        &self,
        user: &IdentityUser<K>,
        expected_stamp: &str,
    ) -> Result<(), IdentityError>;
    /// Overwrites a user document unconditionally.
    async fn save_user(&self, user: &IdentityUser<K>) -> Result<(), IdentityError>;
    /// Removes a user document and, with it, every embedded sub-record.
    async fn delete_user(&self, id: &K) -> Result<(), IdentityError>;
    /// Finds a user by id
    async fn find_user_by_id(&self, id: &K) -> Result<Option<IdentityUser<K>>, IdentityError>;
    /// Finds a user by exact normalized user name
    async fn find_user_by_name(
        &self,
        normalized_user_name: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError>;
    /// Finds a user by exact normalized email
    async fn find_user_by_email(
        &self,
        normalized_email: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError>;
    /// Finds the user owning the given external login pair
    async fn find_user_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError>;
    /// Returns every user whose membership list contains the role name
    async fn users_in_role(
        &self,
        normalized_role_name: &str,
    ) -> Result<Vec<IdentityUser<K>>, IdentityError>;
    /// Whether this backend can enumerate all users ad hoc
    fn supports_queryable_users(&self) -> bool {
        false
    }
    /// A queryable view over all users, where supported
    async fn all_users(&self) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        Err(IdentityError::NotSupported(
            "queryable users are not supported by this backend".into(),
        ))
    }

    /// Inserts a new role document; fails with a duplicate error if the
    /// normalized name or id is already present.
    async fn insert_role(&self, role: &IdentityRole<K>) -> Result<(), IdentityError>;
    /// Compare-and-swap replacement of a role document, as [`Self::replace_user`].
    async fn replace_role(
        &self,
        role: &IdentityRole<K>,
        expected_stamp: &str,
    ) -> Result<(), IdentityError>;
    /// Overwrites a role document unconditionally.
    async fn save_role(&self, role: &IdentityRole<K>) -> Result<(), IdentityError>;
    /// Removes a role document
    async fn delete_role(&self, id: &K) -> Result<(), IdentityError>;
    /// Finds a role by id
    async fn find_role_by_id(&self, id: &K) -> Result<Option<IdentityRole<K>>, IdentityError>;
    /// Finds a role by exact normalized name
    async fn find_role_by_name(
        &self,
        normalized_name: &str,
    ) -> Result<Option<IdentityRole<K>>, IdentityError>;
    /// Whether this backend can enumerate all roles ad hoc
    fn supports_queryable_roles(&self) -> bool {
        false
    }
    /// A queryable view over all roles, where supported
    async fn all_roles(&self) -> Result<Vec<IdentityRole<K>>, IdentityError> {
        Err(IdentityError::NotSupported(
            "queryable roles are not supported by this backend".into(),
        ))
    }

    /// Rewrites role-membership references after a rename. Returns the
    /// number of user documents touched. Best-effort: user documents
    /// already rewritten stay rewritten if a later write fails.
    async fn rename_role_references(&self, old: &str, new: &str) -> Result<usize, IdentityError>;
    /// Removes membership references to a deleted role. Returns the number
    /// of user documents touched; same best-effort semantics as renames.
    async fn remove_role_references(&self, normalized_name: &str) -> Result<usize, IdentityError>;

    /// Removes all documents. Returns the number removed.
    async fn purge(&self) -> Result<usize, IdentityError>;
}

/// Shared handle over a connected backend. This gets cloned into each store
/// before making I/O operations.
pub struct PersistenceHandler<K: Key> {
    inner: Arc<dyn BackendConnection<K>>,
}

impl<K: Key> PersistenceHandler<K> {
    /// Creates a new persistence handler, connecting to the backend then
    /// returning self.
    pub async fn create<T: BackendConnection<K> + 'static>(
        mut inner: T,
    ) -> Result<Self, IdentityError> {
        inner.connect().await?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

impl<K: Key> Deref for PersistenceHandler<K> {
    type Target = Arc<dyn BackendConnection<K>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<K: Key> Clone for PersistenceHandler<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
