//! In-memory document backend. Documents are stored in process-local maps
//! keyed by id; uniqueness checks scan the maps, standing in for the unique
//! indexes a remote store would maintain.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::backend::BackendConnection;
use crate::misc::IdentityError;
use crate::role_account::IdentityRole;
use crate::user_account::IdentityUser;
use crate::Key;

/// A backend that stores all documents in RAM. Also embedded inside the
/// filesystem backend as its read cache.
pub struct MemoryBackend<K: Key> {
    pub(crate) users: RwLock<HashMap<K, IdentityUser<K>>>,
    pub(crate) roles: RwLock<HashMap<K, IdentityRole<K>>>,
}

impl<K: Key> Default for MemoryBackend<K> {
    fn default() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Key> MemoryBackend<K> {
    /// Rewrites membership references in place, returning the ids of the
    /// user documents touched so callers can persist them.
    pub(crate) fn rename_role_refs_local(&self, old: &str, new: &str) -> Vec<K> {
        let mut users = self.users.write();
        let mut touched = Vec::new();
        for (id, user) in users.iter_mut() {
            let mut hit = false;
            for role in user.roles.iter_mut() {
                if role == old {
                    *role = new.to_string();
                    hit = true;
                }
            }
            if hit {
                touched.push(id.clone());
            }
        }
        touched
    }

    /// Drops membership references in place, returning the ids touched.
    pub(crate) fn remove_role_refs_local(&self, normalized_name: &str) -> Vec<K> {
        let mut users = self.users.write();
        let mut touched = Vec::new();
        for (id, user) in users.iter_mut() {
            let before = user.roles.len();
            user.roles.retain(|r| r != normalized_name);
            if user.roles.len() != before {
                touched.push(id.clone());
            }
        }
        touched
    }

    fn check_user_uniqueness(
        &self,
        user: &IdentityUser<K>,
        users: &HashMap<K, IdentityUser<K>>,
    ) -> Result<(), IdentityError> {
        if users
            .values()
            .any(|u| u.id != user.id && u.normalized_user_name == user.normalized_user_name)
        {
            return Err(IdentityError::DuplicateUserName(user.user_name.clone()));
        }

        Ok(())
    }
}

#[async_trait]
impl<K: Key> BackendConnection<K> for MemoryBackend<K> {
    async fn connect(&mut self) -> Result<(), IdentityError> {
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, IdentityError> {
        Ok(true)
    }

    async fn insert_user(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        let mut users = self.users.write();
        if users.contains_key(&user.id) {
            return Err(IdentityError::msg(format!(
                "a user with id {:?} already exists",
                user.id
            )));
        }
        self.check_user_uniqueness(user, &users)?;
        let _ = users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn replace_user(
        &self,
        user: &IdentityUser<K>,
        expected_stamp: &str,
    ) -> Result<(), IdentityError> {
        let mut users = self.users.write();
        match users.get(&user.id) {
            Some(stored) if stored.concurrency_stamp == expected_stamp => {}
            _ => return Err(IdentityError::ConcurrencyFailure),
        }
        self.check_user_uniqueness(user, &users)?;
        let _ = users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn save_user(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        let _ = self.users.write().insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: &K) -> Result<(), IdentityError> {
        if self.users.write().remove(id).is_none() {
            return Err(IdentityError::ConcurrencyFailure);
        }
        Ok(())
    }

    async fn find_user_by_id(&self, id: &K) -> Result<Option<IdentityUser<K>>, IdentityError> {
        Ok(self.users.read().get(id).cloned())
    }

    async fn find_user_by_name(
        &self,
        normalized_user_name: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.normalized_user_name == normalized_user_name)
            .cloned())
    }

    async fn find_user_by_email(
        &self,
        normalized_email: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.normalized_email.as_deref() == Some(normalized_email))
            .cloned())
    }

    async fn find_user_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| {
                u.logins
                    .iter()
                    .any(|l| l.login_provider == login_provider && l.provider_key == provider_key)
            })
            .cloned())
    }

    async fn users_in_role(
        &self,
        normalized_role_name: &str,
    ) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        Ok(self
            .users
            .read()
            .values()
            .filter(|u| u.roles.iter().any(|r| r == normalized_role_name))
            .cloned()
            .collect())
    }

    fn supports_queryable_users(&self) -> bool {
        true
    }

    async fn all_users(&self) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        Ok(self.users.read().values().cloned().collect())
    }

    async fn insert_role(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        let mut roles = self.roles.write();
        if roles.contains_key(&role.id) {
            return Err(IdentityError::msg(format!(
                "a role with id {:?} already exists",
                role.id
            )));
        }
        if roles
            .values()
            .any(|r| r.normalized_name == role.normalized_name)
        {
            return Err(IdentityError::DuplicateRoleName(role.name.clone()));
        }
        let _ = roles.insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn replace_role(
        &self,
        role: &IdentityRole<K>,
        expected_stamp: &str,
    ) -> Result<(), IdentityError> {
        let mut roles = self.roles.write();
        match roles.get(&role.id) {
            Some(stored) if stored.concurrency_stamp == expected_stamp => {}
            _ => return Err(IdentityError::ConcurrencyFailure),
        }
        if roles
            .values()
            .any(|r| r.id != role.id && r.normalized_name == role.normalized_name)
        {
            return Err(IdentityError::DuplicateRoleName(role.name.clone()));
        }
        let _ = roles.insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn save_role(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        let _ = self.roles.write().insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn delete_role(&self, id: &K) -> Result<(), IdentityError> {
        if self.roles.write().remove(id).is_none() {
            return Err(IdentityError::ConcurrencyFailure);
        }
        Ok(())
    }

    async fn find_role_by_id(&self, id: &K) -> Result<Option<IdentityRole<K>>, IdentityError> {
        Ok(self.roles.read().get(id).cloned())
    }

    async fn find_role_by_name(
        &self,
        normalized_name: &str,
    ) -> Result<Option<IdentityRole<K>>, IdentityError> {
        Ok(self
            .roles
            .read()
            .values()
            .find(|r| r.normalized_name == normalized_name)
            .cloned())
    }

    fn supports_queryable_roles(&self) -> bool {
        true
    }

    async fn all_roles(&self) -> Result<Vec<IdentityRole<K>>, IdentityError> {
        Ok(self.roles.read().values().cloned().collect())
    }

    async fn rename_role_references(&self, old: &str, new: &str) -> Result<usize, IdentityError> {
        Ok(self.rename_role_refs_local(old, new).len())
    }

    async fn remove_role_references(&self, normalized_name: &str) -> Result<usize, IdentityError> {
        Ok(self.remove_role_refs_local(normalized_name).len())
    }

    async fn purge(&self) -> Result<usize, IdentityError> {
        let mut users = self.users.write();
        let mut roles = self.roles.write();
        let count = users.len() + roles.len();
        users.clear();
        roles.clear();
        Ok(count)
    }
}
