//! Backend for persisting documents to the local filesystem. Each document
//! is one JSON file; an embedded [`MemoryBackend`] serves as the in-process
//! cache, with files rewritten after each successful memory-level mutation.

use std::path::PathBuf;

use async_trait::async_trait;
use sha3::Digest;
use tokio::fs;

use crate::backend::memory::MemoryBackend;
use crate::backend::BackendConnection;
use crate::misc::IdentityError;
use crate::role_account::IdentityRole;
use crate::user_account::IdentityUser;
use crate::Key;

/// For handling the layout of the underlying directory store.
#[derive(Clone)]
struct DirectoryStore {
    home: PathBuf,
    users: PathBuf,
    roles: PathBuf,
}

/// A backend persisting documents as JSON files under a home directory.
/// All reads are served from the memory cache populated at connect time;
/// writes go to memory first, then to disk.
pub struct FilesystemBackend<K: Key> {
    memory_backend: MemoryBackend<K>,
    home_dir: String,
    dirs: Option<DirectoryStore>,
}

impl<K: Key> From<String> for FilesystemBackend<K> {
    fn from(home_dir: String) -> Self {
        Self {
            home_dir,
            memory_backend: MemoryBackend::default(),
            dirs: None,
        }
    }
}

impl<K: Key> FilesystemBackend<K> {
    fn dirs(&self) -> Result<&DirectoryStore, IdentityError> {
        self.dirs
            .as_ref()
            .ok_or_else(|| IdentityError::Storage("backend is not connected".into()))
    }

    /// File stems are a digest of the id rather than the id itself, keeping
    /// names fixed-length and free of path-hostile characters.
    fn file_stem(id: &K) -> String {
        let digest = sha3::Sha3_256::digest(format!("{id}").as_bytes());
        hex_encode(digest.as_slice())
    }

    fn user_path(&self, id: &K) -> Result<PathBuf, IdentityError> {
        Ok(self.dirs()?.users.join(format!("{}.json", Self::file_stem(id))))
    }

    fn role_path(&self, id: &K) -> Result<PathBuf, IdentityError> {
        Ok(self.dirs()?.roles.join(format!("{}.json", Self::file_stem(id))))
    }

    async fn write_user_file(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        let path = self.user_path(&user.id)?;
        let bytes = serde_json::to_vec(user)?;
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn write_role_file(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        let path = self.role_path(&role.id)?;
        let bytes = serde_json::to_vec(role)?;
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn load_directory<T: serde::de::DeserializeOwned>(
        dir: &PathBuf,
    ) -> Result<Vec<T>, IdentityError> {
        let mut loaded = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json") != Some(true) {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<T>(&bytes) {
                Ok(doc) => loaded.push(doc),
                Err(err) => {
                    tracing::warn!(target: "identity", "Skipping undecipherable document {path:?}: {err}");
                }
            }
        }
        Ok(loaded)
    }

    /// Persists the user documents whose ids were touched by a membership
    /// rewrite. Failures after the first write leave earlier writes intact.
    async fn flush_touched(&self, touched: Vec<K>) -> Result<usize, IdentityError> {
        let count = touched.len();
        for id in touched {
            let user = self
                .memory_backend
                .find_user_by_id(&id)
                .await?
                .ok_or(IdentityError::ConcurrencyFailure)?;
            self.write_user_file(&user).await?;
        }
        Ok(count)
    }
}

#[async_trait]
impl<K: Key> BackendConnection<K> for FilesystemBackend<K> {
    async fn connect(&mut self) -> Result<(), IdentityError> {
        let home = PathBuf::from(&self.home_dir);
        let dirs = DirectoryStore {
            users: home.join("users"),
            roles: home.join("roles"),
            home,
        };

        fs::create_dir_all(&dirs.users).await?;
        fs::create_dir_all(&dirs.roles).await?;

        for user in Self::load_directory::<IdentityUser<K>>(&dirs.users).await? {
            self.memory_backend.save_user(&user).await?;
        }

        for role in Self::load_directory::<IdentityRole<K>>(&dirs.roles).await? {
            self.memory_backend.save_role(&role).await?;
        }

        tracing::info!(target: "identity", "Filesystem backend connected at {:?}", dirs.home);
        self.dirs = Some(dirs);
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, IdentityError> {
        Ok(self.dirs.is_some())
    }

    async fn insert_user(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        self.memory_backend.insert_user(user).await?;
        self.write_user_file(user).await
    }

    async fn replace_user(
        &self,
        user: &IdentityUser<K>,
        expected_stamp: &str,
    ) -> Result<(), IdentityError> {
        self.memory_backend.replace_user(user, expected_stamp).await?;
        self.write_user_file(user).await
    }

    async fn save_user(&self, user: &IdentityUser<K>) -> Result<(), IdentityError> {
        self.memory_backend.save_user(user).await?;
        self.write_user_file(user).await
    }

    async fn delete_user(&self, id: &K) -> Result<(), IdentityError> {
        self.memory_backend.delete_user(id).await?;
        let path = self.user_path(id)?;
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn find_user_by_id(&self, id: &K) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.memory_backend.find_user_by_id(id).await
    }

    async fn find_user_by_name(
        &self,
        normalized_user_name: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.memory_backend.find_user_by_name(normalized_user_name).await
    }

    async fn find_user_by_email(
        &self,
        normalized_email: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.memory_backend.find_user_by_email(normalized_email).await
    }

    async fn find_user_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> Result<Option<IdentityUser<K>>, IdentityError> {
        self.memory_backend
            .find_user_by_login(login_provider, provider_key)
            .await
    }

    async fn users_in_role(
        &self,
        normalized_role_name: &str,
    ) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        self.memory_backend.users_in_role(normalized_role_name).await
    }

    fn supports_queryable_users(&self) -> bool {
        true
    }

    async fn all_users(&self) -> Result<Vec<IdentityUser<K>>, IdentityError> {
        self.memory_backend.all_users().await
    }

    async fn insert_role(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        self.memory_backend.insert_role(role).await?;
        self.write_role_file(role).await
    }

    async fn replace_role(
        &self,
        role: &IdentityRole<K>,
        expected_stamp: &str,
    ) -> Result<(), IdentityError> {
        self.memory_backend.replace_role(role, expected_stamp).await?;
        self.write_role_file(role).await
    }

    async fn save_role(&self, role: &IdentityRole<K>) -> Result<(), IdentityError> {
        self.memory_backend.save_role(role).await?;
        self.write_role_file(role).await
    }

    async fn delete_role(&self, id: &K) -> Result<(), IdentityError> {
        self.memory_backend.delete_role(id).await?;
        let path = self.role_path(id)?;
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn find_role_by_id(&self, id: &K) -> Result<Option<IdentityRole<K>>, IdentityError> {
        self.memory_backend.find_role_by_id(id).await
    }

    async fn find_role_by_name(
        &self,
        normalized_name: &str,
    ) -> Result<Option<IdentityRole<K>>, IdentityError> {
        self.memory_backend.find_role_by_name(normalized_name).await
    }

    fn supports_queryable_roles(&self) -> bool {
        true
    }

    async fn all_roles(&self) -> Result<Vec<IdentityRole<K>>, IdentityError> {
        self.memory_backend.all_roles().await
    }

    async fn rename_role_references(&self, old: &str, new: &str) -> Result<usize, IdentityError> {
        let touched = self.memory_backend.rename_role_refs_local(old, new);
        self.flush_touched(touched).await
    }

    async fn remove_role_references(&self, normalized_name: &str) -> Result<usize, IdentityError> {
        let touched = self.memory_backend.remove_role_refs_local(normalized_name);
        self.flush_touched(touched).await
    }

    async fn purge(&self) -> Result<usize, IdentityError> {
        let count = self.memory_backend.purge().await?;
        let dirs = self.dirs()?;
        if fs::try_exists(&dirs.home).await? {
            fs::remove_dir_all(&dirs.home).await?;
        }
        Ok(count)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
