mod common;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use doc_identity::backend::filesystem_backend::FilesystemBackend;
use doc_identity::backend::memory::MemoryBackend;
use doc_identity::prelude::*;

use common::{setup_log, test_role, test_user, unique, TestHasher};

fn scratch_dir() -> (PathBuf, String) {
    let dir = std::env::temp_dir()
        .join("doc-identity-tests")
        .join(uuid::Uuid::new_v4().simple().to_string());
    let url = format!("file:{}", dir.display());
    (dir, url)
}

async fn filesystem_manager(url: &str) -> UserManager<String> {
    setup_log();
    let backend = match BackendType::new(url).unwrap() {
        BackendType::Filesystem(path) => FilesystemBackend::<String>::from(path),
        BackendType::InMemory => unreachable!(),
    };
    let handler = PersistenceHandler::create(backend).await.unwrap();
    UserManager::new(UserStore::new(handler), Arc::new(TestHasher))
}

#[test]
fn backend_urls_parse() {
    assert_eq!(BackendType::new("memory").unwrap(), BackendType::InMemory);
    assert_eq!(
        BackendType::new("file:/tmp/identity").unwrap(),
        BackendType::Filesystem("/tmp/identity".to_string())
    );
    assert!(BackendType::new("mysql://nope").is_err());
}

#[tokio::test]
async fn filesystem_documents_survive_reconnect() {
    let (dir, url) = scratch_dir();
    let name = unique("durable");
    let id;

    {
        let users = filesystem_manager(&url).await;
        let mut user = test_user(&name);
        id = user.id.clone();
        users.create(&mut user).await.unwrap();
        users
            .add_claim(&mut user, &Claim::new("team", "ops"))
            .await
            .unwrap();
    }

    let user_files = std::fs::read_dir(dir.join("users")).unwrap().count();
    assert_eq!(user_files, 1);

    let users = filesystem_manager(&url).await;
    let found = users.find_by_name(&name).await.unwrap().unwrap();
    assert_eq!(found.id, id);
    assert_eq!(found.claims.len(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn filesystem_delete_removes_the_document_file() {
    let (dir, url) = scratch_dir();
    let users = filesystem_manager(&url).await;

    let mut user = test_user(&unique("ephemeral"));
    users.create(&mut user).await.unwrap();
    assert_eq!(std::fs::read_dir(dir.join("users")).unwrap().count(), 1);

    users.delete(&user).await.unwrap();
    assert_eq!(std::fs::read_dir(dir.join("users")).unwrap().count(), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn purge_clears_documents_and_files() {
    let (dir, _url) = scratch_dir();
    setup_log();

    let backend = FilesystemBackend::<String>::from(dir.display().to_string());
    let handler = PersistenceHandler::create(backend).await.unwrap();
    let users = UserManager::new(UserStore::new(handler.clone()), Arc::new(TestHasher));
    let roles = RoleManager::new(RoleStore::new(handler.clone()));

    users.create(&mut test_user(&unique("gone"))).await.unwrap();
    roles.create(&mut test_role(&unique("gone"))).await.unwrap();

    let removed = handler.purge().await.unwrap();
    assert_eq!(removed, 2);
    assert!(!dir.exists());
    assert!(users.users().await.unwrap().is_empty());
}

#[tokio::test]
async fn memory_replace_is_compare_and_swap() {
    let backend = MemoryBackend::<String>::default();
    let handler = PersistenceHandler::create(backend).await.unwrap();

    let mut user = test_user(&unique("cas"));
    user.normalized_user_name = user.user_name.to_uppercase();
    handler.insert_user(&user).await.unwrap();

    let stale = user.concurrency_stamp.clone();
    user.concurrency_stamp = "rotated".to_string();
    handler.replace_user(&user, &stale).await.unwrap();

    let err = handler.replace_user(&user, &stale).await.unwrap_err();
    assert_eq!(err.code(), "ConcurrencyFailure");

    let err = handler
        .delete_user(&"missing-id".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ConcurrencyFailure");
}

/// A backend exposing only the mandatory surface, to pin the trait's
/// default capability answers.
struct NullBackend;

macro_rules! unavailable {
    () => {
        Err(IdentityError::Storage("unavailable".to_string()))
    };
}

#[async_trait]
impl BackendConnection<String> for NullBackend {
    async fn connect(&mut self) -> Result<(), IdentityError> {
        Ok(())
    }
    async fn is_connected(&self) -> Result<bool, IdentityError> {
        Ok(true)
    }
    async fn insert_user(&self, _: &IdentityUser<String>) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn replace_user(
        &self,
        _: &IdentityUser<String>,
        _: &str,
    ) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn save_user(&self, _: &IdentityUser<String>) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn delete_user(&self, _: &String) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn find_user_by_id(
        &self,
        _: &String,
    ) -> Result<Option<IdentityUser<String>>, IdentityError> {
        unavailable!()
    }
    async fn find_user_by_name(
        &self,
        _: &str,
    ) -> Result<Option<IdentityUser<String>>, IdentityError> {
        unavailable!()
    }
    async fn find_user_by_email(
        &self,
        _: &str,
    ) -> Result<Option<IdentityUser<String>>, IdentityError> {
        unavailable!()
    }
    async fn find_user_by_login(
        &self,
        _: &str,
        _: &str,
    ) -> Result<Option<IdentityUser<String>>, IdentityError> {
        unavailable!()
    }
    async fn users_in_role(&self, _: &str) -> Result<Vec<IdentityUser<String>>, IdentityError> {
        unavailable!()
    }
    async fn insert_role(&self, _: &IdentityRole<String>) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn replace_role(
        &self,
        _: &IdentityRole<String>,
        _: &str,
    ) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn save_role(&self, _: &IdentityRole<String>) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn delete_role(&self, _: &String) -> Result<(), IdentityError> {
        unavailable!()
    }
    async fn find_role_by_id(
        &self,
        _: &String,
    ) -> Result<Option<IdentityRole<String>>, IdentityError> {
        unavailable!()
    }
    async fn find_role_by_name(
        &self,
        _: &str,
    ) -> Result<Option<IdentityRole<String>>, IdentityError> {
        unavailable!()
    }
    async fn rename_role_references(&self, _: &str, _: &str) -> Result<usize, IdentityError> {
        unavailable!()
    }
    async fn remove_role_references(&self, _: &str) -> Result<usize, IdentityError> {
        unavailable!()
    }
    async fn purge(&self) -> Result<usize, IdentityError> {
        unavailable!()
    }
}

#[tokio::test]
async fn queryability_defaults_to_unsupported() {
    let handler = PersistenceHandler::create(NullBackend).await.unwrap();
    let users = UserManager::new(UserStore::new(handler.clone()), Arc::new(TestHasher));
    let roles = RoleManager::new(RoleStore::new(handler));

    assert!(!users.supports_queryable_users());
    assert!(!roles.supports_queryable_roles());
    assert_eq!(users.users().await.unwrap_err().code(), "NotSupported");
    assert_eq!(roles.roles().await.unwrap_err().code(), "NotSupported");
}
