#![allow(dead_code)]

use std::sync::Arc;

use doc_identity::prelude::*;
use doc_identity::backend::memory::MemoryBackend;

pub fn setup_log() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Trivial hasher double. The "hash" is the password behind a marker prefix.
pub struct TestHasher;

impl PasswordHasher for TestHasher {
    fn hash_password(&self, password: &str) -> Result<String, IdentityError> {
        Ok(format!("hashed::{password}"))
    }

    fn verify_password(&self, hash: &str, password: &str) -> Result<bool, IdentityError> {
        Ok(hash == format!("hashed::{password}"))
    }
}

pub async fn handler() -> PersistenceHandler<String> {
    PersistenceHandler::create(MemoryBackend::default())
        .await
        .unwrap()
}

/// A user manager and role manager sharing one in-memory backend.
pub async fn managers() -> (UserManager<String>, RoleManager<String>) {
    setup_log();
    let handler = handler().await;
    let user_manager = UserManager::new(UserStore::new(handler.clone()), Arc::new(TestHasher));
    let role_manager = RoleManager::new(RoleStore::new(handler));
    (user_manager, role_manager)
}

pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

pub fn test_user(name: &str) -> IdentityUser<String> {
    IdentityUser::new(uuid::Uuid::new_v4().to_string(), name)
}

pub fn test_role(name: &str) -> IdentityRole<String> {
    IdentityRole::new(uuid::Uuid::new_v4().to_string(), name)
}
