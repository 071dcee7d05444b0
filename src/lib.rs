//! Identity persistence for document-oriented stores.
//!
//! This crate models users and roles as self-contained documents: each user
//! document embeds its claims, external logins, authentication tokens, and
//! role-membership references, so deleting a user is a single document
//! removal. Above the documents sit stores (raw persistence operations) and
//! managers (normalization, validation, credential orchestration, logging).
//!
//! Backends plug in beneath everything through
//! [`backend::BackendConnection`]; in-memory and filesystem backends ship
//! in-tree.

#![forbid(unsafe_code)]
#![deny(trivial_numeric_casts, unused_extern_crates, unused_import_braces)]

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Requirements on an entity key type. Any clonable, hashable, printable,
/// serde-compatible type qualifies; `String` and `uuid::Uuid` are typical.
pub trait Key:
    Clone + Eq + Hash + Debug + Display + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> Key for T where
    T: Clone + Eq + Hash + Debug + Display + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Pluggable document backends and the shared persistence handler
pub mod backend;
/// Injected credential capabilities (password hashing, purpose-bound tokens)
pub mod credentials;
/// Error types and shared helpers
pub mod misc;
/// Lookup normalization
pub mod normalization;
/// Identity policy options
pub mod options;
/// Role documents and embedded role claims
pub mod role_account;
/// High-level role orchestration
pub mod role_manager;
/// Store-level role operations
pub mod role_store;
/// User documents and embedded records
pub mod user_account;
/// High-level user orchestration
pub mod user_manager;
/// Store-level user operations
pub mod user_store;
/// Validator pipeline
pub mod validation;

/// The most commonly-imported items.
pub mod prelude {
    pub use crate::backend::{BackendConnection, BackendType, PersistenceHandler};
    pub use crate::credentials::{PasswordHasher, UserTokenProvider};
    pub use crate::misc::IdentityError;
    pub use crate::normalization::{LookupNormalizer, UpperInvariantNormalizer};
    pub use crate::options::IdentityOptions;
    pub use crate::role_account::IdentityRole;
    pub use crate::role_manager::RoleManager;
    pub use crate::role_store::RoleStore;
    pub use crate::user_account::{Claim, IdentityUser, UserLoginInfo};
    pub use crate::user_manager::UserManager;
    pub use crate::user_store::{RecordFactories, UserStore};
    pub use crate::Key;
}
