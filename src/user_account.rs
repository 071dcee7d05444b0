//! User principal documents and the records embedded in them.
//!
//! A [`IdentityUser`] is one document in the backing store: the scalar
//! identity fields plus the claim, login, token, and role-membership
//! sub-collections it exclusively owns. Sub-records never exist outside
//! their owner, so deleting the owner document cascades trivially.
//!
//! Every record carries a flattened `extra` map so that deployments can
//! persist additional fields (issuer metadata, audit timestamps, custom
//! context) without this crate knowing their shape. Stores accept factory
//! callbacks for constructing enriched records; see
//! [`crate::user_store::RecordFactories`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::misc::generate_stamp;
use crate::Key;

/// A caller-facing claim: a typed statement about a subject, optionally
/// qualified by the issuing authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_type: String,
    pub claim_value: String,
    pub issuer: Option<String>,
}

impl Claim {
    pub fn new<T: Into<String>, V: Into<String>>(claim_type: T, claim_value: V) -> Self {
        Self {
            claim_type: claim_type.into(),
            claim_value: claim_value.into(),
            issuer: None,
        }
    }

    pub fn with_issuer<T: Into<String>, V: Into<String>, I: Into<String>>(
        claim_type: T,
        claim_value: V,
        issuer: I,
    ) -> Self {
        Self {
            claim_type: claim_type.into(),
            claim_value: claim_value.into(),
            issuer: Some(issuer.into()),
        }
    }
}

/// Caller-facing description of an external login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLoginInfo {
    pub login_provider: String,
    pub provider_key: String,
    pub provider_display_name: Option<String>,
}

impl UserLoginInfo {
    pub fn new<P: Into<String>, K: Into<String>>(login_provider: P, provider_key: K) -> Self {
        Self {
            login_provider: login_provider.into(),
            provider_key: provider_key.into(),
            provider_display_name: None,
        }
    }
}

/// A claim record embedded in a user document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUserClaim {
    pub claim_type: String,
    pub claim_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IdentityUserClaim {
    pub fn from_claim(claim: &Claim) -> Self {
        Self {
            claim_type: claim.claim_type.clone(),
            claim_value: claim.claim_value.clone(),
            issuer: claim.issuer.clone(),
            extra: BTreeMap::new(),
        }
    }

    pub fn to_claim(&self) -> Claim {
        Claim {
            claim_type: self.claim_type.clone(),
            claim_value: self.claim_value.clone(),
            issuer: self.issuer.clone(),
        }
    }

    /// Type+value equality, the match used by replace operations.
    pub fn matches_type_value(&self, claim: &Claim) -> bool {
        self.claim_type == claim.claim_type && self.claim_value == claim.claim_value
    }

    /// Exact match for removal: type and value always, issuer only when the
    /// probe specifies one.
    pub fn matches_exact(&self, claim: &Claim) -> bool {
        self.matches_type_value(claim)
            && (claim.issuer.is_none() || self.issuer == claim.issuer)
    }

    /// Rewrites this record from `claim`. The stored issuer survives unless
    /// the replacement claim supplies its own.
    pub fn apply(&mut self, claim: &Claim) {
        self.claim_type = claim.claim_type.clone();
        self.claim_value = claim.claim_value.clone();
        if claim.issuer.is_some() {
            self.issuer = claim.issuer.clone();
        }
    }
}

/// An external-login record embedded in a user document. The
/// `(login_provider, provider_key)` pair maps to at most one user
/// across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUserLogin {
    pub login_provider: String,
    pub provider_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_display_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IdentityUserLogin {
    pub fn from_login(login: &UserLoginInfo) -> Self {
        Self {
            login_provider: login.login_provider.clone(),
            provider_key: login.provider_key.clone(),
            provider_display_name: login.provider_display_name.clone(),
            extra: BTreeMap::new(),
        }
    }

    pub fn to_login(&self) -> UserLoginInfo {
        UserLoginInfo {
            login_provider: self.login_provider.clone(),
            provider_key: self.provider_key.clone(),
            provider_display_name: self.provider_display_name.clone(),
        }
    }
}

/// An authentication-token record embedded in a user document, keyed by
/// `(login_provider, name)` under its owner. Writes upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUserToken {
    pub login_provider: String,
    pub name: String,
    pub value: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IdentityUserToken {
    pub fn new<P: Into<String>, N: Into<String>, V: Into<String>>(
        login_provider: P,
        name: N,
        value: V,
    ) -> Self {
        Self {
            login_provider: login_provider.into(),
            name: name.into(),
            value: value.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// A user principal document.
///
/// `id` is assigned at creation and never changes; `normalized_user_name`
/// is unique across all users. `concurrency_stamp` is an opaque version
/// token swapped on every successful update; `security_stamp` is an opaque
/// credential-invalidation marker regenerated whenever credentials change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityUser<K> {
    pub id: K,
    pub user_name: String,
    #[serde(default)]
    pub normalized_user_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub normalized_email: Option<String>,
    #[serde(default)]
    pub email_confirmed: bool,
    #[serde(default)]
    pub password_hash: Option<String>,
    pub security_stamp: String,
    pub concurrency_stamp: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub phone_number_confirmed: bool,
    #[serde(default)]
    pub two_factor_enabled: bool,
    #[serde(default)]
    pub lockout_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lockout_enabled: bool,
    #[serde(default)]
    pub access_failed_count: u32,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub claims: Vec<IdentityUserClaim>,
    #[serde(default)]
    pub logins: Vec<IdentityUserLogin>,
    #[serde(default)]
    pub tokens: Vec<IdentityUserToken>,
    /// Normalized role names this user belongs to.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl<K: Key> IdentityUser<K> {
    pub fn new<N: Into<String>>(id: K, user_name: N) -> Self {
        Self {
            id,
            user_name: user_name.into(),
            normalized_user_name: String::new(),
            email: None,
            normalized_email: None,
            email_confirmed: false,
            password_hash: None,
            security_stamp: generate_stamp(),
            concurrency_stamp: generate_stamp(),
            phone_number: None,
            phone_number_confirmed: false,
            two_factor_enabled: false,
            lockout_end: None,
            lockout_enabled: true,
            access_failed_count: 0,
            created_on: Utc::now(),
            claims: Vec::new(),
            logins: Vec::new(),
            tokens: Vec::new(),
            roles: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_email<E: Into<String>>(mut self, email: E) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Position of the token keyed by `(login_provider, name)`, if held.
    pub(crate) fn token_position(&self, login_provider: &str, name: &str) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| t.login_provider == login_provider && t.name == name)
    }
}
