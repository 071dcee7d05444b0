//! Role principal documents and their embedded claim records.
//!
//! Roles are referenced from user documents by normalized name, not by a
//! foreign-key join, which makes membership queries and rename propagation
//! store-level responsibilities (see [`crate::role_store`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::misc::generate_stamp;
use crate::user_account::Claim;
use crate::Key;

/// A claim record embedded in a role document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRoleClaim {
    pub claim_type: String,
    pub claim_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl IdentityRoleClaim {
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

    pub fn matches_exact(&self, claim: &Claim) -> bool {
        self.claim_type == claim.claim_type
            && self.claim_value == claim.claim_value
            && (claim.issuer.is_none() || self.issuer == claim.issuer)
    }
}

/// A role principal document. `normalized_name` is unique across all roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRole<K> {
    pub id: K,
    pub name: String,
    #[serde(default)]
    pub normalized_name: String,
    pub concurrency_stamp: String,
    #[serde(default)]
    pub claims: Vec<IdentityRoleClaim>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl<K: Key> IdentityRole<K> {
    pub fn new<N: Into<String>>(id: K, name: N) -> Self {
        Self {
            id,
            name: name.into(),
            normalized_name: String::new(),
            concurrency_stamp: generate_stamp(),
            claims: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}
