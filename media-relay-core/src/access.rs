//! Access gate in front of the pipeline.
//!
//! The orchestrator trusts the account id it is handed; callers authenticate
//! a principal here first and check it may act on that account.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::AccessConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("no credential presented")]
    MissingCredential,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("principal {principal} may not act on account {account_id}")]
    Forbidden {
        principal: String,
        account_id: String,
    },
}

/// Which accounts a principal may run the pipeline for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    AllAccounts,
    Account(String),
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub scope: AccessScope,
}

impl Principal {
    pub fn authorize(&self, account_id: &str) -> Result<(), AccessError> {
        match &self.scope {
            AccessScope::AllAccounts => Ok(()),
            AccessScope::Account(id) if id == account_id => Ok(()),
            AccessScope::Account(_) => Err(AccessError::Forbidden {
                principal: self.name.clone(),
                account_id: account_id.to_string(),
            }),
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Principal, AccessError>;
}

/// Hex sha256 digest of a key, as stored in the config file.
pub fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare two hex digests without exiting at the first differing byte.
fn digests_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// [`Authenticator`] comparing a presented key against a configured digest.
#[derive(Debug, Clone)]
pub struct StaticKeyGate {
    digest: String,
    scope: AccessScope,
}

impl StaticKeyGate {
    pub fn new(digest: impl Into<String>, scope: AccessScope) -> Self {
        Self {
            digest: digest.into().to_ascii_lowercase(),
            scope,
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        let scope = match &config.account {
            Some(id) => AccessScope::Account(id.clone()),
            None => AccessScope::AllAccounts,
        };
        Self::new(config.key_sha256.clone(), scope)
    }
}

#[async_trait]
impl Authenticator for StaticKeyGate {
    async fn authenticate(&self, credential: &str) -> Result<Principal, AccessError> {
        if credential.is_empty() {
            return Err(AccessError::MissingCredential);
        }
        if !digests_match(&key_digest(credential), &self.digest) {
            tracing::warn!("Rejected operator key");
            return Err(AccessError::InvalidCredential);
        }
        Ok(Principal {
            name: "operator".to_string(),
            scope: self.scope.clone(),
        })
    }
}
