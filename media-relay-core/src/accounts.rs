//! Account lookup backed by configuration.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::AccountConfig;
use crate::contract::{Account, AccountDirectory};
use crate::error::BoxError;

/// [`AccountDirectory`] over the accounts declared in the config file.
#[derive(Debug, Default, Clone)]
pub struct StaticAccountDirectory {
    accounts: HashMap<String, Account>,
}

impl StaticAccountDirectory {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn from_config(accounts: &[AccountConfig]) -> Self {
        Self::new(accounts.iter().map(|c| Account {
            id: c.id.clone(),
            remote_token: c.remote_token.clone(),
            remote_account_id: c.remote_account_id.clone(),
            start_date: c.start_date,
        }))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountDirectory for StaticAccountDirectory {
    async fn resolve(&self, account_id: &str) -> Result<Option<Account>, BoxError> {
        Ok(self.accounts.get(account_id).cloned())
    }
}
