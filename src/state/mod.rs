pub mod merkle;

use log::debug;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::store::{
    ACCOUNTS, DocumentStore, Filter, StoreError, Update, find_as, find_one_as, to_document,
};
use crate::util::u256_dec;
use crate::wallet::{checksum_address, keccak256};
use merkle::merkle_root;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub address: String,
    #[serde(with = "u256_dec")]
    pub balance: U256,
    #[serde(default)]
    pub nonce: u64,
}

impl Account {
    pub fn empty(address: String) -> Self {
        Self {
            address,
            balance: U256::zero(),
            nonce: 0,
        }
    }

    /// Keccak-256 of the canonical JSON encoding (field order is fixed by the struct).
    pub fn leaf_hash(&self) -> Result<[u8; 32], StoreError> {
        Ok(keccak256(&serde_json::to_vec(self)?))
    }
}

/// Signed balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Credit(U256),
    Debit(U256),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("insufficient funds in {address}: balance {balance}, needed {needed}")]
pub struct InsufficientFunds {
    pub address: String,
    pub balance: U256,
    pub needed: U256,
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),
    #[error("balance of {0} would overflow")]
    Overflow(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Canonical storage key. Unparseable input is kept verbatim so lookups simply miss.
pub fn account_key(address: &str) -> String {
    checksum_address(address).unwrap_or_else(|_| address.to_string())
}

/// Account balances and replay nonces, persisted in the `accounts` collection.
#[derive(Clone)]
pub struct AccountState {
    store: Arc<dyn DocumentStore>,
}

impl AccountState {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn find(&self, address: &str) -> Result<Option<Account>, StoreError> {
        find_one_as(self.store.as_ref(), ACCOUNTS, &Filter::eq("address", address)).await
    }

    /// A missing account reads as zero balance, zero nonce.
    pub async fn get_balance(&self, address: &str) -> Result<Account, StoreError> {
        let key = account_key(address);
        Ok(self.find(&key).await?.unwrap_or_else(|| Account::empty(key)))
    }

    pub async fn exists(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self.find(&account_key(address)).await?.is_some())
    }

    pub async fn apply_delta(&self, address: &str, delta: Delta) -> Result<(), StateError> {
        let key = account_key(address);
        let existing = self.find(&key).await?;

        let balance = match (existing, delta) {
            (None, Delta::Credit(amount)) => {
                if !amount.is_zero() {
                    let account = Account {
                        address: key.clone(),
                        balance: amount,
                        nonce: 0,
                    };
                    self.store.insert(ACCOUNTS, vec![to_document(&account)?]).await?;
                    debug!("account {key} created with {amount}");
                }
                return Ok(());
            }
            (None, Delta::Debit(amount)) => {
                if amount.is_zero() {
                    return Ok(());
                }
                return Err(InsufficientFunds {
                    address: key,
                    balance: U256::zero(),
                    needed: amount,
                }
                .into());
            }
            (Some(account), Delta::Credit(amount)) => account
                .balance
                .checked_add(amount)
                .ok_or_else(|| StateError::Overflow(key.clone()))?,
            (Some(account), Delta::Debit(amount)) => {
                account
                    .balance
                    .checked_sub(amount)
                    .ok_or_else(|| InsufficientFunds {
                        address: key.clone(),
                        balance: account.balance,
                        needed: amount,
                    })?
            }
        };

        self.store
            .update(
                ACCOUNTS,
                &Filter::eq("address", key.as_str()),
                &Update::set("balance", balance.to_string()),
            )
            .await?;
        Ok(())
    }

    pub async fn increment_nonce(&self, address: &str) -> Result<(), StoreError> {
        let key = account_key(address);
        self.store
            .update(ACCOUNTS, &Filter::eq("address", key.as_str()), &Update::inc("nonce", 1))
            .await?;
        Ok(())
    }

    /// Every account, ascending by lowercase address.
    pub async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> =
            find_as(self.store.as_ref(), ACCOUNTS, &Filter::all()).await?;
        accounts.sort_by_key(|a| a.address.to_ascii_lowercase());
        Ok(accounts)
    }

    /// Merkle root over all accounts in canonical order, `0x`-prefixed hex.
    pub async fn compute_state_root(&self) -> Result<String, StoreError> {
        let leaves = self
            .accounts()
            .await?
            .iter()
            .map(Account::leaf_hash)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("0x{}", hex::encode(merkle_root(&leaves))))
    }

    /// Seeds the account set once; returns false when accounts already exist.
    pub async fn init_genesis_accounts(&self, seed: &[Account]) -> Result<bool, StoreError> {
        if !self.store.find(ACCOUNTS, &Filter::all()).await?.is_empty() {
            return Ok(false);
        }
        let docs = seed
            .iter()
            .map(|a| {
                to_document(&Account {
                    address: account_key(&a.address),
                    ..a.clone()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.store.insert(ACCOUNTS, docs).await?;
        Ok(true)
    }
}
