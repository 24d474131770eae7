use log::{debug, info};
use primitive_types::U256;
use std::sync::Arc;
use thiserror::Error;

use crate::state::{AccountState, Delta, InsufficientFunds, StateError};
use crate::store::{
    DocumentStore, Filter, PENDING_TRANSACTIONS, StoreError, find_as, to_document,
};
use crate::transaction::{Opcode, Transaction};
use crate::wallet::{is_valid_address, recover_address};

#[derive(Error, Debug)]
pub enum TxError {
    #[error("transaction hash does not match its contents")]
    HashMismatch,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("signature recovers to {recovered}, not sender {from}")]
    SenderMismatch { from: String, recovered: String },
    #[error("sender account {0} does not exist")]
    UnknownAccount(String),
    #[error("opcode `{0:?}` cannot be submitted as a transaction")]
    UnsupportedOpcode(Opcode),
    #[error("amount must be a positive integer")]
    NonPositiveAmount,
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),
    #[error("recipient `{0}` is not a valid checksum address")]
    InvalidRecipient(String),
    #[error("index {got} already used (account nonce is {expected})")]
    StaleIndex { expected: u64, got: u64 },
    #[error("index {got} does not match account nonce {expected}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("balance of {0} would overflow")]
    Overflow(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<StateError> for TxError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::InsufficientFunds(e) => TxError::InsufficientFunds(e),
            StateError::Overflow(addr) => TxError::Overflow(addr),
            StateError::Store(e) => TxError::Store(e),
        }
    }
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// A transaction with the same signature is already pending.
    Duplicate,
}

/// Whether clients may submit the opcode. Coinbase only ever comes from a block.
fn admissible(opcode: Opcode) -> bool {
    match opcode {
        Opcode::Coinbase => false,
        Opcode::Receive => true,
    }
}

/// Stateless checks: hash, signature, opcode, amount and recipient.
pub fn verify(tx: &Transaction) -> Result<(), TxError> {
    if tx.compute_hash() != tx.hash {
        return Err(TxError::HashMismatch);
    }
    verify_signature(tx)?;
    if !admissible(tx.opcode) {
        return Err(TxError::UnsupportedOpcode(tx.opcode));
    }
    if tx.amount.is_zero() {
        return Err(TxError::NonPositiveAmount);
    }
    if !is_valid_address(&tx.to) {
        return Err(TxError::InvalidRecipient(tx.to.clone()));
    }
    Ok(())
}

fn verify_signature(tx: &Transaction) -> Result<(), TxError> {
    if !tx.digest_matches() {
        return Err(TxError::InvalidSignature(
            "digest does not cover this transaction".into(),
        ));
    }
    let recovered =
        recover_address(&tx.sig).map_err(|e| TxError::InvalidSignature(e.to_string()))?;
    if recovered != tx.from {
        return Err(TxError::SenderMismatch {
            from: tx.from.clone(),
            recovered,
        });
    }
    Ok(())
}

fn sig_filter(tx: &Transaction) -> Result<Filter, StoreError> {
    Ok(Filter::eq("sig", to_document(&tx.sig)?))
}

/// Applies transactions to account state and owns the pending pool.
#[derive(Clone)]
pub struct Vm {
    accounts: AccountState,
    store: Arc<dyn DocumentStore>,
}

impl Vm {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            accounts: AccountState::new(store.clone()),
            store,
        }
    }

    pub fn accounts(&self) -> &AccountState {
        &self.accounts
    }

    /// Validate and insert into the pending pool, keyed by signature.
    pub async fn admit(&self, tx: &Transaction) -> Result<Admission, TxError> {
        if tx.compute_hash() != tx.hash {
            return Err(TxError::HashMismatch);
        }
        verify_signature(tx)?;

        if !self.accounts.exists(&tx.from).await? {
            return Err(TxError::UnknownAccount(tx.from.clone()));
        }
        if !admissible(tx.opcode) {
            return Err(TxError::UnsupportedOpcode(tx.opcode));
        }
        if tx.amount.is_zero() {
            return Err(TxError::NonPositiveAmount);
        }

        let sender = self.accounts.get_balance(&tx.from).await?;
        if sender.balance < tx.amount {
            return Err(InsufficientFunds {
                address: sender.address,
                balance: sender.balance,
                needed: tx.amount,
            }
            .into());
        }
        if !is_valid_address(&tx.to) {
            return Err(TxError::InvalidRecipient(tx.to.clone()));
        }
        if tx.index < sender.nonce {
            return Err(TxError::StaleIndex {
                expected: sender.nonce,
                got: tx.index,
            });
        }

        let filter = sig_filter(tx)?;
        if !self.store.find(PENDING_TRANSACTIONS, &filter).await?.is_empty() {
            debug!("tx {} already pending", tx.hash);
            return Ok(Admission::Duplicate);
        }
        self.store
            .insert(PENDING_TRANSACTIONS, vec![to_document(tx)?])
            .await?;
        info!(
            "tx {} admitted: {} -> {} amount={} index={}",
            tx.hash, tx.from, tx.to, tx.amount, tx.index
        );
        Ok(Admission::Admitted)
    }

    /// Execute during block acceptance. On any failure nothing is changed.
    pub async fn apply(&self, tx: &Transaction) -> Result<(), TxError> {
        let sender = self.accounts.get_balance(&tx.from).await?;
        if sender.nonce != tx.index {
            return Err(TxError::NonceMismatch {
                expected: sender.nonce,
                got: tx.index,
            });
        }

        self.execute(tx).await?;

        self.store
            .delete(PENDING_TRANSACTIONS, &sig_filter(tx)?)
            .await?;
        self.accounts.increment_nonce(&tx.from).await?;
        self.prune_stale(&tx.from, sender.nonce + 1).await?;
        Ok(())
    }

    /// Drop pending transfers of `sender` whose index the nonce has passed.
    async fn prune_stale(&self, sender: &str, nonce: u64) -> Result<(), StoreError> {
        let pending: Vec<Transaction> = find_as(
            self.store.as_ref(),
            PENDING_TRANSACTIONS,
            &Filter::eq("from", sender),
        )
        .await?;
        for stale in pending.iter().filter(|p| p.index < nonce) {
            self.store
                .delete(PENDING_TRANSACTIONS, &sig_filter(stale)?)
                .await?;
            debug!("pending tx {} dropped: index {} is spent", stale.hash, stale.index);
        }
        Ok(())
    }

    async fn execute(&self, tx: &Transaction) -> Result<(), TxError> {
        match tx.opcode {
            Opcode::Receive => {
                self.accounts
                    .apply_delta(&tx.from, Delta::Debit(tx.amount))
                    .await?;
                if let Err(e) = self
                    .accounts
                    .apply_delta(&tx.to, Delta::Credit(tx.amount))
                    .await
                {
                    // undo the debit so the transfer stays all-or-nothing
                    self.accounts
                        .apply_delta(&tx.from, Delta::Credit(tx.amount))
                        .await?;
                    return Err(e.into());
                }
                Ok(())
            }
            Opcode::Coinbase => Err(TxError::UnsupportedOpcode(tx.opcode)),
        }
    }

    /// Block reward credit. Authorized by consensus, so no nonce or signature checks.
    pub async fn coinbase_mint(&self, to: &str, amount: U256) -> Result<(), TxError> {
        self.accounts.apply_delta(to, Delta::Credit(amount)).await?;
        Ok(())
    }

    pub async fn pending(&self) -> Result<Vec<Transaction>, StoreError> {
        find_as(self.store.as_ref(), PENDING_TRANSACTIONS, &Filter::all()).await
    }
}
