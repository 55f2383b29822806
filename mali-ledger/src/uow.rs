//! Atomic unit of work over the ledger store
//!
//! A [`UnitOfWork`] is created after the operation's row locks are held. It
//! loads rows on first touch, stages every mutation in memory (reads observe
//! the staged state), and commits everything in one atomic batch. Dropping
//! the unit without committing discards all staged work, so a validation
//! failure at any point leaves the store untouched.
//!
//! Higher-level orchestrations compose multiple engine calls into one larger
//! atomic scope by passing the same unit of work through.

use crate::{
    error::{Error, Result},
    lock::RowLocks,
    storage::{Storage, WriteSet},
    types::{AccountBalance, EscrowHold, TransactionRecord, TreasuryBalance, UserId},
};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// One atomic scope: staged rows plus the locks that protect them
pub(crate) struct UnitOfWork<'a> {
    storage: &'a Storage,
    _locks: RowLocks,
    accounts: HashMap<UserId, AccountBalance>,
    treasury: Option<TreasuryBalance>,
    escrows: HashMap<Uuid, EscrowHold>,
    records: Vec<TransactionRecord>,
    touched: BTreeSet<UserId>,
}

impl<'a> UnitOfWork<'a> {
    /// Begin a unit of work under already-held locks
    pub fn begin(storage: &'a Storage, locks: RowLocks) -> Self {
        Self {
            storage,
            _locks: locks,
            accounts: HashMap::new(),
            treasury: None,
            escrows: HashMap::new(),
            records: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    /// Mutable access to an account row; fails if the account was never
    /// provisioned
    pub fn account(&mut self, user_id: &UserId) -> Result<&mut AccountBalance> {
        if !self.accounts.contains_key(user_id) {
            let account = self
                .storage
                .get_account(user_id)?
                .ok_or_else(|| Error::AccountNotFound(user_id.to_string()))?;
            self.accounts.insert(user_id.clone(), account);
        }
        self.touched.insert(user_id.clone());
        Ok(self.accounts.get_mut(user_id).expect("staged above"))
    }

    /// Mutable access to an account row, provisioning a zero-balance row if
    /// absent (transfer-receiver path only)
    pub fn account_or_create(&mut self, user_id: &UserId) -> Result<&mut AccountBalance> {
        if !self.accounts.contains_key(user_id) {
            let account = match self.storage.get_account(user_id)? {
                Some(account) => account,
                None => {
                    tracing::debug!(user_id = %user_id, "Auto-provisioning receiver account");
                    AccountBalance::new(user_id.clone())
                }
            };
            self.accounts.insert(user_id.clone(), account);
        }
        self.touched.insert(user_id.clone());
        Ok(self.accounts.get_mut(user_id).expect("staged above"))
    }

    /// Mutable access to the treasury singleton
    pub fn treasury(&mut self) -> Result<&mut TreasuryBalance> {
        if self.treasury.is_none() {
            self.treasury = Some(self.storage.get_treasury()?);
        }
        Ok(self.treasury.as_mut().expect("staged above"))
    }

    /// Mutable access to an escrow hold row
    pub fn escrow(&mut self, escrow_id: Uuid) -> Result<&mut EscrowHold> {
        if !self.escrows.contains_key(&escrow_id) {
            let hold = self
                .storage
                .get_escrow(escrow_id)?
                .ok_or_else(|| Error::EscrowNotFound(escrow_id.to_string()))?;
            self.escrows.insert(escrow_id, hold);
        }
        Ok(self.escrows.get_mut(&escrow_id).expect("staged above"))
    }

    /// Stage a newly created escrow hold
    pub fn insert_escrow(&mut self, hold: EscrowHold) {
        self.escrows.insert(hold.id, hold);
    }

    /// Append a transaction record to the staged log
    pub fn push_record(&mut self, record: TransactionRecord) {
        self.records.push(record);
    }

    /// Commit all staged work atomically; returns the user ids whose
    /// balance rows were touched, for post-commit notification
    pub fn commit(self) -> Result<Vec<UserId>> {
        let write_set = WriteSet {
            accounts: self.accounts.into_values().collect(),
            treasury: self.treasury,
            escrows: self.escrows.into_values().collect(),
            records: self.records,
        };

        self.storage.commit(write_set)?;

        Ok(self.touched.into_iter().collect())
    }
}
