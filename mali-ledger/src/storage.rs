//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Per-user balance rows (key: user_id)
//! - `treasury` - Treasury singleton (key: "treasury")
//! - `escrows` - Escrow holds (key: escrow_id)
//! - `transactions` - Append-only transaction log (key: transaction_id, UUIDv7)
//! - `indices` - Per-account transaction index (key: user_id || '|' || transaction_id)
//!
//! All mutations flow through [`Storage::commit`], which applies a staged
//! write set as one atomic `WriteBatch`. Readers never see a partially
//! applied operation.

use crate::{
    config::Config,
    error::{Error, Result},
    types::{AccountBalance, EscrowHold, TransactionRecord, TreasuryBalance, UserId},
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TREASURY: &str = "treasury";
const CF_ESCROWS: &str = "escrows";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";

/// Treasury singleton key
const TREASURY_KEY: &[u8] = b"treasury";

/// Index key separator between user id and transaction id
const INDEX_SEP: u8 = b'|';

/// All rows staged by one unit of work, applied atomically
#[derive(Debug, Default)]
pub(crate) struct WriteSet {
    pub accounts: Vec<AccountBalance>,
    pub treasury: Option<TreasuryBalance>,
    pub escrows: Vec<EscrowHold>,
    pub records: Vec<TransactionRecord>,
}

impl WriteSet {
    /// True if committing this set would write nothing
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.treasury.is_none()
            && self.escrows.is_empty()
            && self.records.is_empty()
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create the database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TREASURY, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ESCROWS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened ledger store");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Balance rows are read on every operation, favor decode speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        // The transaction log is append-only cold data
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Account operations

    /// Get account row, None if not provisioned
    pub fn get_account(&self, user_id: &UserId) -> Result<Option<AccountBalance>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        match self.db.get_cf(cf, user_id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Visit every account row (lock-free scan, used by reconciliation)
    pub fn for_each_account(&self, mut f: impl FnMut(&AccountBalance)) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let account: AccountBalance = bincode::deserialize(&value)?;
            f(&account);
        }

        Ok(())
    }

    // Treasury operations

    /// Get the treasury singleton; a store that has never minted reports zeros
    pub fn get_treasury(&self) -> Result<TreasuryBalance> {
        let cf = self.cf_handle(CF_TREASURY)?;

        match self.db.get_cf(cf, TREASURY_KEY)? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(TreasuryBalance::new()),
        }
    }

    // Escrow operations

    /// Get escrow hold by ID
    pub fn get_escrow(&self, escrow_id: Uuid) -> Result<Option<EscrowHold>> {
        let cf = self.cf_handle(CF_ESCROWS)?;

        match self.db.get_cf(cf, escrow_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Transaction log operations

    /// Get transaction record by ID
    pub fn get_transaction(&self, transaction_id: Uuid) -> Result<Option<TransactionRecord>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        match self.db.get_cf(cf, transaction_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get an account's transaction history, newest first
    ///
    /// UUIDv7 record ids sort chronologically, so the index scan yields
    /// records in time order; the tail is reversed for newest-first.
    pub fn get_account_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut prefix = user_id.as_str().as_bytes().to_vec();
        prefix.push(INDEX_SEP);

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf_indices, IteratorMode::From(prefix.as_slice(), rocksdb::Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() == prefix.len() + 16 {
                let id_bytes: [u8; 16] = key[prefix.len()..].try_into().unwrap();
                ids.push(Uuid::from_bytes(id_bytes));
            }
        }

        let start = ids.len().saturating_sub(limit);
        let mut records = Vec::with_capacity(ids.len() - start);
        for id in ids[start..].iter().rev() {
            if let Some(record) = self.get_transaction(*id)? {
                records.push(record);
            }
        }

        Ok(records)
    }

    // Atomic commit

    /// Apply a staged write set as one atomic batch
    pub(crate) fn commit(&self, write_set: WriteSet) -> Result<()> {
        if write_set.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        for account in &write_set.accounts {
            let value = bincode::serialize(account)?;
            batch.put_cf(cf_accounts, account.user_id.as_str().as_bytes(), &value);
        }

        if let Some(ref treasury) = write_set.treasury {
            let cf_treasury = self.cf_handle(CF_TREASURY)?;
            let value = bincode::serialize(treasury)?;
            batch.put_cf(cf_treasury, TREASURY_KEY, &value);
        }

        let cf_escrows = self.cf_handle(CF_ESCROWS)?;
        for escrow in &write_set.escrows {
            let value = bincode::serialize(escrow)?;
            batch.put_cf(cf_escrows, escrow.id.as_bytes(), &value);
        }

        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        for record in &write_set.records {
            let value = bincode::serialize(record)?;
            batch.put_cf(cf_transactions, record.id.as_bytes(), &value);

            if let Some(ref sender) = record.sender_id {
                batch.put_cf(cf_indices, Self::index_key(sender, record.id), b"");
            }
            if let Some(ref receiver) = record.receiver_id {
                batch.put_cf(cf_indices, Self::index_key(receiver, record.id), b"");
            }
        }

        self.db.write(batch)?;

        tracing::debug!(
            accounts = write_set.accounts.len(),
            escrows = write_set.escrows.len(),
            records = write_set.records.len(),
            "Unit of work committed"
        );

        Ok(())
    }

    fn index_key(user_id: &UserId, transaction_id: Uuid) -> Vec<u8> {
        let mut key = user_id.as_str().as_bytes().to_vec();
        key.push(INDEX_SEP);
        key.extend_from_slice(transaction_id.as_bytes());
        key
    }

    // Statistics

    /// Approximate row counts, for diagnostics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_accounts: self.approximate_count(CF_ACCOUNTS)?,
            total_escrows: self.approximate_count(CF_ESCROWS)?,
            total_transactions: self.approximate_count(CF_TRANSACTIONS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of account rows
    pub total_accounts: u64,
    /// Approximate number of escrow holds
    pub total_escrows: u64,
    /// Approximate number of transaction records
    pub total_transactions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Reference, TransactionKind, TransactionRecord};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    #[test]
    fn test_missing_account_is_none() {
        let (storage, _temp) = test_storage();
        assert!(storage.get_account(&UserId::new("ghost")).unwrap().is_none());
    }

    #[test]
    fn test_commit_and_read_account() {
        let (storage, _temp) = test_storage();

        let mut account = AccountBalance::new(UserId::new("alice"));
        account.credit_available(Decimal::from(100));

        storage
            .commit(WriteSet {
                accounts: vec![account],
                ..Default::default()
            })
            .unwrap();

        let read = storage.get_account(&UserId::new("alice")).unwrap().unwrap();
        assert_eq!(read.available, Decimal::from(100));
    }

    #[test]
    fn test_empty_treasury_reports_zeros() {
        let (storage, _temp) = test_storage();
        let treasury = storage.get_treasury().unwrap();
        assert_eq!(treasury.balance, Decimal::ZERO);
        assert_eq!(treasury.total_issued, Decimal::ZERO);
    }

    #[test]
    fn test_escrow_round_trip() {
        let (storage, _temp) = test_storage();

        let hold = EscrowHold::new(
            UserId::new("alice"),
            Decimal::from(40),
            Reference::new("session", "s-1"),
        );
        let hold_id = hold.id;

        storage
            .commit(WriteSet {
                escrows: vec![hold],
                ..Default::default()
            })
            .unwrap();

        let read = storage.get_escrow(hold_id).unwrap().unwrap();
        assert_eq!(read.user_id, UserId::new("alice"));
        assert_eq!(read.amount, Decimal::from(40));
    }

    #[test]
    fn test_account_transaction_index() {
        let (storage, _temp) = test_storage();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        for i in 1..=3 {
            let record = TransactionRecord::completed(
                TransactionKind::Transfer,
                Some(alice.clone()),
                Some(bob.clone()),
                Decimal::from(i),
                Decimal::ZERO,
            );
            storage
                .commit(WriteSet {
                    records: vec![record],
                    ..Default::default()
                })
                .unwrap();
            // UUIDv7 ordering is per-millisecond; space the records out
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        // Newest first, visible from both sides
        let for_alice = storage.get_account_transactions(&alice, 10).unwrap();
        assert_eq!(for_alice.len(), 3);
        assert_eq!(for_alice[0].amount, Decimal::from(3));
        assert_eq!(for_alice[2].amount, Decimal::from(1));

        let for_bob = storage.get_account_transactions(&bob, 2).unwrap();
        assert_eq!(for_bob.len(), 2);
        assert_eq!(for_bob[0].amount, Decimal::from(3));
    }
}
