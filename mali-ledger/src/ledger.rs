//! Main ledger orchestration layer
//!
//! Ties together storage, locking, the engines, and the external seams
//! into the operation table the service layer calls.
//!
//! Every operation follows the same shape: acquire row locks in the fixed
//! global order, begin a unit of work, run the engine, commit atomically,
//! then fire post-commit notifications. Any failure before commit leaves
//! the store untouched.
//!
//! # Example
//!
//! ```no_run
//! use mali_ledger::{Config, Ledger, UserId};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> mali_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default())?;
//!
//!     let alice = UserId::new("alice");
//!     let bob = UserId::new("bob");
//!     ledger.create_account(&alice).await?;
//!     ledger.deposit(&alice, Decimal::from(100)).await?;
//!     ledger.transfer(&alice, &bob, Decimal::from(10), None).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    audit, escrow,
    config::Config,
    error::{Error, Result},
    lock::{LockKey, LockManager},
    metrics::Metrics,
    notify::{BalanceNotifier, NoopNotifier, ReferenceResolver},
    storage::{Storage, StorageStats},
    transfer, treasury,
    types::{
        AccountBalance, AuditReport, Balances, EscrowHold, EscrowStatus, Reference,
        TransactionRecord, UserId,
    },
    uow::UnitOfWork,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Durable store
    storage: Arc<Storage>,

    /// Row lock table
    locks: LockManager,

    /// Configuration
    config: Config,

    /// Prometheus metrics
    metrics: Metrics,

    /// Post-commit balance-changed sink
    notifier: Arc<dyn BalanceNotifier>,

    /// Escrow payee resolution (external lookup)
    resolver: Option<Arc<dyn ReferenceResolver>>,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let locks = LockManager::new(Duration::from_millis(config.locking.lock_timeout_ms));
        let metrics = Metrics::new().map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            storage,
            locks,
            config,
            metrics,
            notifier: Arc::new(NoopNotifier),
            resolver: None,
        })
    }

    /// Set the balance-changed notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn BalanceNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set the escrow reference resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = resolver.into();
        self
    }

    /// Provision a balance row at user-creation time
    ///
    /// Idempotent: an already-provisioned account is returned unchanged.
    pub async fn create_account(&self, user_id: &UserId) -> Result<AccountBalance> {
        let locks = self
            .locks
            .acquire(vec![LockKey::Account(user_id.clone())])
            .await?;

        if let Some(existing) = self.storage.get_account(user_id)? {
            return Ok(existing);
        }

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        let account = uow.account_or_create(user_id)?.clone();
        uow.commit()?;

        tracing::info!(user_id = %user_id, "Account provisioned");

        Ok(account)
    }

    /// Direct peer-to-peer transfer with fee split
    pub async fn transfer(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        amount: Decimal,
        note: Option<String>,
    ) -> Result<TransactionRecord> {
        let start = Instant::now();

        let locks = self
            .locks
            .acquire(vec![
                LockKey::Account(sender_id.clone()),
                LockKey::Account(receiver_id.clone()),
                LockKey::Treasury,
            ])
            .await?;

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        let record = transfer::execute(
            &mut uow,
            &self.config.fees,
            sender_id,
            receiver_id,
            amount,
            note,
        )?;
        let touched = uow.commit()?;
        self.notify(&touched);

        self.metrics
            .record_operation("transfer", start.elapsed().as_secs_f64());
        self.metrics
            .record_commission(record.fee.to_f64().unwrap_or(0.0));

        tracing::info!(
            transaction_id = %record.id,
            sender = %sender_id,
            receiver = %receiver_id,
            %amount,
            fee = %record.fee,
            "Transfer completed"
        );

        Ok(record)
    }

    /// Read a user's spendable and locked funds
    pub async fn get_balance(&self, user_id: &UserId) -> Result<Balances> {
        let account = self
            .storage
            .get_account(user_id)?
            .ok_or_else(|| Error::AccountNotFound(user_id.to_string()))?;
        Ok(Balances::from(&account))
    }

    /// Lock funds for a pending deliverable
    pub async fn hold_escrow(
        &self,
        user_id: &UserId,
        amount: Decimal,
        reference: Reference,
    ) -> Result<EscrowHold> {
        let start = Instant::now();

        let locks = self
            .locks
            .acquire(vec![LockKey::Account(user_id.clone())])
            .await?;

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        let hold = escrow::hold(&mut uow, &self.config.fees, user_id, amount, reference)?;
        let touched = uow.commit()?;
        self.notify(&touched);

        self.metrics
            .record_operation("escrow_hold", start.elapsed().as_secs_f64());

        tracing::info!(
            escrow_id = %hold.id,
            payer = %user_id,
            %amount,
            reference = %hold.reference,
            "Escrow held"
        );

        Ok(hold)
    }

    /// Resolve an escrow hold to the payee, minus commission
    ///
    /// The payee is looked up through the configured [`ReferenceResolver`]
    /// before any lock is taken; the hold state is re-checked under the row
    /// lock, so a concurrent resolution is detected and handled
    /// idempotently.
    pub async fn release_escrow(&self, escrow_id: Uuid) -> Result<EscrowHold> {
        let start = Instant::now();

        let snapshot = self
            .storage
            .get_escrow(escrow_id)?
            .ok_or_else(|| Error::EscrowNotFound(escrow_id.to_string()))?;

        match snapshot.status {
            EscrowStatus::Held => {}
            // Retried release: no resolver call, no locks, no mutation
            EscrowStatus::Released => return Ok(snapshot),
            other => {
                return Err(Error::InvalidState(format!(
                    "escrow {} is {:?}, expected Held",
                    escrow_id, other
                )))
            }
        }

        let resolver = self.resolver.as_ref().ok_or_else(|| {
            Error::ProviderNotFound("no reference resolver configured".to_string())
        })?;
        let payee_id = resolver
            .resolve_payee(&snapshot.reference)
            .await
            .ok_or_else(|| Error::ProviderNotFound(snapshot.reference.to_string()))?;

        let locks = self
            .locks
            .acquire(vec![
                LockKey::Escrow(escrow_id),
                LockKey::Account(snapshot.user_id.clone()),
                LockKey::Account(payee_id.clone()),
                LockKey::Treasury,
            ])
            .await?;

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        let released = escrow::release(&mut uow, &self.config.fees, escrow_id, &payee_id)?;
        let touched = uow.commit()?;
        self.notify(&touched);

        self.metrics
            .record_operation("escrow_release", start.elapsed().as_secs_f64());
        self.metrics
            .record_commission(
                self.config
                    .fees
                    .escrow_commission(released.amount)
                    .to_f64()
                    .unwrap_or(0.0),
            );

        tracing::info!(
            escrow_id = %escrow_id,
            payer = %released.user_id,
            payee = %payee_id,
            amount = %released.amount,
            "Escrow released"
        );

        Ok(released)
    }

    /// Return an escrow hold to the payer in full
    pub async fn refund_escrow(&self, escrow_id: Uuid) -> Result<EscrowHold> {
        let start = Instant::now();

        let snapshot = self
            .storage
            .get_escrow(escrow_id)?
            .ok_or_else(|| Error::EscrowNotFound(escrow_id.to_string()))?;

        match snapshot.status {
            EscrowStatus::Held => {}
            EscrowStatus::Refunded => return Ok(snapshot),
            other => {
                return Err(Error::InvalidState(format!(
                    "escrow {} is {:?}, expected Held",
                    escrow_id, other
                )))
            }
        }

        let locks = self
            .locks
            .acquire(vec![
                LockKey::Escrow(escrow_id),
                LockKey::Account(snapshot.user_id.clone()),
            ])
            .await?;

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        let refunded = escrow::refund(&mut uow, escrow_id)?;
        let touched = uow.commit()?;
        self.notify(&touched);

        self.metrics
            .record_operation("refund", start.elapsed().as_secs_f64());

        tracing::info!(
            escrow_id = %escrow_id,
            payer = %refunded.user_id,
            amount = %refunded.amount,
            "Escrow refunded"
        );

        Ok(refunded)
    }

    /// Read an escrow hold
    pub async fn get_escrow(&self, escrow_id: Uuid) -> Result<EscrowHold> {
        self.storage
            .get_escrow(escrow_id)?
            .ok_or_else(|| Error::EscrowNotFound(escrow_id.to_string()))
    }

    /// Mint new supply into the treasury (privileged; authorization is the
    /// caller's responsibility)
    pub async fn mint(&self, amount: Decimal) -> Result<()> {
        let start = Instant::now();

        let locks = self.locks.acquire(vec![LockKey::Treasury]).await?;

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        treasury::mint(&mut uow, amount)?;
        uow.commit()?;

        self.metrics
            .record_operation("mint", start.elapsed().as_secs_f64());

        Ok(())
    }

    /// Issue supply directly to a user's available balance
    pub async fn deposit(&self, user_id: &UserId, amount: Decimal) -> Result<TransactionRecord> {
        let start = Instant::now();

        let locks = self
            .locks
            .acquire(vec![LockKey::Account(user_id.clone()), LockKey::Treasury])
            .await?;

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        let record = treasury::deposit(&mut uow, &self.config.fees, user_id, amount)?;
        let touched = uow.commit()?;
        self.notify(&touched);

        self.metrics
            .record_operation("deposit", start.elapsed().as_secs_f64());

        tracing::info!(user = %user_id, %amount, "Deposit completed");

        Ok(record)
    }

    /// Redeem a user's tokens back to the platform treasury
    pub async fn withdraw(&self, user_id: &UserId, amount: Decimal) -> Result<TransactionRecord> {
        let start = Instant::now();

        let locks = self
            .locks
            .acquire(vec![LockKey::Account(user_id.clone()), LockKey::Treasury])
            .await?;

        let mut uow = UnitOfWork::begin(&self.storage, locks);
        let record = treasury::withdraw(&mut uow, &self.config.fees, user_id, amount)?;
        let touched = uow.commit()?;
        self.notify(&touched);

        self.metrics
            .record_operation("withdrawal", start.elapsed().as_secs_f64());

        tracing::info!(user = %user_id, %amount, "Withdrawal completed");

        Ok(record)
    }

    /// An account's transaction history, newest first
    pub async fn get_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        self.storage.get_account_transactions(user_id, limit)
    }

    /// Reconcile circulating value against the issued supply
    ///
    /// Takes no locks; may observe a torn snapshot under concurrent
    /// writes. A persistent nonzero difference is a conservation-invariant
    /// violation and is surfaced at error level, never auto-corrected.
    pub async fn audit(&self) -> Result<AuditReport> {
        let report = audit::run(&self.storage)?;

        self.metrics
            .record_audit_difference(report.difference.to_f64().unwrap_or(f64::NAN));

        if report.is_balanced() {
            tracing::debug!(
                accounts = report.account_count,
                supply = %report.official_supply,
                "Reconciliation balanced"
            );
        } else {
            tracing::error!(
                difference = %report.difference,
                user_total = %report.user_total,
                treasury_total = %report.treasury_total,
                official_supply = %report.official_supply,
                "Supply conservation violated"
            );
        }

        Ok(report)
    }

    /// Approximate store row counts, for diagnostics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Get metrics registry
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }

    /// Fire post-commit notifications, one per affected account
    fn notify(&self, touched: &[UserId]) {
        for user_id in touched {
            self.notifier.balance_changed(user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, MapResolver};
    use tempfile::TempDir;

    fn create_test_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Ledger::open(config).unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_create_account_idempotent() {
        let (ledger, _temp) = create_test_ledger();
        let alice = UserId::new("alice");

        ledger.create_account(&alice).await.unwrap();
        ledger.deposit(&alice, Decimal::from(100)).await.unwrap();

        // Second provisioning must not reset the balance
        let account = ledger.create_account(&alice).await.unwrap();
        assert_eq!(account.available, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_transfer_and_history() {
        let (ledger, _temp) = create_test_ledger();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        ledger.create_account(&alice).await.unwrap();
        ledger.deposit(&alice, Decimal::from(500)).await.unwrap();

        let record = ledger
            .transfer(&alice, &bob, Decimal::from(100), Some("consultation".to_string()))
            .await
            .unwrap();
        assert_eq!(record.net_amount, Decimal::new(999, 1));

        let alice_balance = ledger.get_balance(&alice).await.unwrap();
        assert_eq!(alice_balance.available, Decimal::from(400));

        // Receiver row auto-provisioned on first transfer in
        let bob_balance = ledger.get_balance(&bob).await.unwrap();
        assert_eq!(bob_balance.available, Decimal::new(999, 1));

        let history = ledger.get_transactions(&alice, 10).await.unwrap();
        assert_eq!(history.len(), 2); // deposit + transfer
        assert!(history.iter().any(|r| r.id == record.id));
    }

    #[tokio::test]
    async fn test_transfer_failure_has_no_partial_effect() {
        let (ledger, _temp) = create_test_ledger();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        ledger.create_account(&alice).await.unwrap();
        ledger.deposit(&alice, Decimal::from(50)).await.unwrap();

        let result = ledger.transfer(&alice, &bob, Decimal::from(100), None).await;
        assert!(matches!(result, Err(Error::InsufficientFunds(_))));

        assert_eq!(
            ledger.get_balance(&alice).await.unwrap().available,
            Decimal::from(50)
        );
        // Receiver must not have been provisioned by the failed transfer
        assert!(ledger.get_balance(&bob).await.is_err());
    }

    #[tokio::test]
    async fn test_full_escrow_lifecycle() {
        let (temp_ledger, _temp) = create_test_ledger();

        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        let mut resolver = MapResolver::new();
        resolver.insert("s-1", bob.clone());
        let ledger = temp_ledger.with_resolver(Arc::new(resolver));

        ledger.create_account(&alice).await.unwrap();
        ledger.create_account(&bob).await.unwrap();
        ledger.deposit(&alice, Decimal::from(100)).await.unwrap();

        let hold = ledger
            .hold_escrow(&alice, Decimal::from(40), Reference::new("session", "s-1"))
            .await
            .unwrap();

        let alice_balance = ledger.get_balance(&alice).await.unwrap();
        assert_eq!(alice_balance.available, Decimal::from(60));
        assert_eq!(alice_balance.locked, Decimal::from(40));

        let released = ledger.release_escrow(hold.id).await.unwrap();
        assert_eq!(released.status, EscrowStatus::Released);

        let alice_balance = ledger.get_balance(&alice).await.unwrap();
        assert_eq!(alice_balance.locked, Decimal::ZERO);
        assert_eq!(
            ledger.get_balance(&bob).await.unwrap().available,
            Decimal::from(38)
        );

        // Whole cycle conserves issued supply
        let report = ledger.audit().await.unwrap();
        assert!(report.is_balanced());
    }

    #[tokio::test]
    async fn test_release_without_resolver_fails_clean() {
        let (ledger, _temp) = create_test_ledger();
        let alice = UserId::new("alice");

        ledger.create_account(&alice).await.unwrap();
        ledger.deposit(&alice, Decimal::from(100)).await.unwrap();

        let hold = ledger
            .hold_escrow(&alice, Decimal::from(40), Reference::new("session", "s-1"))
            .await
            .unwrap();

        let result = ledger.release_escrow(hold.id).await;
        assert!(matches!(result, Err(Error::ProviderNotFound(_))));

        // No partial release: funds still locked, hold still Held
        let balance = ledger.get_balance(&alice).await.unwrap();
        assert_eq!(balance.locked, Decimal::from(40));
        let hold = ledger.get_escrow(hold.id).await.unwrap();
        assert_eq!(hold.status, EscrowStatus::Held);
    }

    #[tokio::test]
    async fn test_notifications_fire_after_commit() {
        let (temp_ledger, _temp) = create_test_ledger();
        let (notifier, mut events) = ChannelNotifier::new(16);
        let ledger = temp_ledger.with_notifier(Arc::new(notifier));

        let alice = UserId::new("alice");
        ledger.create_account(&alice).await.unwrap();
        ledger.deposit(&alice, Decimal::from(10)).await.unwrap();

        assert_eq!(events.recv().await, Some(alice.clone()));
    }

    #[tokio::test]
    async fn test_mint_keeps_audit_balanced() {
        let (ledger, _temp) = create_test_ledger();

        ledger.mint(Decimal::from(1000)).await.unwrap();

        let report = ledger.audit().await.unwrap();
        assert_eq!(report.official_supply, Decimal::from(1000));
        assert_eq!(report.treasury_total, Decimal::from(1000));
        assert!(report.is_balanced());
    }
}
