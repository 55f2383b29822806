//! Escrow engine: hold funds for a pending deliverable, then release or
//! refund
//!
//! State machine per hold: `Held -> Released` or `Held -> Refunded`, exactly
//! once. Re-invoking the transition a terminal hold already took returns the
//! terminal row unchanged; a conflicting transition fails with
//! `InvalidState`. Detection is the state check under the row lock, not a
//! separate idempotency key, so retried and duplicate webhook-style calls
//! are safe.

use crate::{
    config::FeeConfig,
    error::{Error, Result},
    types::{EscrowHold, EscrowStatus, Reference, TransactionKind, TransactionRecord, UserId},
    uow::UnitOfWork,
};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Lock the payer's funds for a pending deliverable
pub(crate) fn hold(
    uow: &mut UnitOfWork<'_>,
    fees: &FeeConfig,
    user_id: &UserId,
    amount: Decimal,
    reference: Reference,
) -> Result<EscrowHold> {
    fees.validate_amount(amount)?;

    uow.account(user_id)?.move_to_locked(amount)?;

    let hold = EscrowHold::new(user_id.clone(), amount, reference.clone());

    let record = TransactionRecord::completed(
        TransactionKind::EscrowHold,
        Some(user_id.clone()),
        None,
        amount,
        Decimal::ZERO,
    )
    .with_reference(reference);

    uow.push_record(record);
    uow.insert_escrow(hold.clone());

    tracing::debug!(escrow_id = %hold.id, payer = %user_id, %amount, "Escrow hold staged");

    Ok(hold)
}

/// Resolve a hold to the payee, minus the escrow commission
///
/// The payee is resolved by the caller (an external reference lookup)
/// before any lock is taken; this function runs entirely under the row
/// locks and re-checks the hold state before mutating.
pub(crate) fn release(
    uow: &mut UnitOfWork<'_>,
    fees: &FeeConfig,
    escrow_id: Uuid,
    payee_id: &UserId,
) -> Result<EscrowHold> {
    let hold = uow.escrow(escrow_id)?.clone();

    match hold.status {
        EscrowStatus::Held => {}
        // Retry of an already-applied release: hand back the terminal row
        EscrowStatus::Released => return Ok(hold),
        other => {
            return Err(Error::InvalidState(format!(
                "escrow {} is {:?}, expected Held",
                escrow_id, other
            )))
        }
    }

    let commission = fees.escrow_commission(hold.amount);
    let net = hold.amount - commission;

    let payer = uow.account(&hold.user_id)?;
    payer.debit_locked(hold.amount)?;
    payer.lifetime_spent += hold.amount;

    let payee = uow.account(payee_id)?;
    payee.credit_available(net);
    payee.lifetime_earned += net;

    uow.treasury()?.credit(commission);

    let record = TransactionRecord::completed(
        TransactionKind::EscrowRelease,
        Some(hold.user_id.clone()),
        Some(payee_id.clone()),
        hold.amount,
        commission,
    )
    .with_reference(hold.reference.clone());
    uow.push_record(record);

    let staged = uow.escrow(escrow_id)?;
    staged.mark_released();
    let released = staged.clone();

    tracing::debug!(
        escrow_id = %escrow_id,
        payer = %released.user_id,
        payee = %payee_id,
        amount = %released.amount,
        %commission,
        "Escrow release staged"
    );

    Ok(released)
}

/// Return a hold to the payer in full, no fee
pub(crate) fn refund(uow: &mut UnitOfWork<'_>, escrow_id: Uuid) -> Result<EscrowHold> {
    let hold = uow.escrow(escrow_id)?.clone();

    match hold.status {
        EscrowStatus::Held => {}
        EscrowStatus::Refunded => return Ok(hold),
        other => {
            return Err(Error::InvalidState(format!(
                "escrow {} is {:?}, expected Held",
                escrow_id, other
            )))
        }
    }

    uow.account(&hold.user_id)?.unlock_to_available(hold.amount)?;

    let record = TransactionRecord::completed(
        TransactionKind::Refund,
        Some(hold.user_id.clone()),
        Some(hold.user_id.clone()),
        hold.amount,
        Decimal::ZERO,
    )
    .with_reference(hold.reference.clone());
    uow.push_record(record);

    let staged = uow.escrow(escrow_id)?;
    staged.mark_refunded();
    let refunded = staged.clone();

    tracing::debug!(
        escrow_id = %escrow_id,
        payer = %refunded.user_id,
        amount = %refunded.amount,
        "Escrow refund staged"
    );

    Ok(refunded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lock::LockManager;
    use crate::storage::Storage;
    use tempfile::TempDir;
    use tokio::time::Duration;

    struct Fixture {
        storage: Storage,
        locks: LockManager,
        fees: FeeConfig,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        Fixture {
            storage: Storage::open(&config).unwrap(),
            locks: LockManager::new(Duration::from_millis(500)),
            fees: config.fees,
            _temp: temp,
        }
    }

    async fn seed(fx: &Fixture, user: &str, available: Decimal) {
        let guards = fx.locks.acquire(vec![]).await.unwrap();
        let mut uow = UnitOfWork::begin(&fx.storage, guards);
        uow.account_or_create(&UserId::new(user))
            .unwrap()
            .credit_available(available);
        uow.commit().unwrap();
    }

    async fn held_escrow(fx: &Fixture, payer: &str, amount: Decimal) -> EscrowHold {
        let guards = fx.locks.acquire(vec![]).await.unwrap();
        let mut uow = UnitOfWork::begin(&fx.storage, guards);
        let escrow = hold(
            &mut uow,
            &fx.fees,
            &UserId::new(payer),
            amount,
            Reference::new("session", "s-1"),
        )
        .unwrap();
        uow.commit().unwrap();
        escrow
    }

    #[tokio::test]
    async fn test_hold_moves_available_to_locked() {
        let fx = fixture();
        seed(&fx, "alice", Decimal::from(100)).await;

        let escrow = held_escrow(&fx, "alice", Decimal::from(40)).await;
        assert_eq!(escrow.status, EscrowStatus::Held);

        let alice = fx.storage.get_account(&UserId::new("alice")).unwrap().unwrap();
        assert_eq!(alice.available, Decimal::from(60));
        assert_eq!(alice.locked, Decimal::from(40));
    }

    #[tokio::test]
    async fn test_hold_insufficient_funds() {
        let fx = fixture();
        seed(&fx, "alice", Decimal::from(30)).await;

        let guards = fx.locks.acquire(vec![]).await.unwrap();
        let mut uow = UnitOfWork::begin(&fx.storage, guards);
        let result = hold(
            &mut uow,
            &fx.fees,
            &UserId::new("alice"),
            Decimal::from(40),
            Reference::new("session", "s-1"),
        );
        assert!(matches!(result, Err(Error::InsufficientFunds(_))));
    }

    #[tokio::test]
    async fn test_release_pays_out_minus_commission() {
        let fx = fixture();
        seed(&fx, "alice", Decimal::from(100)).await;
        seed(&fx, "bob", Decimal::ZERO).await;
        let escrow = held_escrow(&fx, "alice", Decimal::from(40)).await;

        let guards = fx.locks.acquire(vec![]).await.unwrap();
        let mut uow = UnitOfWork::begin(&fx.storage, guards);
        let released = release(&mut uow, &fx.fees, escrow.id, &UserId::new("bob")).unwrap();
        uow.commit().unwrap();

        assert_eq!(released.status, EscrowStatus::Released);
        assert!(released.released_at.is_some());

        let alice = fx.storage.get_account(&UserId::new("alice")).unwrap().unwrap();
        let bob = fx.storage.get_account(&UserId::new("bob")).unwrap().unwrap();
        let treasury = fx.storage.get_treasury().unwrap();

        assert_eq!(alice.locked, Decimal::ZERO);
        assert_eq!(alice.available, Decimal::from(60));
        assert_eq!(bob.available, Decimal::from(38)); // 40 - 5%
        assert_eq!(treasury.balance, Decimal::from(2));
    }

    #[tokio::test]
    async fn test_refund_returns_in_full() {
        let fx = fixture();
        seed(&fx, "alice", Decimal::from(100)).await;
        let escrow = held_escrow(&fx, "alice", Decimal::from(40)).await;

        let guards = fx.locks.acquire(vec![]).await.unwrap();
        let mut uow = UnitOfWork::begin(&fx.storage, guards);
        let refunded = refund(&mut uow, escrow.id).unwrap();
        uow.commit().unwrap();

        assert_eq!(refunded.status, EscrowStatus::Refunded);
        assert!(refunded.refunded_at.is_some());

        let alice = fx.storage.get_account(&UserId::new("alice")).unwrap().unwrap();
        assert_eq!(alice.available, Decimal::from(100));
        assert_eq!(alice.locked, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_second_release_is_idempotent() {
        let fx = fixture();
        seed(&fx, "alice", Decimal::from(100)).await;
        seed(&fx, "bob", Decimal::ZERO).await;
        let escrow = held_escrow(&fx, "alice", Decimal::from(40)).await;

        for _ in 0..2 {
            let guards = fx.locks.acquire(vec![]).await.unwrap();
            let mut uow = UnitOfWork::begin(&fx.storage, guards);
            let released = release(&mut uow, &fx.fees, escrow.id, &UserId::new("bob")).unwrap();
            assert_eq!(released.status, EscrowStatus::Released);
            uow.commit().unwrap();
        }

        // Balances mutated exactly once
        let bob = fx.storage.get_account(&UserId::new("bob")).unwrap().unwrap();
        assert_eq!(bob.available, Decimal::from(38));
    }

    #[tokio::test]
    async fn test_refund_after_release_fails() {
        let fx = fixture();
        seed(&fx, "alice", Decimal::from(100)).await;
        seed(&fx, "bob", Decimal::ZERO).await;
        let escrow = held_escrow(&fx, "alice", Decimal::from(40)).await;

        {
            let guards = fx.locks.acquire(vec![]).await.unwrap();
            let mut uow = UnitOfWork::begin(&fx.storage, guards);
            release(&mut uow, &fx.fees, escrow.id, &UserId::new("bob")).unwrap();
            uow.commit().unwrap();
        }

        let guards = fx.locks.acquire(vec![]).await.unwrap();
        let mut uow = UnitOfWork::begin(&fx.storage, guards);
        let result = refund(&mut uow, escrow.id);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_release_unknown_escrow() {
        let fx = fixture();

        let guards = fx.locks.acquire(vec![]).await.unwrap();
        let mut uow = UnitOfWork::begin(&fx.storage, guards);
        let result = release(&mut uow, &fx.fees, Uuid::now_v7(), &UserId::new("bob"));
        assert!(matches!(result, Err(Error::EscrowNotFound(_))));
    }
}
