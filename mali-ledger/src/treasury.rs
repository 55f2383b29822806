//! Treasury operations: supply issuance and redemption
//!
//! `mint` is the only operation that issues supply into the treasury;
//! `deposit` issues supply straight into a user's available balance (fiat
//! purchase of MALI). Both increase `total_issued`. `withdraw` redeems a
//! user's tokens back to the platform; supply is never burned, so the value
//! returns to the treasury balance and `total_issued` stays monotonic.
//!
//! Commission accrual is a side effect of transfer and escrow release, not
//! an entry point here.

use crate::{
    config::FeeConfig,
    error::{Error, Result},
    types::{TransactionKind, TransactionRecord, UserId},
    uow::UnitOfWork,
};
use rust_decimal::Decimal;

/// Mint new supply into the treasury
pub(crate) fn mint(uow: &mut UnitOfWork<'_>, amount: Decimal) -> Result<TransactionRecord> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "mint amount must be positive, got {}",
            amount
        )));
    }

    uow.treasury()?.issue(amount);

    let record =
        TransactionRecord::completed(TransactionKind::Mint, None, None, amount, Decimal::ZERO);
    uow.push_record(record.clone());

    tracing::info!(%amount, "Supply minted");

    Ok(record)
}

/// Issue supply directly to a user's available balance
pub(crate) fn deposit(
    uow: &mut UnitOfWork<'_>,
    fees: &FeeConfig,
    user_id: &UserId,
    amount: Decimal,
) -> Result<TransactionRecord> {
    fees.validate_amount(amount)?;

    uow.account(user_id)?.credit_available(amount);
    uow.treasury()?.issue_circulating(amount);

    let record = TransactionRecord::completed(
        TransactionKind::Deposit,
        None,
        Some(user_id.clone()),
        amount,
        Decimal::ZERO,
    );
    uow.push_record(record.clone());

    tracing::debug!(user = %user_id, %amount, "Deposit staged");

    Ok(record)
}

/// Redeem a user's tokens back to the platform treasury
pub(crate) fn withdraw(
    uow: &mut UnitOfWork<'_>,
    fees: &FeeConfig,
    user_id: &UserId,
    amount: Decimal,
) -> Result<TransactionRecord> {
    fees.validate_amount(amount)?;

    uow.account(user_id)?.debit_available(amount)?;
    uow.treasury()?.credit(amount);

    let record = TransactionRecord::completed(
        TransactionKind::Withdrawal,
        Some(user_id.clone()),
        None,
        amount,
        Decimal::ZERO,
    );
    uow.push_record(record.clone());

    tracing::debug!(user = %user_id, %amount, "Withdrawal staged");

    Ok(record)
}
