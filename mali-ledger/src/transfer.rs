//! Transfer engine: direct peer-to-peer value moves with fee splitting
//!
//! The sender is debited the full amount; the receiver is credited the
//! amount minus the transfer fee; the fee accrues to the treasury. All
//! three mutations and the transaction record land in one unit of work.

use crate::{
    config::FeeConfig,
    error::{Error, Result},
    types::{TransactionKind, TransactionRecord, UserId},
    uow::UnitOfWork,
};
use rust_decimal::Decimal;

/// Execute a transfer inside the caller's unit of work
///
/// The receiver's balance row is auto-provisioned if absent. This is the
/// one documented exception to the accounts-must-pre-exist rule, scoped to
/// the transfer receiver path only.
pub(crate) fn execute(
    uow: &mut UnitOfWork<'_>,
    fees: &FeeConfig,
    sender_id: &UserId,
    receiver_id: &UserId,
    amount: Decimal,
    note: Option<String>,
) -> Result<TransactionRecord> {
    fees.validate_amount(amount)?;

    if amount < fees.min_transfer {
        return Err(Error::InvalidAmount(format!(
            "amount {} below minimum transfer {}",
            amount, fees.min_transfer
        )));
    }

    if sender_id == receiver_id {
        return Err(Error::SelfTransfer(sender_id.to_string()));
    }

    let fee = fees.transfer_fee(amount);
    let net = amount - fee;

    let sender = uow.account(sender_id)?;
    sender.debit_available(amount)?;
    sender.lifetime_spent += amount;

    let receiver = uow.account_or_create(receiver_id)?;
    receiver.credit_available(net);
    receiver.lifetime_earned += net;

    uow.treasury()?.credit(fee);

    let record = TransactionRecord::completed(
        TransactionKind::Transfer,
        Some(sender_id.clone()),
        Some(receiver_id.clone()),
        amount,
        fee,
    )
    .with_note(note);

    uow.push_record(record.clone());

    tracing::debug!(
        sender = %sender_id,
        receiver = %receiver_id,
        %amount,
        %fee,
        "Transfer staged"
    );

    Ok(record)
}
