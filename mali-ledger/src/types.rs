//! Core types for the MALI ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money, never floating point)
//! - Append-only history (transaction records are immutable once completed)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// User identifier, assigned by the external identity store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-user balance row
///
/// One row per user, created at user-creation time (or lazily for a
/// transfer receiver). `available` and `locked` are never negative at any
/// commit boundary; the lifetime counters are informational only and are
/// never read for invariant checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Owning user
    pub user_id: UserId,

    /// Immediately spendable funds
    pub available: Decimal,

    /// Funds held in escrow on behalf of this account
    pub locked: Decimal,

    /// Cumulative amount ever credited as earnings
    pub lifetime_earned: Decimal,

    /// Cumulative amount ever debited as spending
    pub lifetime_spent: Decimal,

    /// Row creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Create a zero-balance row
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            lifetime_earned: Decimal::ZERO,
            lifetime_spent: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credit spendable funds
    pub fn credit_available(&mut self, amount: Decimal) {
        self.available += amount;
        self.updated_at = Utc::now();
    }

    /// Debit spendable funds; fails without mutating if the balance is too low
    pub fn debit_available(&mut self, amount: Decimal) -> Result<()> {
        if self.available < amount {
            return Err(Error::InsufficientFunds(format!(
                "{}: available {} < {}",
                self.user_id, self.available, amount
            )));
        }
        self.available -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move funds from available to locked (escrow hold)
    pub fn move_to_locked(&mut self, amount: Decimal) -> Result<()> {
        self.debit_available(amount)?;
        self.locked += amount;
        Ok(())
    }

    /// Remove funds from locked (escrow release; value leaves this account)
    pub fn debit_locked(&mut self, amount: Decimal) -> Result<()> {
        if self.locked < amount {
            // Locked funds can only shrink through release/refund, so this
            // indicates corrupted state rather than a user error.
            return Err(Error::ConservationViolation(format!(
                "{}: locked {} < {}",
                self.user_id, self.locked, amount
            )));
        }
        self.locked -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Return locked funds to available (escrow refund)
    pub fn unlock_to_available(&mut self, amount: Decimal) -> Result<()> {
        self.debit_locked(amount)?;
        self.available += amount;
        Ok(())
    }
}

/// Spendable/locked pair returned by balance reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Immediately spendable funds
    pub available: Decimal,

    /// Funds held in escrow
    pub locked: Decimal,
}

impl From<&AccountBalance> for Balances {
    fn from(account: &AccountBalance) -> Self {
        Self {
            available: account.available,
            locked: account.locked,
        }
    }
}

/// Platform treasury singleton
///
/// `total_issued` is the money-supply ceiling: it only ever increases, and
/// at every quiescent point `Σ available + Σ locked + balance == total_issued`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryBalance {
    /// Platform-collected commissions and reabsorbed withdrawals
    pub balance: Decimal,

    /// Cumulative amount ever minted into the system
    pub total_issued: Decimal,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl TreasuryBalance {
    /// Empty treasury (nothing issued yet)
    pub fn new() -> Self {
        Self {
            balance: Decimal::ZERO,
            total_issued: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Credit the treasury balance (commission accrual, withdrawals)
    pub fn credit(&mut self, amount: Decimal) {
        self.balance += amount;
        self.updated_at = Utc::now();
    }

    /// Mint new supply into the treasury balance
    pub fn issue(&mut self, amount: Decimal) {
        self.total_issued += amount;
        self.balance += amount;
        self.updated_at = Utc::now();
    }

    /// Mint new supply directly into circulation (user deposit); the
    /// matching account credit happens in the same unit of work
    pub fn issue_circulating(&mut self, amount: Decimal) {
        self.total_issued += amount;
        self.updated_at = Utc::now();
    }
}

impl Default for TreasuryBalance {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionKind {
    /// Direct peer-to-peer transfer
    Transfer = 1,
    /// Funds moved into escrow
    EscrowHold = 2,
    /// Escrow resolved to the payee
    EscrowRelease = 3,
    /// Escrow returned to the payer
    Refund = 4,
    /// Supply issued to a user (fiat purchase)
    Deposit = 5,
    /// Value redeemed back to the platform
    Withdrawal = 6,
    /// Commission accrual
    Commission = 7,
    /// Supply issued to the treasury
    Mint = 8,
    /// Subscription charge
    Subscription = 9,
    /// Booking charge
    Booking = 10,
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Created but not yet committed
    Pending = 1,
    /// Committed; immutable history from here on
    Completed = 2,
    /// Aborted
    Failed = 3,
    /// Administratively reversed (rare, audited path)
    Reversed = 4,
}

/// Opaque pointer to the external deliverable an operation concerns
/// (service, session, booking). The ledger never branches on its contents
/// beyond escrow payee resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Kind of deliverable, e.g. "service", "session", "booking"
    pub reference_type: String,

    /// External identifier within that kind
    pub reference_id: String,
}

impl Reference {
    /// Create a reference
    pub fn new(reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.reference_id)
    }
}

/// One economically meaningful event, appended in the same unit of work as
/// the balance mutation it documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique record ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Debited party (None means system/treasury)
    pub sender_id: Option<UserId>,

    /// Credited party (None means system/treasury)
    pub receiver_id: Option<UserId>,

    /// Gross amount moved
    pub amount: Decimal,

    /// Platform fee carved out of the amount
    pub fee: Decimal,

    /// `amount - fee`, the part the receiver actually gets
    pub net_amount: Decimal,

    /// Transaction kind
    pub kind: TransactionKind,

    /// Transaction status
    pub status: TransactionStatus,

    /// Link to the external deliverable, if any
    pub reference: Option<Reference>,

    /// Free-form caller note
    pub note: Option<String>,

    /// Opaque side payload supplied by the caller
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,

    /// Record creation timestamp
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Create a completed record; `net_amount` is derived so that
    /// `fee + net_amount` always reconstructs `amount` exactly
    pub fn completed(
        kind: TransactionKind,
        sender_id: Option<UserId>,
        receiver_id: Option<UserId>,
        amount: Decimal,
        fee: Decimal,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender_id,
            receiver_id,
            amount,
            fee,
            net_amount: amount - fee,
            kind,
            status: TransactionStatus::Completed,
            reference: None,
            note: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a caller note
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    /// Attach a deliverable reference
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Escrow hold status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EscrowStatus {
    /// Funds locked, awaiting the deliverable
    Held = 1,
    /// Resolved to the payee (terminal)
    Released = 2,
    /// Returned to the payer (terminal)
    Refunded = 3,
    /// Lapsed without resolution (terminal)
    Expired = 4,
}

/// A pending commitment of funds awaiting a deliverable's completion or
/// cancellation. Terminates exactly once via release or refund; terminal
/// rows are never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowHold {
    /// Unique hold ID (UUIDv7)
    pub id: Uuid,

    /// Payer whose funds are locked
    pub user_id: UserId,

    /// Amount held
    pub amount: Decimal,

    /// Current status
    pub status: EscrowStatus,

    /// Pointer to the external deliverable
    pub reference: Reference,

    /// When the hold was created
    pub held_at: DateTime<Utc>,

    /// When the hold was released (if it was)
    pub released_at: Option<DateTime<Utc>>,

    /// When the hold was refunded (if it was)
    pub refunded_at: Option<DateTime<Utc>>,
}

impl EscrowHold {
    /// Create a hold in `Held` state
    pub fn new(user_id: UserId, amount: Decimal, reference: Reference) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            amount,
            status: EscrowStatus::Held,
            reference,
            held_at: Utc::now(),
            released_at: None,
            refunded_at: None,
        }
    }

    /// Check if the hold is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, EscrowStatus::Held)
    }

    /// Transition `Held -> Released`
    pub fn mark_released(&mut self) {
        self.status = EscrowStatus::Released;
        self.released_at = Some(Utc::now());
    }

    /// Transition `Held -> Refunded`
    pub fn mark_refunded(&mut self) {
        self.status = EscrowStatus::Refunded;
        self.refunded_at = Some(Utc::now());
    }
}

/// Supply reconciliation result
///
/// `difference == 0` at every quiescent point; a persistent nonzero value
/// means the conservation invariant is broken and requires administrative
/// investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// Sum of available + locked across all accounts
    pub user_total: Decimal,

    /// Treasury balance
    pub treasury_total: Decimal,

    /// Treasury `total_issued`
    pub official_supply: Decimal,

    /// `official_supply - (user_total + treasury_total)`
    pub difference: Decimal,

    /// Number of account rows scanned
    pub account_count: u64,

    /// When the scan ran
    pub generated_at: DateTime<Utc>,
}

impl AuditReport {
    /// Whether circulating value matches the issued supply exactly
    pub fn is_balanced(&self) -> bool {
        self.difference.is_zero()
    }
}
