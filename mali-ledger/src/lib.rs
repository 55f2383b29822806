//! MALI Ledger Core
//!
//! Internal token ledger for a services marketplace: per-user available and
//! locked balances, a platform treasury, escrow holds, and an append-only
//! transaction log, all backed by RocksDB.
//!
//! # Architecture
//!
//! - **Row locking**: every operation takes exclusive locks on the rows it
//!   mutates, in a fixed global order (escrows, then accounts ascending,
//!   treasury last)
//! - **Unit of work**: mutations are staged under the held locks and
//!   committed as one atomic batch; abort leaves no partial effect
//! - **Append-only log**: one transaction record per economically
//!   meaningful event, written in the same batch as the balances it
//!   documents
//!
//! # Invariants
//!
//! - Non-negativity: every available and locked balance is ≥ 0 at every
//!   commit boundary
//! - Conservation: Σ available + Σ locked + treasury balance == total
//!   issued supply; only mint and deposit increase the supply
//! - Escrow holds terminate exactly once, via release or refund

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod storage;
pub mod types;

mod audit;
mod escrow;
mod lock;
mod transfer;
mod treasury;
mod uow;

// Re-exports
pub use config::{Config, FeeConfig, LockConfig, RocksDbConfig};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use notify::{
    BalanceNotifier, ChannelNotifier, MapResolver, NoopNotifier, ReferenceResolver,
};
pub use storage::{Storage, StorageStats};
pub use types::{
    AccountBalance, AuditReport, Balances, EscrowHold, EscrowStatus, Reference,
    TransactionKind, TransactionRecord, TransactionStatus, TreasuryBalance, UserId,
};
