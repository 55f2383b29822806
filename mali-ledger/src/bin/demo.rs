//! Ledger demo binary
//!
//! Walks through the full operation set against a throwaway store:
//! provisioning, deposits, a fee-split transfer, an escrow cycle, and a
//! closing reconciliation.

use anyhow::Result;
use mali_ledger::{Config, Ledger, MapResolver, Reference, UserId};
use rust_decimal::Decimal;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting MALI ledger demo");

    let config = Config::from_env()?;

    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    let mut resolver = MapResolver::new();
    resolver.insert("session-42", bob.clone());

    let ledger = Ledger::open(config)?.with_resolver(Arc::new(resolver));

    ledger.create_account(&alice).await?;
    ledger.create_account(&bob).await?;

    ledger.mint(Decimal::from(10_000)).await?;
    ledger.deposit(&alice, Decimal::from(1_000)).await?;

    ledger
        .transfer(&alice, &bob, Decimal::from(100), Some("tip".to_string()))
        .await?;

    let hold = ledger
        .hold_escrow(&alice, Decimal::from(250), Reference::new("session", "session-42"))
        .await?;
    ledger.release_escrow(hold.id).await?;

    let alice_balance = ledger.get_balance(&alice).await?;
    let bob_balance = ledger.get_balance(&bob).await?;
    tracing::info!(
        alice_available = %alice_balance.available,
        bob_available = %bob_balance.available,
        "Balances after escrow cycle"
    );

    let report = ledger.audit().await?;
    tracing::info!(
        user_total = %report.user_total,
        treasury_total = %report.treasury_total,
        official_supply = %report.official_supply,
        difference = %report.difference,
        balanced = report.is_balanced(),
        "Reconciliation report"
    );

    let stats = ledger.stats()?;
    tracing::info!(
        accounts = stats.total_accounts,
        escrows = stats.total_escrows,
        transactions = stats.total_transactions,
        "Store statistics"
    );

    Ok(())
}
