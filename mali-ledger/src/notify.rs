//! External collaborator interfaces
//!
//! Two seams connect the ledger core to the rest of the platform:
//!
//! - [`BalanceNotifier`]: fire-and-forget balance-changed signal, invoked
//!   strictly after commit. A notifier failure never rolls back or fails
//!   the ledger operation.
//! - [`ReferenceResolver`]: maps an escrow reference to the payee user id
//!   (a service/session/booking lookup owned by the excluded service
//!   layer). Resolution happens before any row lock is taken.

use crate::types::{Reference, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Best-effort sink for balance-changed events
pub trait BalanceNotifier: Send + Sync {
    /// Called once per affected user id after a unit of work commits
    fn balance_changed(&self, user_id: &UserId);
}

/// Notifier that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl BalanceNotifier for NoopNotifier {
    fn balance_changed(&self, _user_id: &UserId) {}
}

/// Notifier that forwards affected user ids over a bounded channel
///
/// `try_send` keeps the ledger path non-blocking: if the subscriber falls
/// behind and the queue fills, events are dropped with a warning rather
/// than stalling commits.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<UserId>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its queue
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<UserId>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl BalanceNotifier for ChannelNotifier {
    fn balance_changed(&self, user_id: &UserId) {
        if let Err(e) = self.sender.try_send(user_id.clone()) {
            tracing::warn!(user_id = %user_id, error = %e, "Balance notification dropped");
        }
    }
}

/// Maps an escrow reference to the payee who should receive the funds
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Resolve the payee for a deliverable; `None` if the reference does
    /// not map to a known provider
    async fn resolve_payee(&self, reference: &Reference) -> Option<UserId>;
}

/// Static resolver backed by a reference-id table
///
/// Useful for tests and tooling; production deployments wire the service
/// layer's lookup in via the trait instead.
#[derive(Debug, Default, Clone)]
pub struct MapResolver {
    payees: HashMap<String, UserId>,
}

impl MapResolver {
    /// Empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the payee for a reference id
    pub fn insert(&mut self, reference_id: impl Into<String>, payee: UserId) {
        self.payees.insert(reference_id.into(), payee);
    }
}

#[async_trait]
impl ReferenceResolver for MapResolver {
    async fn resolve_payee(&self, reference: &Reference) -> Option<UserId> {
        self.payees.get(&reference.reference_id).cloned()
    }
}
