//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_operations_total` - Completed operations by kind
//! - `ledger_operation_duration_seconds` - Histogram of operation latencies
//! - `ledger_commission_total` - Cumulative commission accrued
//! - `ledger_audit_difference` - Last reconciliation difference
//!
//! Metrics live in a per-ledger registry rather than the process-global
//! default, so multiple ledger instances (and tests) can coexist.

use prometheus::{
    Counter, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Completed operations, labeled by kind
    pub operations_total: IntCounterVec,

    /// Operation duration histogram
    pub operation_duration: Histogram,

    /// Cumulative commission accrued to the treasury
    pub commission_total: Counter,

    /// Difference reported by the last reconciliation run
    pub audit_difference: Gauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new(
                "ledger_operations_total",
                "Completed ledger operations by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of ledger operation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let commission_total = Counter::new(
            "ledger_commission_total",
            "Cumulative commission accrued to the treasury",
        )?;
        registry.register(Box::new(commission_total.clone()))?;

        let audit_difference = Gauge::new(
            "ledger_audit_difference",
            "Difference reported by the last reconciliation run",
        )?;
        registry.register(Box::new(audit_difference.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            commission_total,
            audit_difference,
            registry,
        })
    }

    /// Record a completed operation
    pub fn record_operation(&self, kind: &str, duration_seconds: f64) {
        self.operations_total.with_label_values(&[kind]).inc();
        self.operation_duration.observe(duration_seconds);
    }

    /// Record commission accrual
    pub fn record_commission(&self, amount: f64) {
        self.commission_total.inc_by(amount);
    }

    /// Record the latest reconciliation difference
    pub fn record_audit_difference(&self, difference: f64) {
        self.audit_difference.set(difference);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
