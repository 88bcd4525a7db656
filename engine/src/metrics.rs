//! Domain metrics.
//!
//! Thin recorders over the `metrics` facade. Without an installed recorder
//! every call is a no-op, so reducers and tests can record freely.

use crate::ledger::TransactionType;
use crate::sweeps::SweepReport;
use crate::types::Credits;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Ledger and reconciliation metrics
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// One ledger append
    pub fn record_append(kind: TransactionType, amount: Credits) {
        counter!("credits_ledger_appends_total", "type" => kind.as_str()).increment(1);
        counter!("credits_ledger_credits_total", "type" => kind.as_str())
            .increment(amount.unsigned_abs());
    }

    /// Drift repaired by reconciliation
    pub fn record_drift(delta: Credits) {
        counter!("credits_balance_drift_total").increment(1);
        #[allow(clippy::cast_precision_loss)]
        histogram!("credits_balance_drift_credits").record(delta.unsigned_abs() as f64);
    }
}

/// Booking lifecycle metrics
pub struct BookingMetrics;

impl BookingMetrics {
    /// A booking entered its first status
    pub fn record_created(status: &'static str) {
        counter!("credits_bookings_created_total", "status" => status).increment(1);
    }

    /// A booking left the active set
    pub fn record_closed(status: &'static str) {
        counter!("credits_bookings_closed_total", "status" => status).increment(1);
    }

    /// Credits returned to a customer
    pub fn record_refund(credits: Credits) {
        counter!("credits_refunds_total").increment(1);
        counter!("credits_refunded_credits_total").increment(credits.unsigned_abs());
    }

    /// A command was refused
    pub fn record_rejected(kind: &'static str) {
        counter!("credits_commands_rejected_total", "reason" => kind).increment(1);
    }
}

/// Background sweep metrics
pub struct SweepMetrics;

impl SweepMetrics {
    /// One sweep run
    pub fn record(job: &'static str, report: &SweepReport) {
        counter!("credits_sweep_runs_total", "job" => job).increment(1);
        counter!("credits_sweep_processed_total", "job" => job)
            .increment(u64::try_from(report.processed).unwrap_or(u64::MAX));
        counter!("credits_sweep_failed_total", "job" => job)
            .increment(u64::try_from(report.failed).unwrap_or(u64::MAX));
    }

    /// Size of the discounted-classes summary
    pub fn record_summary_size(entries: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("credits_discount_summary_entries").set(entries as f64);
    }
}

/// Notification delivery metrics
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Delivery outcome
    pub fn record(event: &'static str, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        counter!("credits_notifications_total", "event" => event, "outcome" => outcome).increment(1);
    }
}

/// Register metric descriptions with the installed recorder
pub fn describe() {
    describe_counter!("credits_ledger_appends_total", "Ledger transactions appended, by type");
    describe_counter!("credits_ledger_credits_total", "Absolute credits moved, by type");
    describe_counter!("credits_balance_drift_total", "Cache drifts repaired by reconciliation");
    describe_histogram!("credits_balance_drift_credits", "Size of repaired cache drifts in credits");
    describe_counter!("credits_bookings_created_total", "Bookings created, by initial status");
    describe_counter!("credits_bookings_closed_total", "Bookings closed, by final status");
    describe_counter!("credits_refunds_total", "Refund transactions issued");
    describe_counter!("credits_refunded_credits_total", "Credits refunded");
    describe_counter!("credits_commands_rejected_total", "Commands refused, by reason");
    describe_counter!("credits_sweep_runs_total", "Background sweep runs, by job");
    describe_counter!("credits_sweep_processed_total", "Items transitioned by sweeps, by job");
    describe_counter!("credits_sweep_failed_total", "Items a sweep skipped after an error, by job");
    describe_gauge!("credits_discount_summary_entries", "Classes in the discounted summary");
    describe_counter!("credits_notifications_total", "Notification deliveries, by event and outcome");
}
