//! Per-user balance cache and the reconciler that repairs it.
//!
//! The cache is a materialized view of the ledger. It is advanced by
//! [`crate::ledger::post`] for transactions that are already effective and
//! overwritten by [`BalanceCache::reconcile`], which always recomputes from
//! the ledger. Transactions with a future `effective_at` enter the cache at
//! the first reconciliation after they take effect.

use crate::ledger::{CreditLedger, CreditTransaction};
use crate::types::{Credits, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cached balance of one user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    /// Account holder
    pub user_id: UserId,
    /// Spendable credits
    pub available_credits: Credits,
    /// Total credits ever received
    pub lifetime_credits: Credits,
    /// Last write to this record
    pub last_updated: DateTime<Utc>,
}

impl UserBalance {
    /// Balance of a user the cache has never seen
    #[must_use]
    pub const fn empty(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            available_credits: 0,
            lifetime_credits: 0,
            last_updated: at,
        }
    }
}

/// A divergence found and repaired by reconciliation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    /// When it was detected
    pub detected_at: DateTime<Utc>,
    /// computed - cached, available credits
    pub delta_available_credits: Credits,
    /// computed - cached, lifetime credits
    pub delta_lifetime_credits: Credits,
}

/// Reconciliation knobs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Fold the ledger up to this instant (default: now). An instant in the
    /// past rewinds the cache unless `dry_run` is set.
    pub as_of: Option<DateTime<Utc>>,
    /// Compute the report without writing the cache
    pub dry_run: bool,
}

/// Outcome of reconciling one user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Account holder
    pub user_id: UserId,
    /// Balance computed from the ledger
    pub available_credits: Credits,
    /// Lifetime credits computed from the ledger
    pub lifetime_credits: Credits,
    /// Whether the cached values differed from the computed ones
    pub was_updated: bool,
    /// computed - cached
    pub delta_available_credits: Credits,
    /// computed - cached
    pub delta_lifetime_credits: Credits,
    /// Drifts recorded for this user so far, including this one
    pub inconsistency_count: usize,
}

/// Cached balances plus the drift history
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCache {
    balances: HashMap<UserId, UserBalance>,
    #[serde(default)]
    drift_log: HashMap<UserId, Vec<BalanceDrift>>,
}

impl BalanceCache {
    /// Creates an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached balance, possibly stale
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&UserBalance> {
        self.balances.get(user_id)
    }

    /// Cached spendable credits (zero for unknown users)
    #[must_use]
    pub fn available(&self, user_id: &UserId) -> Credits {
        self.balances
            .get(user_id)
            .map_or(0, |balance| balance.available_credits)
    }

    /// Recorded drifts for a user
    #[must_use]
    pub fn drifts(&self, user_id: &UserId) -> &[BalanceDrift] {
        self.drift_log.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every user with a cached balance
    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.balances.keys()
    }

    /// Folds a freshly appended transaction into the cache
    pub(crate) fn apply(&mut self, tx: &CreditTransaction, now: DateTime<Utc>) {
        if tx.effective_at > now {
            return;
        }
        let balance = self
            .balances
            .entry(tx.user_id)
            .or_insert_with(|| UserBalance::empty(tx.user_id, now));
        balance.available_credits += tx.amount;
        if tx.amount > 0 {
            balance.lifetime_credits += tx.amount;
        }
        balance.last_updated = now;
    }

    /// Recomputes one user's balance from the ledger and repairs the cache.
    ///
    /// Running it twice in a row reports `was_updated == false` the second
    /// time. A user with no transactions and no cache entry reconciles to
    /// zero without creating a record.
    pub fn reconcile(
        &mut self,
        ledger: &CreditLedger,
        user_id: UserId,
        now: DateTime<Utc>,
        options: ReconcileOptions,
    ) -> ReconcileReport {
        let as_of = options.as_of.unwrap_or(now);
        let available = ledger.sum_for_user(&user_id, as_of);
        let lifetime = ledger.lifetime_for_user(&user_id, as_of);

        let (cached_available, cached_lifetime) = self
            .balances
            .get(&user_id)
            .map_or((0, 0), |b| (b.available_credits, b.lifetime_credits));

        let delta_available = available - cached_available;
        let delta_lifetime = lifetime - cached_lifetime;
        let was_updated = delta_available != 0 || delta_lifetime != 0;

        if was_updated && !options.dry_run {
            tracing::info!(
                user_id = %user_id,
                cached = cached_available,
                computed = available,
                delta = delta_available,
                "Balance drift repaired"
            );
            crate::metrics::LedgerMetrics::record_drift(delta_available);

            self.balances.insert(
                user_id,
                UserBalance {
                    user_id,
                    available_credits: available,
                    lifetime_credits: lifetime,
                    last_updated: now,
                },
            );
            self.drift_log.entry(user_id).or_default().push(BalanceDrift {
                detected_at: now,
                delta_available_credits: delta_available,
                delta_lifetime_credits: delta_lifetime,
            });
        }

        let recorded = self.drifts(&user_id).len();
        let inconsistency_count = if was_updated && options.dry_run {
            recorded + 1
        } else {
            recorded
        };

        ReconcileReport {
            user_id,
            available_credits: available,
            lifetime_credits: lifetime,
            was_updated,
            delta_available_credits: delta_available,
            delta_lifetime_credits: delta_lifetime,
            inconsistency_count,
        }
    }
}
