//! Append-only credit ledger.
//!
//! The ledger is the source of truth for every balance. Transactions are
//! never mutated or removed once appended; corrections are new transactions.
//! [`post`] is the only write path that also touches the balance cache, and
//! it always appends to the ledger first.

use crate::balance::BalanceCache;
use crate::error::{CreditsError, Result};
use crate::types::{
    BookingId, BusinessId, ClassInstanceId, ClassTemplateId, Credits, TransactionId, UserId,
    VenueId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why credits moved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Complimentary credits granted by the platform or a business
    Gift,
    /// Credits bought through the payment provider
    Purchase,
    /// Credits consumed by a booking
    Spend,
    /// Credits returned after a cancellation or rejection
    Refund,
}

impl TransactionType {
    /// Whether amounts of this type must be positive (otherwise negative)
    #[must_use]
    pub const fn is_credit(self) -> bool {
        !matches!(self, Self::Spend)
    }

    /// Stable label for logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gift => "gift",
            Self::Purchase => "purchase",
            Self::Spend => "spend",
            Self::Refund => "refund",
        }
    }
}

/// Optional references tying a transaction to the rest of the marketplace
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linkage {
    /// Business the credits were spent with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<BusinessId>,
    /// Venue of the class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<VenueId>,
    /// Template of the class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_template_id: Option<ClassTemplateId>,
    /// Class instance booked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_instance_id: Option<ClassInstanceId>,
    /// Booking charged or refunded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<BookingId>,
    /// Payment provider reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An immutable ledger entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Transaction identifier
    pub id: TransactionId,
    /// Account holder
    pub user_id: UserId,
    /// Signed amount: positive credits, negative debits
    pub amount: Credits,
    /// Why the credits moved
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Instant from which the amount counts toward the balance
    pub effective_at: DateTime<Utc>,
    /// Insert time
    pub created_at: DateTime<Utc>,
    /// References to related entities
    #[serde(flatten)]
    pub linkage: Linkage,
}

/// Input to [`CreditLedger::append`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransaction {
    /// Account holder
    pub user_id: UserId,
    /// Signed amount
    pub amount: Credits,
    /// Transaction type
    pub kind: TransactionType,
    /// References to related entities
    pub linkage: Linkage,
    /// Defaults to the insert time
    pub effective_at: Option<DateTime<Utc>>,
}

impl NewTransaction {
    /// Transaction effective immediately with no linkage
    #[must_use]
    pub fn new(user_id: UserId, amount: Credits, kind: TransactionType) -> Self {
        Self {
            user_id,
            amount,
            kind,
            linkage: Linkage::default(),
            effective_at: None,
        }
    }

    /// Attaches linkage
    #[must_use]
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Delays the effective time
    #[must_use]
    pub const fn effective_at(mut self, at: DateTime<Utc>) -> Self {
        self.effective_at = Some(at);
        self
    }

    /// Checks the amount against the transaction type
    ///
    /// # Errors
    ///
    /// [`CreditsError::InvalidAmount`] for zero, or a sign contradicting the type.
    pub fn validate(&self) -> Result<()> {
        let sign_ok = if self.kind.is_credit() {
            self.amount > 0
        } else {
            self.amount < 0
        };
        if sign_ok {
            Ok(())
        } else {
            Err(CreditsError::InvalidAmount {
                amount: self.amount,
            })
        }
    }
}

/// All transactions, with a per-user position index
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CreditTransaction>", into = "Vec<CreditTransaction>")]
pub struct CreditLedger {
    transactions: Vec<CreditTransaction>,
    by_user: HashMap<UserId, Vec<usize>>,
}

impl From<Vec<CreditTransaction>> for CreditLedger {
    fn from(transactions: Vec<CreditTransaction>) -> Self {
        let mut by_user: HashMap<UserId, Vec<usize>> = HashMap::new();
        for (position, tx) in transactions.iter().enumerate() {
            by_user.entry(tx.user_id).or_default().push(position);
        }
        Self {
            transactions,
            by_user,
        }
    }
}

impl From<CreditLedger> for Vec<CreditTransaction> {
    fn from(ledger: CreditLedger) -> Self {
        ledger.transactions
    }
}

impl CreditLedger {
    /// Creates an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transaction and returns it.
    ///
    /// No balance check happens here; callers validate sufficiency before
    /// appending a debit.
    ///
    /// # Errors
    ///
    /// [`CreditsError::InvalidAmount`] when the amount is zero or its sign
    /// contradicts the type. Nothing is appended in that case.
    pub fn append(&mut self, tx: NewTransaction, now: DateTime<Utc>) -> Result<&CreditTransaction> {
        tx.validate()?;

        let position = self.transactions.len();
        self.transactions.push(CreditTransaction {
            id: TransactionId::new(),
            user_id: tx.user_id,
            amount: tx.amount,
            kind: tx.kind,
            effective_at: tx.effective_at.unwrap_or(now),
            created_at: now,
            linkage: tx.linkage,
        });
        self.by_user.entry(tx.user_id).or_default().push(position);

        Ok(&self.transactions[position])
    }

    /// Transactions of one user in insertion order
    pub fn for_user(&self, user_id: &UserId) -> impl Iterator<Item = &CreditTransaction> {
        self.by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|position| self.transactions.get(*position))
    }

    /// Sum of the user's amounts effective at or before `as_of`
    #[must_use]
    pub fn sum_for_user(&self, user_id: &UserId, as_of: DateTime<Utc>) -> Credits {
        self.for_user(user_id)
            .filter(|tx| tx.effective_at <= as_of)
            .map(|tx| tx.amount)
            .sum()
    }

    /// Sum of the user's positive amounts effective at or before `as_of`
    #[must_use]
    pub fn lifetime_for_user(&self, user_id: &UserId, as_of: DateTime<Utc>) -> Credits {
        self.for_user(user_id)
            .filter(|tx| tx.effective_at <= as_of && tx.amount > 0)
            .map(|tx| tx.amount)
            .sum()
    }

    /// Every user with at least one transaction
    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.by_user.keys()
    }

    /// Looks up a transaction by id
    #[must_use]
    pub fn get(&self, id: &TransactionId) -> Option<&CreditTransaction> {
        self.transactions.iter().rev().find(|tx| tx.id == *id)
    }

    /// Total number of transactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Appends to the ledger, then folds the transaction into the cache.
///
/// # Errors
///
/// [`CreditsError::InvalidAmount`] from [`CreditLedger::append`]; neither the
/// ledger nor the cache is touched in that case.
pub fn post(
    ledger: &mut CreditLedger,
    cache: &mut BalanceCache,
    tx: NewTransaction,
    now: DateTime<Utc>,
) -> Result<TransactionId> {
    let appended = ledger.append(tx, now)?;
    cache.apply(appended, now);

    tracing::debug!(
        transaction_id = %appended.id,
        user_id = %appended.user_id,
        amount = appended.amount,
        kind = appended.kind.as_str(),
        "Ledger transaction appended"
    );
    crate::metrics::LedgerMetrics::record_append(appended.kind, appended.amount);

    Ok(appended.id)
}
