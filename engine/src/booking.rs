//! Booking records and the table that indexes them.
//!
//! A booking carries its own snapshot of the price, discount, class, venue,
//! and customer at booking time. Later edits to the class never reach it.

use crate::discount::DiscountSource;
use crate::types::{
    BookingId, BusinessId, ClassInstanceId, Credits, Money, TransactionId, UserId, VenueId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Booking lifecycle.
///
/// ```text
/// awaiting_approval ──approve──▶ pending ──complete──▶ completed
///        │                          │
///        ├──reject──▶ rejected_by_business
///        └──cancel──▶ cancelled_by_consumer | cancelled_by_business ◀──cancel──┤
///                                   └──sweep──▶ no_show
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Waiting for the business to approve
    AwaitingApproval,
    /// Confirmed seat
    Pending,
    /// Attended
    Completed,
    /// Cancelled by the customer
    CancelledByConsumer,
    /// Cancelled by the business
    CancelledByBusiness,
    /// Declined by the business
    RejectedByBusiness,
    /// Did not show up
    NoShow,
}

impl BookingStatus {
    /// Holds a seat and counts toward the per-user ceiling
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::Pending)
    }

    /// No further transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingApproval => "awaiting_approval",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::CancelledByConsumer => "cancelled_by_consumer",
            Self::CancelledByBusiness => "cancelled_by_business",
            Self::RejectedByBusiness => "rejected_by_business",
            Self::NoShow => "no_show",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discount frozen onto a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    /// Which rule source produced it
    pub source: DiscountSource,
    /// Rule name at booking time
    pub rule_name: String,
    /// Effective discount in cents
    pub amount_saved: Money,
    /// Effective discount in credits
    pub credits_saved: Credits,
}

/// Class fields copied at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSnapshot {
    /// Class name
    pub name: String,
    /// Start time
    pub start_time: DateTime<Utc>,
    /// End time
    pub end_time: DateTime<Utc>,
}

/// Venue fields copied at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueSnapshot {
    /// Venue identifier
    pub venue_id: VenueId,
    /// Venue name
    pub name: String,
}

/// Customer fields copied at booking time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
}

/// Who is cancelling a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "actor", content = "id", rename_all = "snake_case")]
pub enum Canceller {
    /// The customer who made the booking
    Consumer(UserId),
    /// The business running the class
    Business(BusinessId),
}

impl Canceller {
    /// Status a cancellation by this actor lands in
    #[must_use]
    pub const fn target_status(self) -> BookingStatus {
        match self {
            Self::Consumer(_) => BookingStatus::CancelledByConsumer,
            Self::Business(_) => BookingStatus::CancelledByBusiness,
        }
    }
}

/// A customer's reservation of one class instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Customer
    pub user_id: UserId,
    /// Class instance booked
    pub class_instance_id: ClassInstanceId,
    /// Business running the class
    pub business_id: BusinessId,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Class price at booking time
    pub original_price: Money,
    /// Price charged after discount
    pub final_price: Money,
    /// Credits debited
    pub credits_used: Credits,
    /// Discount applied, if any
    pub applied_discount: Option<AppliedDiscount>,
    /// Class at booking time
    pub class_snapshot: ClassSnapshot,
    /// Venue at booking time
    pub venue_snapshot: VenueSnapshot,
    /// Customer at booking time
    pub user_snapshot: UserSnapshot,
    /// Free-form note from the customer
    pub description: Option<String>,
    /// Ledger debit for this booking (absent for free bookings)
    pub spend_transaction_id: Option<TransactionId>,
    /// Ledger credit returned on cancellation (absent when nothing was refunded)
    pub refund_transaction_id: Option<TransactionId>,
    /// Refund in cents; set on cancellation, rejection, and no-show
    pub refund_amount: Option<Money>,
    /// Refund in credits; set alongside `refund_amount`
    pub refund_credits: Option<Credits>,
    /// Creation time
    pub booked_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// Set on cancellation
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set on approval
    pub approved_at: Option<DateTime<Utc>>,
    /// Set on rejection
    pub rejected_at: Option<DateTime<Utc>>,
    /// Set on completion
    pub completed_at: Option<DateTime<Utc>>,
    /// Set by the no-show sweep
    pub no_show_at: Option<DateTime<Utc>>,
    /// Who cancelled
    pub cancelled_by: Option<Canceller>,
    /// Why it was cancelled
    pub cancel_reason: Option<String>,
    /// Why the business rejected it
    pub rejection_reason: Option<String>,
    /// Soft-delete flag
    #[serde(default)]
    pub deleted: bool,
}

impl Booking {
    /// Class start, from the snapshot
    #[must_use]
    pub const fn class_start(&self) -> DateTime<Utc> {
        self.class_snapshot.start_time
    }
}

type StatusKey = (BookingStatus, DateTime<Utc>, BookingId);

/// Bookings with the indexes the state machine and sweeps rely on
///
/// Every status change goes through [`BookingTable::update`] so that the
/// `(status, class start)` and `(status, booked at)` indexes stay current.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Booking>", into = "Vec<Booking>")]
pub struct BookingTable {
    rows: HashMap<BookingId, Booking>,
    by_class_start: BTreeSet<StatusKey>,
    by_booked_at: BTreeSet<StatusKey>,
    by_instance: HashMap<ClassInstanceId, Vec<BookingId>>,
    by_user: HashMap<UserId, Vec<BookingId>>,
}

impl From<Vec<Booking>> for BookingTable {
    fn from(rows: Vec<Booking>) -> Self {
        let mut table = Self::default();
        for booking in rows {
            table.insert(booking);
        }
        table
    }
}

impl From<BookingTable> for Vec<Booking> {
    fn from(table: BookingTable) -> Self {
        let mut rows: Vec<_> = table.rows.into_values().collect();
        rows.sort_by_key(|b| (b.booked_at, b.id));
        rows
    }
}

impl BookingTable {
    /// Creates an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new booking
    pub fn insert(&mut self, booking: Booking) {
        self.index(&booking);
        self.by_instance
            .entry(booking.class_instance_id)
            .or_default()
            .push(booking.id);
        self.by_user.entry(booking.user_id).or_default().push(booking.id);
        self.rows.insert(booking.id, booking);
    }

    fn index(&mut self, booking: &Booking) {
        if !booking.deleted {
            self.by_class_start
                .insert((booking.status, booking.class_start(), booking.id));
            self.by_booked_at
                .insert((booking.status, booking.booked_at, booking.id));
        }
    }

    fn unindex(&mut self, booking: &Booking) {
        self.by_class_start
            .remove(&(booking.status, booking.class_start(), booking.id));
        self.by_booked_at
            .remove(&(booking.status, booking.booked_at, booking.id));
    }

    /// Looks up a booking, including soft-deleted ones
    #[must_use]
    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        self.rows.get(id)
    }

    /// Looks up a booking that is not soft-deleted
    #[must_use]
    pub fn live(&self, id: &BookingId) -> Option<&Booking> {
        self.rows.get(id).filter(|b| !b.deleted)
    }

    /// Mutates a booking, keeping the status indexes current
    pub fn update<F>(&mut self, id: &BookingId, f: F) -> bool
    where
        F: FnOnce(&mut Booking),
    {
        let Some(mut booking) = self.rows.remove(id) else {
            return false;
        };
        self.unindex(&booking);
        f(&mut booking);
        self.index(&booking);
        self.rows.insert(booking.id, booking);
        true
    }

    /// The user's active booking for an instance, if any
    #[must_use]
    pub fn active_for(&self, user_id: &UserId, instance_id: &ClassInstanceId) -> Option<&Booking> {
        self.for_user(user_id)
            .find(|b| b.class_instance_id == *instance_id && b.status.is_active())
    }

    /// Number of the user's active bookings
    #[must_use]
    pub fn active_count(&self, user_id: &UserId) -> usize {
        self.for_user(user_id).filter(|b| b.status.is_active()).count()
    }

    /// Live bookings of a user
    pub fn for_user(&self, user_id: &UserId) -> impl Iterator<Item = &Booking> {
        self.by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.live(id))
    }

    /// Live bookings of an instance
    pub fn for_instance(&self, instance_id: &ClassInstanceId) -> impl Iterator<Item = &Booking> {
        self.by_instance
            .get(instance_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.live(id))
    }

    /// Live bookings in `status` whose class started strictly before `cutoff`
    #[must_use]
    pub fn starting_before(&self, status: BookingStatus, cutoff: DateTime<Utc>) -> Vec<BookingId> {
        self.by_class_start
            .range((status, DateTime::<Utc>::MIN_UTC, BookingId::nil())..(status, cutoff, BookingId::nil()))
            .map(|(_, _, id)| *id)
            .collect()
    }

    /// Live bookings in `status` created strictly before `cutoff`
    #[must_use]
    pub fn booked_before(&self, status: BookingStatus, cutoff: DateTime<Utc>) -> Vec<BookingId> {
        self.by_booked_at
            .range((status, DateTime::<Utc>::MIN_UTC, BookingId::nil())..(status, cutoff, BookingId::nil()))
            .map(|(_, _, id)| *id)
            .collect()
    }

    /// Every booking, including soft-deleted ones
    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.rows.values()
    }

    /// Number of bookings, including soft-deleted ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking(user: UserId, instance: ClassInstanceId, start: DateTime<Utc>) -> Booking {
        Booking {
            id: BookingId::new(),
            user_id: user,
            class_instance_id: instance,
            business_id: BusinessId::new(),
            status: BookingStatus::Pending,
            original_price: Money::from_cents(2000),
            final_price: Money::from_cents(2000),
            credits_used: 40,
            applied_discount: None,
            class_snapshot: ClassSnapshot {
                name: "Spin".to_string(),
                start_time: start,
                end_time: start + Duration::hours(1),
            },
            venue_snapshot: VenueSnapshot {
                venue_id: VenueId::new(),
                name: "Downtown".to_string(),
            },
            user_snapshot: UserSnapshot {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            },
            description: None,
            spend_transaction_id: None,
            refund_transaction_id: None,
            refund_amount: None,
            refund_credits: None,
            booked_at: start - Duration::days(1),
            updated_at: start - Duration::days(1),
            cancelled_at: None,
            approved_at: None,
            rejected_at: None,
            completed_at: None,
            no_show_at: None,
            cancelled_by: None,
            cancel_reason: None,
            rejection_reason: None,
            deleted: false,
        }
    }

    #[test]
    fn status_index_follows_updates() {
        let now = Utc::now();
        let mut table = BookingTable::new();
        let row = booking(UserId::new(), ClassInstanceId::new(), now - Duration::hours(4));
        let id = row.id;
        table.insert(row);

        let cutoff = now - Duration::hours(3);
        assert_eq!(table.starting_before(BookingStatus::Pending, cutoff), vec![id]);

        table.update(&id, |b| b.status = BookingStatus::NoShow);
        assert!(table.starting_before(BookingStatus::Pending, cutoff).is_empty());
        assert_eq!(table.starting_before(BookingStatus::NoShow, cutoff), vec![id]);
    }

    #[test]
    fn active_lookup_ignores_terminal_bookings() {
        let now = Utc::now();
        let mut table = BookingTable::new();
        let (user, instance) = (UserId::new(), ClassInstanceId::new());
        let row = booking(user, instance, now + Duration::hours(10));
        let id = row.id;
        table.insert(row);
        assert_eq!(table.active_for(&user, &instance).map(|b| b.id), Some(id));
        assert_eq!(table.active_count(&user), 1);

        table.update(&id, |b| b.status = BookingStatus::CancelledByConsumer);
        assert!(table.active_for(&user, &instance).is_none());
        assert_eq!(table.active_count(&user), 0);
    }

    #[test]
    fn soft_deleted_rows_drop_out_of_queries() {
        let now = Utc::now();
        let mut table = BookingTable::new();
        let (user, instance) = (UserId::new(), ClassInstanceId::new());
        let row = booking(user, instance, now - Duration::hours(5));
        let id = row.id;
        table.insert(row);
        table.update(&id, |b| b.deleted = true);

        assert!(table.live(&id).is_none());
        assert!(table.get(&id).is_some());
        assert_eq!(table.for_instance(&instance).count(), 0);
        assert!(table.starting_before(BookingStatus::Pending, now).is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&BookingStatus::AwaitingApproval).unwrap_or_default();
        assert_eq!(json, "\"awaiting_approval\"");
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::NoShow.is_terminal());
    }
}
