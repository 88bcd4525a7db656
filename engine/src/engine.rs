//! Typed facade over the credits [`Store`].
//!
//! Commands go through the store (one serialized transaction each); queries
//! take a read lock and clone what they return.

use crate::balance::{ReconcileOptions, ReconcileReport, UserBalance};
use crate::booking::{Booking, BookingStatus, Canceller};
use crate::catalog::ClassInstance;
use crate::earnings::{self, EarningsReport};
use crate::error::{CreditsError, Result};
use crate::ledger::CreditTransaction;
use crate::pricing::{self, PriceBreakdown};
use crate::reducer::{
    BookingReceipt, CancellationReceipt, ClassCancellationReceipt, CreditsAction,
    CreditsEnvironment, CreditsOutput, CreditsReducer, CreditsState,
};
use crate::reminders::{RelatedEntity, ReminderKind, ScheduledNotification};
use crate::summary::DiscountSummary;
use crate::sweeps::SweepReport;
use crate::types::{
    BookingId, BusinessId, ClassInstanceId, Credits, NotificationId, TransactionId, UserId,
    UserProfile,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use studio_credits_runtime::Store;

/// The store type behind [`Engine`]
pub type CreditsStore = Store<CreditsState, CreditsAction, CreditsEnvironment, CreditsReducer>;

macro_rules! expect_output {
    ($output:expr, $pattern:pat => $value:expr) => {
        match $output {
            $pattern => Ok($value),
            other => Err(CreditsError::UnexpectedOutput(format!("{other:?}"))),
        }
    };
}

/// Booking and credits engine
#[derive(Clone)]
pub struct Engine {
    store: CreditsStore,
}

impl Engine {
    /// Empty engine
    #[must_use]
    pub fn new(env: CreditsEnvironment) -> Self {
        Self::with_state(CreditsState::new(), env)
    }

    /// Engine over existing state
    #[must_use]
    pub fn with_state(state: CreditsState, env: CreditsEnvironment) -> Self {
        Self {
            store: Store::new(state, CreditsReducer::new(), env),
        }
    }

    /// Restores an engine from [`Engine::snapshot_json`] output.
    ///
    /// # Errors
    ///
    /// [`CreditsError::Snapshot`] when the JSON does not describe a state.
    pub fn from_snapshot_json(json: &str, env: CreditsEnvironment) -> Result<Self> {
        let state: CreditsState =
            serde_json::from_str(json).map_err(|e| CreditsError::Snapshot(e.to_string()))?;
        Ok(Self::with_state(state, env))
    }

    /// Underlying store
    #[must_use]
    pub const fn store(&self) -> &CreditsStore {
        &self.store
    }

    /// Injected environment
    #[must_use]
    pub fn environment(&self) -> &CreditsEnvironment {
        self.store.environment()
    }

    async fn send(&self, action: CreditsAction) -> Result<CreditsOutput> {
        self.store.send(action).await
    }

    // ----- catalog inputs -----

    /// Adds or replaces a user's display profile.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn register_user(&self, profile: UserProfile) -> Result<()> {
        self.send(CreditsAction::RegisterUser { profile }).await.map(drop)
    }

    /// Adds or replaces a class instance; booking counters and lifecycle
    /// status already tracked for it are kept.
    ///
    /// # Errors
    ///
    /// [`CreditsError::InvalidDiscountRule`] for a malformed rule.
    pub async fn upsert_class_instance(&self, instance: ClassInstance) -> Result<()> {
        self.send(CreditsAction::UpsertClassInstance { instance })
            .await
            .map(drop)
    }

    // ----- ledger and balances -----

    /// Grants complimentary credits.
    ///
    /// # Errors
    ///
    /// [`CreditsError::InvalidAmount`] for a non-positive amount.
    pub async fn gift_credits(
        &self,
        user_id: UserId,
        amount: Credits,
        description: Option<String>,
    ) -> Result<TransactionId> {
        let output = self
            .send(CreditsAction::GiftCredits {
                user_id,
                amount,
                description,
            })
            .await?;
        expect_output!(output, CreditsOutput::Transaction(id) => id)
    }

    /// Records purchased credits, spendable immediately.
    ///
    /// # Errors
    ///
    /// [`CreditsError::InvalidAmount`] for a non-positive amount.
    pub async fn purchase_credits(
        &self,
        user_id: UserId,
        amount: Credits,
        external_ref: Option<String>,
    ) -> Result<TransactionId> {
        self.purchase_credits_effective_at(user_id, amount, external_ref, None)
            .await
    }

    /// Records purchased credits that become spendable at `effective_at`.
    ///
    /// # Errors
    ///
    /// [`CreditsError::InvalidAmount`] for a non-positive amount.
    pub async fn purchase_credits_effective_at(
        &self,
        user_id: UserId,
        amount: Credits,
        external_ref: Option<String>,
        effective_at: Option<DateTime<Utc>>,
    ) -> Result<TransactionId> {
        let output = self
            .send(CreditsAction::PurchaseCredits {
                user_id,
                amount,
                external_ref,
                effective_at,
            })
            .await?;
        expect_output!(output, CreditsOutput::Transaction(id) => id)
    }

    /// Current balance. With `reconcile`, the cache is first repaired from
    /// the ledger in the same command; without it, the cached value is
    /// returned as-is.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn get_balance(&self, user_id: UserId, reconcile: bool) -> Result<UserBalance> {
        let output = self
            .send(CreditsAction::GetBalance { user_id, reconcile })
            .await?;
        expect_output!(output, CreditsOutput::Balance(balance) => balance)
    }

    /// Recomputes one user's balance from the ledger.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn reconcile_user(
        &self,
        user_id: UserId,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport> {
        let output = self
            .send(CreditsAction::ReconcileUser { user_id, options })
            .await?;
        expect_output!(output, CreditsOutput::Reconciled(report) => report)
    }

    /// Reconciles every user with a ledger or cache entry.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn reconcile_all(&self, options: ReconcileOptions) -> Result<Vec<ReconcileReport>> {
        let output = self.send(CreditsAction::ReconcileAll { options }).await?;
        expect_output!(output, CreditsOutput::ReconciledAll(reports) => reports)
    }

    // ----- booking lifecycle -----

    /// Books a seat; a repeated request returns the existing booking.
    ///
    /// # Errors
    ///
    /// `NotFound`, `ClassNotBookable`, `ClassFull`,
    /// `MaxActiveBookingsExceeded`, or `InsufficientCredits`.
    pub async fn book_class(
        &self,
        user_id: UserId,
        class_instance_id: ClassInstanceId,
        description: Option<String>,
    ) -> Result<BookingReceipt> {
        let output = self
            .send(CreditsAction::BookClass {
                user_id,
                class_instance_id,
                description,
            })
            .await?;
        expect_output!(output, CreditsOutput::Booked(receipt) => receipt)
    }

    /// Cancels an active booking with a timing-tier refund.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, or `InvalidStatusTransition`.
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        cancelled_by: Canceller,
        reason: Option<String>,
    ) -> Result<CancellationReceipt> {
        let output = self
            .send(CreditsAction::CancelBooking {
                booking_id,
                cancelled_by,
                reason,
            })
            .await?;
        expect_output!(output, CreditsOutput::Cancelled(receipt) => receipt)
    }

    /// Approves a booking awaiting approval.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, or `InvalidStatusTransition`.
    pub async fn approve_booking(&self, booking_id: BookingId, business_id: BusinessId) -> Result<()> {
        self.send(CreditsAction::ApproveBooking {
            booking_id,
            business_id,
        })
        .await
        .map(drop)
    }

    /// Rejects a booking awaiting approval with a full refund.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, or `InvalidStatusTransition`.
    pub async fn reject_booking(
        &self,
        booking_id: BookingId,
        business_id: BusinessId,
        reason: Option<String>,
    ) -> Result<CancellationReceipt> {
        let output = self
            .send(CreditsAction::RejectBooking {
                booking_id,
                business_id,
                reason,
            })
            .await?;
        expect_output!(output, CreditsOutput::Cancelled(receipt) => receipt)
    }

    /// Marks a pending booking as attended.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, `InvalidStatusTransition`, or
    /// `ClassNotStarted`.
    pub async fn complete_booking(&self, booking_id: BookingId, business_id: BusinessId) -> Result<()> {
        self.send(CreditsAction::CompleteBooking {
            booking_id,
            business_id,
        })
        .await
        .map(drop)
    }

    /// Cancels a class and refunds every active booking in full.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, or `InvalidStatusTransition`.
    pub async fn cancel_class_instance(
        &self,
        class_instance_id: ClassInstanceId,
        business_id: BusinessId,
        reason: Option<String>,
    ) -> Result<ClassCancellationReceipt> {
        let output = self
            .send(CreditsAction::CancelClassInstance {
                class_instance_id,
                business_id,
                reason,
            })
            .await?;
        expect_output!(output, CreditsOutput::ClassCancelled(receipt) => receipt)
    }

    // ----- reminders -----

    /// Arms a reminder; `None` when it would already be due.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn schedule_class_reminder(
        &self,
        booking_id: BookingId,
        user_id: UserId,
        class_start: DateTime<Utc>,
        kind: ReminderKind,
    ) -> Result<Option<NotificationId>> {
        let output = self
            .send(CreditsAction::ScheduleClassReminder {
                booking_id,
                user_id,
                class_start,
                kind,
            })
            .await?;
        expect_output!(output, CreditsOutput::ReminderScheduled(id) => id)
    }

    /// Withdraws a booking's pending reminders.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn cancel_reminders_for_booking(&self, booking_id: BookingId) -> Result<usize> {
        let output = self
            .send(CreditsAction::CancelRemindersForBooking { booking_id })
            .await?;
        expect_output!(output, CreditsOutput::RemindersCancelled(n) => n)
    }

    /// Withdraws pending reminders of every booking on a class.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn cancel_reminders_for_class(&self, class_instance_id: ClassInstanceId) -> Result<usize> {
        let output = self
            .send(CreditsAction::CancelRemindersForClass { class_instance_id })
            .await?;
        expect_output!(output, CreditsOutput::RemindersCancelled(n) => n)
    }

    // ----- sweeps -----

    async fn sweep(&self, action: CreditsAction) -> Result<SweepReport> {
        let output = self.send(action).await?;
        expect_output!(output, CreditsOutput::Swept(report) => report)
    }

    /// Fires due reminders.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn dispatch_due_reminders(&self) -> Result<SweepReport> {
        self.sweep(CreditsAction::DispatchDueReminders).await
    }

    /// Moves long-started pending bookings to `no_show` and rejects
    /// long-started bookings still awaiting approval, with a full refund.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn mark_no_shows(&self) -> Result<SweepReport> {
        self.sweep(CreditsAction::MarkNoShows).await
    }

    /// Moves long-ended classes to `completed`.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn mark_classes_completed(&self) -> Result<SweepReport> {
        self.sweep(CreditsAction::MarkClassesCompleted).await
    }

    /// Replaces the discounted-classes summary.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn rebuild_discount_summary(&self) -> Result<SweepReport> {
        self.sweep(CreditsAction::RebuildDiscountSummary).await
    }

    // ----- queries -----

    /// Booking by id, soft-deleted rows included
    pub async fn booking(&self, booking_id: BookingId) -> Option<Booking> {
        self.store.state(|s| s.bookings.get(&booking_id).cloned()).await
    }

    /// Live bookings of a user, oldest first
    pub async fn bookings_for_user(&self, user_id: UserId) -> Vec<Booking> {
        self.store
            .state(|s| s.bookings.for_user(&user_id).cloned().collect())
            .await
    }

    /// Bookings in `status` created before `cutoff`
    pub async fn bookings_booked_before(
        &self,
        status: BookingStatus,
        cutoff: DateTime<Utc>,
    ) -> Vec<BookingId> {
        self.store
            .state(|s| s.bookings.booked_before(status, cutoff))
            .await
    }

    /// Class instance by id
    pub async fn class_instance(&self, class_instance_id: ClassInstanceId) -> Option<ClassInstance> {
        self.store
            .state(|s| s.catalog.get(&class_instance_id).cloned())
            .await
    }

    /// A user's ledger history
    pub async fn transactions_for_user(&self, user_id: UserId) -> Vec<CreditTransaction> {
        self.store
            .state(|s| s.ledger.for_user(&user_id).cloned().collect())
            .await
    }

    /// Ledger sum as of `as_of` (default: now)
    pub async fn sum_for_user(&self, user_id: UserId, as_of: Option<DateTime<Utc>>) -> Credits {
        let as_of = as_of.unwrap_or_else(|| self.environment().now());
        self.store
            .state(|s| s.ledger.sum_for_user(&user_id, as_of))
            .await
    }

    /// Every reminder record about a booking
    pub async fn reminders_for_booking(&self, booking_id: BookingId) -> Vec<ScheduledNotification> {
        self.store
            .state(|s| {
                s.reminders
                    .for_entity(RelatedEntity::Booking(booking_id))
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .await
    }

    /// The discounted-classes summary as last rebuilt
    pub async fn discount_summary(&self) -> DiscountSummary {
        self.store.state(|s| s.discount_summary.clone()).await
    }

    /// Recognized revenue per month for a business
    pub async fn earnings_for_business(&self, business_id: BusinessId) -> EarningsReport {
        self.store
            .state(|s| earnings::earnings_for_business(&s.bookings, business_id))
            .await
    }

    /// What a booking on the instance would cost right now.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown instance, `InvalidDiscountRule` when the
    /// winning rule is malformed.
    pub async fn price_for_instance(&self, class_instance_id: ClassInstanceId) -> Result<PriceBreakdown> {
        let now = self.environment().now();
        self.store
            .state(|s| {
                let instance = s
                    .catalog
                    .live(&class_instance_id)
                    .ok_or_else(|| CreditsError::not_found("class instance", class_instance_id))?;
                pricing::calculate_final_price_from_instance(instance, now).map(|(price, _)| price)
            })
            .await
    }

    /// Serializes the full state.
    ///
    /// # Errors
    ///
    /// [`CreditsError::Snapshot`] if serialization fails.
    pub async fn snapshot_json(&self) -> Result<String> {
        self.store
            .state(serde_json::to_string_pretty)
            .await
            .map_err(|e| CreditsError::Snapshot(e.to_string()))
    }

    /// Copy of the full state
    pub async fn state(&self) -> CreditsState {
        self.store.state(Clone::clone).await
    }

    /// Waits for detached effects (notifications) to finish
    pub async fn settle(&self) {
        self.store.settle().await;
    }

    /// Stops accepting commands and drains effects.
    ///
    /// # Errors
    ///
    /// [`CreditsError::Store`] when effects outlive `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        Ok(self.store.shutdown(timeout).await?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("environment", self.environment())
            .field("pending_effects", &self.store.pending_effects())
            .finish_non_exhaustive()
    }
}
