//! The credits reducer: one state, one action enum, one transaction per action.
//!
//! Every handler follows validate-then-apply. All precondition checks run
//! against the untouched state and return early on failure; mutation only
//! starts once nothing can fail. The [`studio_credits_runtime::Store`] runs
//! each action under its write lock, so the whole handler is one
//! serializable transaction. Effects (reminder scheduling, notifications)
//! execute after it commits.

use crate::balance::{BalanceCache, ReconcileOptions, ReconcileReport, UserBalance};
use crate::booking::{AppliedDiscount, BookingStatus, BookingTable, Canceller};
use crate::catalog::{ClassCatalog, ClassInstance};
use crate::config::{BookingPolicy, DeliveryPolicy};
use crate::error::{CreditsError, Result};
use crate::ledger::{self, CreditLedger, Linkage, NewTransaction, TransactionType};
use crate::lifecycle;
use crate::notify::{self, NotificationEvent, Notifier};
use crate::pricing::RefundTier;
use crate::reminders::{RelatedEntity, ReminderKind, ReminderLedger};
use crate::summary::DiscountSummary;
use crate::sweeps::{self, SweepReport};
use crate::types::{
    BookingId, BusinessId, ClassInstanceId, Credits, Money, NotificationId, TransactionId,
    UserId, UserProfile,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use studio_credits_core::effect::Effect;
use studio_credits_core::environment::Clock;
use studio_credits_core::reducer::{Reduced, Reducer};

/// Everything the engine owns
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsState {
    /// Append-only credit ledger
    pub ledger: CreditLedger,
    /// Cached balances derived from the ledger
    pub balances: BalanceCache,
    /// Class instances and user profiles
    pub catalog: ClassCatalog,
    /// Bookings
    pub bookings: BookingTable,
    /// Scheduled reminders
    pub reminders: ReminderLedger,
    /// Discounted classes starting soon
    pub discount_summary: DiscountSummary,
}

impl CreditsState {
    /// Creates an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Commands accepted by [`CreditsReducer`]
#[derive(Clone, Debug, PartialEq)]
pub enum CreditsAction {
    /// Add or replace a user's display profile
    RegisterUser {
        /// Profile to store
        profile: UserProfile,
    },
    /// Add or replace a class instance
    UpsertClassInstance {
        /// Instance data
        instance: ClassInstance,
    },
    /// Grant complimentary credits
    GiftCredits {
        /// Recipient
        user_id: UserId,
        /// Positive amount
        amount: Credits,
        /// Why they were granted
        description: Option<String>,
    },
    /// Record bought credits
    PurchaseCredits {
        /// Buyer
        user_id: UserId,
        /// Positive amount
        amount: Credits,
        /// Payment provider reference
        external_ref: Option<String>,
        /// When the credits become spendable (default: now)
        effective_at: Option<DateTime<Utc>>,
    },
    /// Recompute one user's cached balance from the ledger
    ReconcileUser {
        /// Account holder
        user_id: UserId,
        /// Knobs
        options: ReconcileOptions,
    },
    /// Read a balance, optionally repairing it from the ledger first
    GetBalance {
        /// Account holder
        user_id: UserId,
        /// Reconcile before reading
        reconcile: bool,
    },
    /// Reconcile every known user
    ReconcileAll {
        /// Knobs applied to each user
        options: ReconcileOptions,
    },
    /// Reserve a seat
    BookClass {
        /// Customer
        user_id: UserId,
        /// Class instance
        class_instance_id: ClassInstanceId,
        /// Free-form note
        description: Option<String>,
    },
    /// Cancel an active booking
    CancelBooking {
        /// Booking to cancel
        booking_id: BookingId,
        /// Acting party
        cancelled_by: Canceller,
        /// Stated reason
        reason: Option<String>,
    },
    /// Confirm a booking awaiting approval
    ApproveBooking {
        /// Booking to approve
        booking_id: BookingId,
        /// Acting business
        business_id: BusinessId,
    },
    /// Decline a booking awaiting approval (full refund)
    RejectBooking {
        /// Booking to reject
        booking_id: BookingId,
        /// Acting business
        business_id: BusinessId,
        /// Stated reason
        reason: Option<String>,
    },
    /// Confirm attendance
    CompleteBooking {
        /// Booking attended
        booking_id: BookingId,
        /// Acting business
        business_id: BusinessId,
    },
    /// Cancel a whole class, refunding every active booking in full
    CancelClassInstance {
        /// Class to cancel
        class_instance_id: ClassInstanceId,
        /// Acting business
        business_id: BusinessId,
        /// Stated reason
        reason: Option<String>,
    },
    /// Arm a reminder for a booking
    ScheduleClassReminder {
        /// Booking the reminder is about
        booking_id: BookingId,
        /// Recipient
        user_id: UserId,
        /// Start of the class
        class_start: DateTime<Utc>,
        /// Reminder kind
        kind: ReminderKind,
    },
    /// Withdraw pending reminders of a booking
    CancelRemindersForBooking {
        /// Booking
        booking_id: BookingId,
    },
    /// Withdraw pending reminders of every booking on a class
    CancelRemindersForClass {
        /// Class instance
        class_instance_id: ClassInstanceId,
    },
    /// Fire reminders whose time has come
    DispatchDueReminders,
    /// Move pending bookings of long-started classes to `no_show`
    MarkNoShows,
    /// Move long-ended classes to `completed`
    MarkClassesCompleted,
    /// Replace the discounted-classes summary
    RebuildDiscountSummary,
}

impl CreditsAction {
    /// Stable label for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegisterUser { .. } => "register_user",
            Self::UpsertClassInstance { .. } => "upsert_class_instance",
            Self::GiftCredits { .. } => "gift_credits",
            Self::PurchaseCredits { .. } => "purchase_credits",
            Self::ReconcileUser { .. } => "reconcile_user",
            Self::GetBalance { .. } => "get_balance",
            Self::ReconcileAll { .. } => "reconcile_all",
            Self::BookClass { .. } => "book_class",
            Self::CancelBooking { .. } => "cancel_booking",
            Self::ApproveBooking { .. } => "approve_booking",
            Self::RejectBooking { .. } => "reject_booking",
            Self::CompleteBooking { .. } => "complete_booking",
            Self::CancelClassInstance { .. } => "cancel_class_instance",
            Self::ScheduleClassReminder { .. } => "schedule_class_reminder",
            Self::CancelRemindersForBooking { .. } => "cancel_reminders_for_booking",
            Self::CancelRemindersForClass { .. } => "cancel_reminders_for_class",
            Self::DispatchDueReminders => "dispatch_due_reminders",
            Self::MarkNoShows => "mark_no_shows",
            Self::MarkClassesCompleted => "mark_classes_completed",
            Self::RebuildDiscountSummary => "rebuild_discount_summary",
        }
    }
}

/// Result of a successful `BookClass`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReceipt {
    /// New (or existing) booking
    pub booking_id: BookingId,
    /// Ledger debit (the original one for a duplicate); `None` for free bookings
    pub transaction_id: Option<TransactionId>,
    /// Status the booking is in
    pub status: BookingStatus,
    /// Price charged
    pub final_price: Money,
    /// Credits charged
    pub credits_used: Credits,
    /// Discount applied
    pub applied_discount: Option<AppliedDiscount>,
    /// An active booking already existed; nothing was charged
    pub duplicate: bool,
}

/// Result of a cancellation or rejection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReceipt {
    /// Booking closed
    pub booking_id: BookingId,
    /// Status it landed in
    pub status: BookingStatus,
    /// Timing tier; `None` when the refund was unconditional
    pub tier: Option<RefundTier>,
    /// Refund in cents
    pub refund_amount: Money,
    /// Refund in credits
    pub refund_credits: Credits,
    /// Ledger credit, absent when nothing was refunded
    pub refund_transaction_id: Option<TransactionId>,
}

/// Result of cancelling a whole class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCancellationReceipt {
    /// Class cancelled
    pub class_instance_id: ClassInstanceId,
    /// Bookings moved to `cancelled_by_business`
    pub cancelled_bookings: Vec<BookingId>,
    /// Credits returned across all of them
    pub credits_refunded: Credits,
}

/// Value handed back by [`CreditsReducer`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreditsOutput {
    /// Accepted, nothing to report
    Done,
    /// Ledger transaction appended
    Transaction(TransactionId),
    /// One user reconciled
    Reconciled(ReconcileReport),
    /// Every user reconciled
    ReconciledAll(Vec<ReconcileReport>),
    /// Balance as of this command
    Balance(UserBalance),
    /// Seat reserved
    Booked(BookingReceipt),
    /// Booking cancelled or rejected
    Cancelled(CancellationReceipt),
    /// Class cancelled
    ClassCancelled(ClassCancellationReceipt),
    /// Reminder armed (or too late to arm)
    ReminderScheduled(Option<NotificationId>),
    /// Reminders withdrawn
    RemindersCancelled(usize),
    /// Batch sweep finished
    Swept(SweepReport),
}

/// Injected dependencies
#[derive(Clone)]
pub struct CreditsEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Outbound notification channel
    pub notifier: Arc<dyn Notifier>,
    /// Business rules
    pub policy: BookingPolicy,
    /// Notification retry policy
    pub delivery: DeliveryPolicy,
}

impl CreditsEnvironment {
    /// Environment with default policies
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            clock,
            notifier,
            policy: BookingPolicy::default(),
            delivery: DeliveryPolicy::default(),
        }
    }

    /// Replaces the business rules
    #[must_use]
    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the notification retry policy
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    /// Current time
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Detached delivery of one event
    #[must_use]
    pub fn notify(&self, event: NotificationEvent) -> Effect<CreditsAction> {
        let notifier = Arc::clone(&self.notifier);
        let delivery = self.delivery;
        Effect::Future(Box::pin(async move {
            let result = notify::deliver(notifier.as_ref(), &event, &delivery).await;
            crate::metrics::NotificationMetrics::record(event.name(), result.is_ok());
            if let Err(error) = result {
                tracing::warn!(event = event.name(), %error, "Notification dropped");
            }
            None
        }))
    }

    /// Class reminder for a booking, per the configured lead time
    #[must_use]
    pub const fn reminder_kind(&self) -> ReminderKind {
        ReminderKind::class_reminder(self.policy.reminder_lead_hours)
    }
}

impl std::fmt::Debug for CreditsEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditsEnvironment")
            .field("policy", &self.policy)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// Reducer for every engine command
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditsReducer;

impl CreditsReducer {
    /// Creates the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

type Reduction = Result<Reduced<CreditsOutput, CreditsAction>>;

impl Reducer for CreditsReducer {
    type State = CreditsState;
    type Action = CreditsAction;
    type Environment = CreditsEnvironment;
    type Output = CreditsOutput;
    type Error = CreditsError;

    fn reduce(&self, state: &mut CreditsState, action: CreditsAction, env: &CreditsEnvironment) -> Reduction {
        let name = action.name();
        let result = match action {
            CreditsAction::RegisterUser { profile } => {
                state.catalog.register_user(profile);
                Ok(Reduced::new(CreditsOutput::Done))
            },
            CreditsAction::UpsertClassInstance { instance } => upsert_class_instance(state, instance),
            CreditsAction::GiftCredits {
                user_id,
                amount,
                description,
            } => {
                let linkage = Linkage {
                    description,
                    ..Linkage::default()
                };
                grant(state, env, NewTransaction::new(user_id, amount, TransactionType::Gift).with_linkage(linkage))
            },
            CreditsAction::PurchaseCredits {
                user_id,
                amount,
                external_ref,
                effective_at,
            } => {
                let linkage = Linkage {
                    external_ref,
                    ..Linkage::default()
                };
                let mut tx = NewTransaction::new(user_id, amount, TransactionType::Purchase).with_linkage(linkage);
                tx.effective_at = effective_at;
                grant(state, env, tx)
            },
            CreditsAction::ReconcileUser { user_id, options } => {
                let report = state
                    .balances
                    .reconcile(&state.ledger, user_id, env.now(), options);
                Ok(Reduced::new(CreditsOutput::Reconciled(report)))
            },
            CreditsAction::GetBalance { user_id, reconcile } => {
                let now = env.now();
                if reconcile {
                    state
                        .balances
                        .reconcile(&state.ledger, user_id, now, ReconcileOptions::default());
                }
                let balance = state
                    .balances
                    .get(&user_id)
                    .cloned()
                    .unwrap_or_else(|| UserBalance::empty(user_id, now));
                Ok(Reduced::new(CreditsOutput::Balance(balance)))
            },
            CreditsAction::ReconcileAll { options } => Ok(Reduced::new(CreditsOutput::ReconciledAll(
                reconcile_all(state, env, options),
            ))),
            CreditsAction::BookClass {
                user_id,
                class_instance_id,
                description,
            } => lifecycle::book_class(state, env, user_id, class_instance_id, description),
            CreditsAction::CancelBooking {
                booking_id,
                cancelled_by,
                reason,
            } => lifecycle::cancel_booking(state, env, booking_id, cancelled_by, reason),
            CreditsAction::ApproveBooking {
                booking_id,
                business_id,
            } => lifecycle::approve_booking(state, env, booking_id, business_id),
            CreditsAction::RejectBooking {
                booking_id,
                business_id,
                reason,
            } => lifecycle::reject_booking(state, env, booking_id, business_id, reason),
            CreditsAction::CompleteBooking {
                booking_id,
                business_id,
            } => lifecycle::complete_booking(state, env, booking_id, business_id),
            CreditsAction::CancelClassInstance {
                class_instance_id,
                business_id,
                reason,
            } => lifecycle::cancel_class_instance(state, env, class_instance_id, business_id, reason),
            CreditsAction::ScheduleClassReminder {
                booking_id,
                user_id,
                class_start,
                kind,
            } => {
                // A cancellation may have committed between the booking change
                // and this follow-up; only a pending booking gets a reminder.
                let armable = state
                    .bookings
                    .live(&booking_id)
                    .is_some_and(|b| b.status == BookingStatus::Pending);
                let id = if armable {
                    state
                        .reminders
                        .schedule(booking_id, user_id, class_start, kind, env.now())
                } else {
                    tracing::debug!(booking_id = %booking_id, "Reminder not armed for inactive booking");
                    None
                };
                Ok(Reduced::new(CreditsOutput::ReminderScheduled(id)))
            },
            CreditsAction::CancelRemindersForBooking { booking_id } => {
                let cancelled = state
                    .reminders
                    .cancel_for(RelatedEntity::Booking(booking_id), env.now());
                Ok(Reduced::new(CreditsOutput::RemindersCancelled(cancelled)))
            },
            CreditsAction::CancelRemindersForClass { class_instance_id } => {
                let now = env.now();
                let bookings: Vec<BookingId> = state
                    .bookings
                    .for_instance(&class_instance_id)
                    .map(|b| b.id)
                    .collect();
                let cancelled: usize = bookings
                    .into_iter()
                    .map(|id| state.reminders.cancel_for(RelatedEntity::Booking(id), now))
                    .sum();
                Ok(Reduced::new(CreditsOutput::RemindersCancelled(cancelled)))
            },
            CreditsAction::DispatchDueReminders => Ok(sweeps::dispatch_due_reminders(state, env)),
            CreditsAction::MarkNoShows => Ok(sweeps::mark_no_shows(state, env)),
            CreditsAction::MarkClassesCompleted => Ok(sweeps::mark_classes_completed(state, env)),
            CreditsAction::RebuildDiscountSummary => Ok(sweeps::rebuild_discount_summary(state, env)),
        };

        if let Err(error) = &result {
            tracing::debug!(action = name, %error, "Command rejected");
            crate::metrics::BookingMetrics::record_rejected(error.kind());
        }
        result
    }
}

fn upsert_class_instance(state: &mut CreditsState, instance: ClassInstance) -> Reduction {
    for rule in instance
        .discount_rules
        .iter()
        .chain(&instance.template_discount_rules)
    {
        rule.validate()?;
    }
    tracing::debug!(class_instance_id = %instance.id, "Class instance upserted");
    state.catalog.upsert(instance);
    Ok(Reduced::new(CreditsOutput::Done))
}

fn grant(state: &mut CreditsState, env: &CreditsEnvironment, tx: NewTransaction) -> Reduction {
    let (user_id, amount, kind) = (tx.user_id, tx.amount, tx.kind);
    let id = ledger::post(&mut state.ledger, &mut state.balances, tx, env.now())?;
    tracing::info!(user_id = %user_id, credits = amount, kind = kind.as_str(), "Credits granted");
    Ok(Reduced::new(CreditsOutput::Transaction(id)))
}

fn reconcile_all(state: &mut CreditsState, env: &CreditsEnvironment, options: ReconcileOptions) -> Vec<ReconcileReport> {
    let now = env.now();
    let users: BTreeSet<UserId> = state
        .ledger
        .users()
        .chain(state.balances.users())
        .copied()
        .collect();

    let reports: Vec<ReconcileReport> = users
        .into_iter()
        .map(|user_id| state.balances.reconcile(&state.ledger, user_id, now, options))
        .collect();

    let drifted = reports.iter().filter(|r| r.was_updated).count();
    tracing::info!(users = reports.len(), drifted, "Reconciled all balances");
    reports
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use studio_credits_testing::{assertions, test_clock, test_epoch, FixedClock, ReducerTest};

    fn env() -> CreditsEnvironment {
        CreditsEnvironment::new(Arc::new(test_clock()), Arc::new(RecordingNotifier::new()))
    }

    #[test]
    fn gift_appends_and_updates_cache() {
        let user = UserId::new();
        ReducerTest::new(CreditsReducer::new())
            .with_env(env())
            .given_state(CreditsState::new())
            .when_action(CreditsAction::GiftCredits {
                user_id: user,
                amount: 50,
                description: Some("welcome".to_string()),
            })
            .then_output(|output| assert!(matches!(output, CreditsOutput::Transaction(_))))
            .then_state(move |state| {
                assert_eq!(state.ledger.len(), 1);
                assert_eq!(state.balances.available(&user), 50);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn non_positive_gift_is_rejected_without_changes() {
        ReducerTest::new(CreditsReducer::new())
            .with_env(env())
            .given_state(CreditsState::new())
            .when_action(CreditsAction::GiftCredits {
                user_id: UserId::new(),
                amount: -5,
                description: None,
            })
            .then_error(|error| assert_eq!(*error, CreditsError::InvalidAmount { amount: -5 }))
            .run();
    }

    #[test]
    fn reconcile_all_covers_every_ledger_user() {
        let mut state = CreditsState::new();
        let reducer = CreditsReducer::new();
        let env = env();
        for amount in [10, 20, 30] {
            reducer
                .reduce(
                    &mut state,
                    CreditsAction::GiftCredits {
                        user_id: UserId::new(),
                        amount,
                        description: None,
                    },
                    &env,
                )
                .unwrap();
        }

        let reduced = reducer
            .reduce(
                &mut state,
                CreditsAction::ReconcileAll {
                    options: ReconcileOptions::default(),
                },
                &env,
            )
            .unwrap();
        let CreditsOutput::ReconciledAll(reports) = reduced.output else {
            unreachable!("reconcile_all returns ReconciledAll");
        };
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| !r.was_updated));
    }

    #[test]
    fn balance_read_repairs_and_returns_in_one_command() {
        let user = UserId::new();
        let mut state = CreditsState::new();
        let reducer = CreditsReducer::new();
        for action in [
            CreditsAction::GiftCredits {
                user_id: user,
                amount: 10,
                description: None,
            },
            CreditsAction::PurchaseCredits {
                user_id: user,
                amount: 40,
                external_ref: None,
                effective_at: Some(test_epoch() + chrono::Duration::hours(1)),
            },
        ] {
            reducer.reduce(&mut state, action, &env()).unwrap();
        }
        let later = test_epoch() + chrono::Duration::hours(2);
        let later_env =
            || CreditsEnvironment::new(Arc::new(FixedClock::new(later)), Arc::new(RecordingNotifier::new()));

        // The purchase matured after it was appended; only a repair sees it.
        ReducerTest::new(CreditsReducer::new())
            .with_env(later_env())
            .given_state(state.clone())
            .when_action(CreditsAction::GetBalance {
                user_id: user,
                reconcile: false,
            })
            .then_output(|output| {
                let CreditsOutput::Balance(balance) = output else {
                    unreachable!("get_balance returns Balance");
                };
                assert_eq!(balance.available_credits, 10);
            })
            .run();

        ReducerTest::new(CreditsReducer::new())
            .with_env(later_env())
            .given_state(state)
            .when_action(CreditsAction::GetBalance {
                user_id: user,
                reconcile: true,
            })
            .then_output(move |output| {
                let CreditsOutput::Balance(balance) = output else {
                    unreachable!("get_balance returns Balance");
                };
                assert_eq!(balance.available_credits, 50);
                assert_eq!(balance.lifetime_credits, 50);
                assert_eq!(balance.last_updated, later);
            })
            .then_state(move |state| {
                assert_eq!(state.balances.available(&user), 50);
                assert_eq!(state.balances.drifts(&user).len(), 1);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn balance_of_unknown_user_is_empty() {
        let user = UserId::new();
        ReducerTest::new(CreditsReducer::new())
            .with_env(env())
            .given_state(CreditsState::new())
            .when_action(CreditsAction::GetBalance {
                user_id: user,
                reconcile: true,
            })
            .then_output(move |output| {
                assert_eq!(*output, CreditsOutput::Balance(UserBalance::empty(user, test_epoch())));
            })
            .then_state(move |state| assert!(state.balances.get(&user).is_none()))
            .run();
    }
}
