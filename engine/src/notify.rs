//! Outbound notifications.
//!
//! Events are emitted as post-commit effects and carry every field the
//! receiving email/push subsystem needs to render them. Delivery failures
//! are retried with exponential backoff, then logged and counted. They
//! never reach the transactional core.

use crate::booking::{Booking, BookingStatus, Canceller};
use crate::config::DeliveryPolicy;
use crate::reminders::ReminderKind;
use crate::types::{BookingId, ClassInstanceId, Credits, Money, UserId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Booking fields a notification renders from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingNotice {
    /// Booking identifier
    pub booking_id: BookingId,
    /// Class instance booked
    pub class_instance_id: ClassInstanceId,
    /// Class name
    pub class_name: String,
    /// Venue name
    pub venue_name: String,
    /// Class start
    pub start_time: DateTime<Utc>,
    /// Customer
    pub customer_id: UserId,
    /// Customer display name
    pub customer_name: String,
    /// Customer email
    pub customer_email: String,
    /// Price charged
    pub amount: Money,
    /// Credits charged
    pub credits: Credits,
}

impl From<&Booking> for BookingNotice {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id,
            class_instance_id: booking.class_instance_id,
            class_name: booking.class_snapshot.name.clone(),
            venue_name: booking.venue_snapshot.name.clone(),
            start_time: booking.class_snapshot.start_time,
            customer_id: booking.user_id,
            customer_name: booking.user_snapshot.name.clone(),
            customer_email: booking.user_snapshot.email.clone(),
            amount: booking.final_price,
            credits: booking.credits_used,
        }
    }
}

/// Something happened that a person should hear about
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A booking was created
    BookingCreated {
        /// Booking details
        notice: BookingNotice,
        /// `pending` or `awaiting_approval`
        status: BookingStatus,
    },
    /// A booking was cancelled
    BookingCancelled {
        /// Booking details
        notice: BookingNotice,
        /// Who cancelled
        cancelled_by: Canceller,
        /// Refund in cents
        refund_amount: Money,
        /// Refund in credits
        refund_credits: Credits,
        /// Stated reason
        reason: Option<String>,
    },
    /// The business approved a booking
    BookingApproved {
        /// Booking details
        notice: BookingNotice,
    },
    /// The business rejected a booking
    BookingRejected {
        /// Booking details
        notice: BookingNotice,
        /// Stated reason
        reason: Option<String>,
    },
    /// The business cancelled a whole class
    ClassCancelled {
        /// Class instance cancelled
        class_instance_id: ClassInstanceId,
        /// Class name
        class_name: String,
        /// Venue name
        venue_name: String,
        /// Class start
        start_time: DateTime<Utc>,
        /// Every customer whose booking was cancelled
        affected: Vec<BookingNotice>,
        /// Stated reason
        reason: Option<String>,
    },
    /// A scheduled class reminder fired
    ClassReminder {
        /// Booking details
        notice: BookingNotice,
        /// Reminder kind
        kind: ReminderKind,
    },
}

impl NotificationEvent {
    /// Stable label for logs and metrics
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BookingCreated { .. } => "booking_created",
            Self::BookingCancelled { .. } => "booking_cancelled",
            Self::BookingApproved { .. } => "booking_approved",
            Self::BookingRejected { .. } => "booking_rejected",
            Self::ClassCancelled { .. } => "class_cancelled",
            Self::ClassReminder { .. } => "class_reminder",
        }
    }
}

/// Delivery failure reported by a [`Notifier`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Worth retrying (timeouts, rate limits, 5xx)
    #[error("Transient delivery failure: {0}")]
    Transient(String),
    /// Retrying will not help (bad address, 4xx)
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

impl NotifyError {
    /// Whether the delivery should be retried
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Outbound notification channel (email, push, webhook)
pub trait Notifier: Send + Sync {
    /// Deliver one event
    ///
    /// # Errors
    ///
    /// [`NotifyError`] when the channel refuses or fails.
    fn notify<'a>(&'a self, event: &'a NotificationEvent) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Delivers with bounded exponential backoff.
///
/// # Errors
///
/// The last error once retries are exhausted, or the first permanent error.
pub async fn deliver(
    notifier: &dyn Notifier,
    event: &NotificationEvent,
    policy: &DeliveryPolicy,
) -> Result<(), NotifyError> {
    let mut attempt = 0;

    loop {
        match notifier.notify(event).await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!(attempt, event = event.name(), "Notification delivered after retry");
                }
                return Ok(());
            },
            Err(err) => {
                if !err.is_transient() {
                    tracing::warn!(event = event.name(), error = %err, "Notification not retryable");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::warn!(
                        attempt,
                        event = event.name(),
                        error = %err,
                        "Notification failed after max retries"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Notification failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

/// Notifier that writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, event: &'a NotificationEvent) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            tracing::info!(event = event.name(), payload = ?event, "Notification");
            Ok(())
        })
    }
}

/// Notifier that keeps every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered so far
    #[must_use]
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of the events delivered so far
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(NotificationEvent::name).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, event: &'a NotificationEvent) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
            Ok(())
        })
    }
}

/// Notifier that fails transiently a fixed number of times, then records
#[derive(Debug, Clone)]
pub struct FlakyNotifier {
    failures_left: Arc<Mutex<u32>>,
    attempts: Arc<Mutex<u32>>,
    inner: RecordingNotifier,
}

impl FlakyNotifier {
    /// Fails the first `failures` attempts
    #[must_use]
    pub fn new(failures: u32) -> Self {
        Self {
            failures_left: Arc::new(Mutex::new(failures)),
            attempts: Arc::new(Mutex::new(0)),
            inner: RecordingNotifier::new(),
        }
    }

    /// Attempts made so far, failed or not
    #[must_use]
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Events that eventually went through
    #[must_use]
    pub fn delivered(&self) -> Vec<NotificationEvent> {
        self.inner.events()
    }
}

impl Notifier for FlakyNotifier {
    fn notify<'a>(&'a self, event: &'a NotificationEvent) -> BoxFuture<'a, Result<(), NotifyError>> {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let fail = {
            let mut left = self.failures_left.lock().unwrap_or_else(PoisonError::into_inner);
            if *left > 0 {
                *left -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            Box::pin(async { Err(NotifyError::Transient("channel unavailable".to_string())) })
        } else {
            self.inner.notify(event)
        }
    }
}
