//! Scheduled reminder sub-ledger.
//!
//! At most one `pending` reminder exists per (related entity, kind). Records
//! are never deleted; cancelling flips them to `cancelled`.

use crate::types::{BookingId, NotificationId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a scheduled notification is for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReminderKind {
    /// "Your class starts in N hours"
    ClassReminder {
        /// Lead time before class start
        hours_before: u32,
    },
}

impl ReminderKind {
    /// Class reminder `hours_before` the start
    #[must_use]
    pub const fn class_reminder(hours_before: u32) -> Self {
        Self::ClassReminder { hours_before }
    }

    /// How long before the target instant the reminder fires
    #[must_use]
    pub fn offset(self) -> Duration {
        match self {
            Self::ClassReminder { hours_before } => Duration::hours(i64::from(hours_before)),
        }
    }
}

impl std::fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClassReminder { hours_before } => write!(f, "class_reminder_{hours_before}h"),
        }
    }
}

/// Delivery state of a scheduled notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Waiting for its time
    Pending,
    /// Handed to the notifier
    Sent,
    /// Withdrawn before firing
    Cancelled,
    /// Could not be sent
    Failed,
}

/// Entity a notification is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "entity_id", rename_all = "snake_case")]
pub enum RelatedEntity {
    /// A booking
    Booking(BookingId),
}

/// A reminder waiting to fire (or its historical record)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    /// Notification identifier
    pub id: NotificationId,
    /// Reminder kind
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    /// When it should fire
    pub scheduled_for: DateTime<Utc>,
    /// Delivery state
    pub status: NotificationStatus,
    /// What it is about
    pub related: RelatedEntity,
    /// Who receives it
    pub recipient_user_id: UserId,
    /// Insert time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// All scheduled notifications with a pending-by-entity index
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Vec<ScheduledNotification>",
    into = "Vec<ScheduledNotification>"
)]
pub struct ReminderLedger {
    records: HashMap<NotificationId, ScheduledNotification>,
    pending: HashMap<(RelatedEntity, ReminderKind), NotificationId>,
}

impl From<Vec<ScheduledNotification>> for ReminderLedger {
    fn from(records: Vec<ScheduledNotification>) -> Self {
        let pending = records
            .iter()
            .filter(|r| r.status == NotificationStatus::Pending)
            .map(|r| ((r.related, r.kind), r.id))
            .collect();
        let records = records.into_iter().map(|r| (r.id, r)).collect();
        Self { records, pending }
    }
}

impl From<ReminderLedger> for Vec<ScheduledNotification> {
    fn from(ledger: ReminderLedger) -> Self {
        let mut records: Vec<_> = ledger.records.into_values().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }
}

impl ReminderLedger {
    /// Creates an empty sub-ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a class reminder for a booking.
    ///
    /// Returns `None` when the fire time is already past, and the existing
    /// id when a pending reminder of the same kind is already armed.
    pub fn schedule(
        &mut self,
        booking_id: BookingId,
        user_id: UserId,
        class_start: DateTime<Utc>,
        kind: ReminderKind,
        now: DateTime<Utc>,
    ) -> Option<NotificationId> {
        let related = RelatedEntity::Booking(booking_id);
        if let Some(existing) = self.pending.get(&(related, kind)) {
            return Some(*existing);
        }

        let scheduled_for = class_start - kind.offset();
        if scheduled_for <= now {
            return None;
        }

        let id = NotificationId::new();
        self.records.insert(
            id,
            ScheduledNotification {
                id,
                kind,
                scheduled_for,
                status: NotificationStatus::Pending,
                related,
                recipient_user_id: user_id,
                created_at: now,
                updated_at: now,
            },
        );
        self.pending.insert((related, kind), id);
        Some(id)
    }

    /// Cancels every pending reminder about `related`; returns how many
    pub fn cancel_for(&mut self, related: RelatedEntity, now: DateTime<Utc>) -> usize {
        let ids: Vec<NotificationId> = self
            .pending
            .iter()
            .filter(|((entity, _), _)| *entity == related)
            .map(|(_, id)| *id)
            .collect();
        for id in &ids {
            self.settle(id, NotificationStatus::Cancelled, now);
        }
        ids.len()
    }

    /// Pending reminders due at or before `now`, oldest first
    #[must_use]
    pub fn due(&self, now: DateTime<Utc>) -> Vec<NotificationId> {
        let mut due: Vec<&ScheduledNotification> = self
            .pending
            .values()
            .filter_map(|id| self.records.get(id))
            .filter(|r| r.scheduled_for <= now)
            .collect();
        due.sort_by_key(|r| (r.scheduled_for, r.id));
        due.into_iter().map(|r| r.id).collect()
    }

    /// Moves a pending reminder to a final status
    pub fn settle(&mut self, id: &NotificationId, status: NotificationStatus, now: DateTime<Utc>) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        if record.status != NotificationStatus::Pending {
            return false;
        }
        record.status = status;
        record.updated_at = now;
        self.pending.remove(&(record.related, record.kind));
        true
    }

    /// Looks up a record
    #[must_use]
    pub fn get(&self, id: &NotificationId) -> Option<&ScheduledNotification> {
        self.records.get(id)
    }

    /// All records about `related`, oldest first
    #[must_use]
    pub fn for_entity(&self, related: RelatedEntity) -> Vec<&ScheduledNotification> {
        let mut found: Vec<_> = self
            .records
            .values()
            .filter(|r| r.related == related)
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        found
    }

    /// Number of pending reminders
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
