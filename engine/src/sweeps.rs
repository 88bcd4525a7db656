//! Batch sweeps driven by the background job runner.
//!
//! Each sweep selects its slice through a status + time index, handles items
//! one by one, and logs and counts a bad item instead of aborting the batch.
//! Re-running a sweep at the same instant changes nothing further.

use crate::booking::BookingStatus;
use crate::catalog::ClassStatus;
use crate::lifecycle;
use crate::metrics::{BookingMetrics, SweepMetrics};
use crate::notify::{BookingNotice, NotificationEvent};
use crate::reducer::{CreditsAction, CreditsEnvironment, CreditsOutput, CreditsState};
use crate::reminders::{NotificationStatus, RelatedEntity};
use crate::summary;
use crate::types::Money;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use studio_credits_core::effect::Effect;
use studio_credits_core::reducer::Reduced;

/// Outcome of one sweep run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Items the index selected
    pub examined: usize,
    /// Items transitioned
    pub processed: usize,
    /// Items skipped after an error
    pub failed: usize,
}

type Swept = Reduced<CreditsOutput, CreditsAction>;

fn finish(job: &'static str, report: SweepReport) -> Swept {
    SweepMetrics::record(job, &report);
    if report.examined > 0 {
        tracing::info!(
            job,
            examined = report.examined,
            processed = report.processed,
            failed = report.failed,
            "Sweep finished"
        );
    }
    Reduced::new(CreditsOutput::Swept(report))
}

/// Reason recorded on bookings the business never got to
const STALE_APPROVAL_REASON: &str = "Not approved before the class started";

/// `pending` bookings whose class started more than the grace period ago
/// become `no_show`. Nothing is refunded.
///
/// `awaiting_approval` bookings past the same cutoff are rejected with a full
/// refund, since no approval can still make them attendable.
pub(crate) fn mark_no_shows(state: &mut CreditsState, env: &CreditsEnvironment) -> Swept {
    let now = env.now();
    let cutoff = now - Duration::hours(i64::from(env.policy.no_show_grace_hours));
    let candidates = state.bookings.starting_before(BookingStatus::Pending, cutoff);

    let mut report = SweepReport {
        examined: candidates.len(),
        ..SweepReport::default()
    };
    let mut effects = Vec::new();

    for booking_id in candidates {
        let Some(class_instance_id) = state.bookings.get(&booking_id).map(|b| b.class_instance_id)
        else {
            tracing::warn!(booking_id = %booking_id, "No-show candidate vanished");
            report.failed += 1;
            continue;
        };
        if state.catalog.get(&class_instance_id).is_none() {
            tracing::warn!(
                booking_id = %booking_id,
                class_instance_id = %class_instance_id,
                "No-show candidate references an unknown class"
            );
            report.failed += 1;
            continue;
        }

        state.bookings.update(&booking_id, |b| {
            b.status = BookingStatus::NoShow;
            b.no_show_at = Some(now);
            b.updated_at = now;
            b.refund_amount = Some(Money::ZERO);
            b.refund_credits = Some(0);
        });
        state.catalog.release_seat(&class_instance_id);
        BookingMetrics::record_closed(BookingStatus::NoShow.as_str());
        tracing::debug!(booking_id = %booking_id, "Booking marked no-show");

        effects.push(Effect::dispatch(CreditsAction::CancelRemindersForBooking { booking_id }));
        report.processed += 1;
    }

    let stale = state.bookings.starting_before(BookingStatus::AwaitingApproval, cutoff);
    report.examined += stale.len();
    for booking_id in stale {
        let reason = Some(STALE_APPROVAL_REASON.to_string());
        match lifecycle::reject_unapproved(state, env, booking_id, reason) {
            Ok(reduced) => {
                effects.extend(reduced.effects);
                report.processed += 1;
            },
            Err(error) => {
                tracing::warn!(booking_id = %booking_id, %error, "Stale approval not rejected");
                report.failed += 1;
            },
        }
    }

    finish("mark_no_shows", report).with_effects(effects)
}

/// `scheduled` classes that ended more than the grace period ago become
/// `completed`.
pub(crate) fn mark_classes_completed(state: &mut CreditsState, env: &CreditsEnvironment) -> Swept {
    let now = env.now();
    let cutoff = now - Duration::hours(i64::from(env.policy.completion_grace_hours));
    let candidates = state.catalog.ending_before(ClassStatus::Scheduled, cutoff);

    let mut report = SweepReport {
        examined: candidates.len(),
        ..SweepReport::default()
    };
    for class_instance_id in candidates {
        let updated = state.catalog.update(&class_instance_id, |instance| {
            instance.status = ClassStatus::Completed;
            instance.completed_at = Some(now);
        });
        if updated {
            report.processed += 1;
        } else {
            tracing::warn!(class_instance_id = %class_instance_id, "Completion candidate vanished");
            report.failed += 1;
        }
    }

    finish("mark_classes_completed", report)
}

/// Fires reminders whose time has come.
///
/// A reminder whose booking is no longer `pending` is marked `failed`.
pub(crate) fn dispatch_due_reminders(state: &mut CreditsState, env: &CreditsEnvironment) -> Swept {
    let now = env.now();
    let due = state.reminders.due(now);

    let mut report = SweepReport {
        examined: due.len(),
        ..SweepReport::default()
    };
    let mut effects = Vec::new();

    for id in due {
        let Some((related, kind)) = state.reminders.get(&id).map(|r| (r.related, r.kind)) else {
            report.failed += 1;
            continue;
        };
        let RelatedEntity::Booking(booking_id) = related;
        let notice = state
            .bookings
            .live(&booking_id)
            .filter(|b| b.status == BookingStatus::Pending)
            .map(BookingNotice::from);

        match notice {
            Some(notice) => {
                state.reminders.settle(&id, NotificationStatus::Sent, now);
                effects.push(env.notify(NotificationEvent::ClassReminder { notice, kind }));
                report.processed += 1;
            },
            None => {
                tracing::warn!(
                    notification_id = %id,
                    booking_id = %booking_id,
                    "Reminder target is no longer active"
                );
                state.reminders.settle(&id, NotificationStatus::Failed, now);
                report.failed += 1;
            },
        }
    }

    finish("dispatch_due_reminders", report).with_effects(effects)
}

/// Clears and fully replaces the discounted-classes summary.
pub(crate) fn rebuild_discount_summary(state: &mut CreditsState, env: &CreditsEnvironment) -> Swept {
    let now = env.now();
    let horizon = now + Duration::hours(i64::from(env.policy.discount_summary_horizon_hours));
    let (rebuilt, report) = summary::build(&state.catalog, now, horizon);

    SweepMetrics::record_summary_size(rebuilt.entries.len());
    state.discount_summary = rebuilt;
    finish("rebuild_discount_summary", report)
}
