//! Background sweeps and the job runner.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::{ClassSpec, Fixture};
use studio_credits::catalog::ClassStatus;
use studio_credits::config::JobSchedule;
use studio_credits::discount::{
    DiscountCondition, DiscountRule, DiscountSource, DiscountValue, RuleScope,
};
use studio_credits::jobs::spawn_background_jobs;
use studio_credits::notify::NotificationEvent;
use studio_credits::reminders::{NotificationStatus, ReminderKind};
use studio_credits::sweeps::SweepReport;
use studio_credits::{BookingStatus, Canceller, Money, UserId};

#[tokio::test]
async fn no_show_sweep_frees_the_seat_and_keeps_the_credits() {
    let fx = Fixture::new();
    let user = fx.customer(100).await;
    let class = fx
        .class(ClassSpec {
            starts_in: Duration::hours(1),
            ..ClassSpec::default()
        })
        .await;
    let receipt = fx.engine.book_class(user, class, None).await.unwrap();

    // Two hours after the start, still inside the grace period.
    fx.clock.advance(Duration::hours(3));
    assert_eq!(fx.engine.mark_no_shows().await.unwrap(), SweepReport::default());

    fx.clock.advance(Duration::hours(2));
    let report = fx.engine.mark_no_shows().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            examined: 1,
            processed: 1,
            failed: 0,
        }
    );

    let booking = fx.engine.booking(receipt.booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::NoShow);
    assert_eq!(booking.no_show_at, Some(fx.now()));
    assert_eq!(booking.refund_credits, Some(0));
    assert_eq!(fx.engine.class_instance(class).await.unwrap().booked_count, 0);
    assert_eq!(fx.engine.get_balance(user, true).await.unwrap().available_credits, 60);

    let again = fx.engine.mark_no_shows().await.unwrap();
    assert_eq!(again.examined, 0);
}

#[tokio::test]
async fn no_show_sweep_ignores_cancelled_bookings() {
    let fx = Fixture::new();
    let user = fx.customer(100).await;
    let class = fx
        .class(ClassSpec {
            starts_in: Duration::hours(1),
            ..ClassSpec::default()
        })
        .await;
    let receipt = fx.engine.book_class(user, class, None).await.unwrap();
    fx.engine
        .cancel_booking(receipt.booking_id, Canceller::Consumer(user), None)
        .await
        .unwrap();

    fx.clock.advance(Duration::hours(6));
    assert_eq!(fx.engine.mark_no_shows().await.unwrap().examined, 0);
    let booking = fx.engine.booking(receipt.booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::CancelledByConsumer);
}

#[tokio::test]
async fn unapproved_booking_is_rejected_with_full_refund_after_start() {
    let fx = Fixture::new();
    let user = fx.customer(100).await;
    let class = fx
        .class(ClassSpec {
            starts_in: Duration::hours(1),
            requires_confirmation: true,
            ..ClassSpec::default()
        })
        .await;
    let receipt = fx.engine.book_class(user, class, None).await.unwrap();
    assert_eq!(receipt.status, BookingStatus::AwaitingApproval);

    fx.clock.advance(Duration::hours(3));
    assert_eq!(fx.engine.mark_no_shows().await.unwrap(), SweepReport::default());

    fx.clock.advance(Duration::hours(2));
    let report = fx.engine.mark_no_shows().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            examined: 1,
            processed: 1,
            failed: 0,
        }
    );

    let booking = fx.engine.booking(receipt.booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::RejectedByBusiness);
    assert_eq!(booking.rejected_at, Some(fx.now()));
    assert_eq!(booking.refund_credits, Some(40));
    assert!(booking.rejection_reason.is_some());
    assert_eq!(fx.engine.class_instance(class).await.unwrap().booked_count, 0);
    assert_eq!(fx.engine.get_balance(user, true).await.unwrap().available_credits, 100);

    fx.engine.settle().await;
    assert!(fx.notifier.names().contains(&"booking_rejected"));
    assert_eq!(fx.engine.mark_no_shows().await.unwrap().examined, 0);
}

#[tokio::test]
async fn completion_sweep_waits_for_the_grace_period() {
    let fx = Fixture::new();
    let soon = fx
        .class(ClassSpec {
            starts_in: Duration::hours(1),
            ..ClassSpec::default()
        })
        .await;
    let later = fx.class(ClassSpec::default()).await;

    // Ends at +2h; grace is 2h.
    fx.clock.advance(Duration::hours(3));
    assert_eq!(fx.engine.mark_classes_completed().await.unwrap().processed, 0);

    fx.clock.advance(Duration::hours(2));
    assert_eq!(fx.engine.mark_classes_completed().await.unwrap().processed, 1);

    let done = fx.engine.class_instance(soon).await.unwrap();
    assert_eq!(done.status, ClassStatus::Completed);
    assert_eq!(done.completed_at, Some(fx.now()));
    let pending = fx.engine.class_instance(later).await.unwrap();
    assert_eq!(pending.status, ClassStatus::Scheduled);
}

#[tokio::test]
async fn summary_lists_discounted_classes_inside_the_horizon() {
    let fx = Fixture::new();
    let rule = |percent| {
        DiscountRule::new(
            "Early bird",
            RuleScope::Template,
            DiscountCondition::Always,
            DiscountValue::Percentage { percent },
            UserId::new(),
            fx.now(),
        )
    };
    let discounted = fx
        .class(ClassSpec {
            starts_in: Duration::hours(12),
            template_rules: vec![rule(20)],
            ..ClassSpec::default()
        })
        .await;
    fx.class(ClassSpec {
        starts_in: Duration::hours(12),
        ..ClassSpec::default()
    })
    .await;
    fx.class(ClassSpec {
        starts_in: Duration::hours(72),
        template_rules: vec![rule(50)],
        ..ClassSpec::default()
    })
    .await;

    let report = fx.engine.rebuild_discount_summary().await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.processed, 1);

    let summary = fx.engine.discount_summary().await;
    assert_eq!(summary.len(), 1);
    let entry = &summary.entries[0];
    assert_eq!(entry.class_instance_id, discounted);
    assert_eq!(entry.final_price, Money::from_cents(1600));
    assert_eq!(entry.discount_amount, Money::from_cents(400));
    assert_eq!(entry.discount_percentage, 20);
    assert_eq!(entry.source, DiscountSource::TemplateRule);

    // Rebuild replaces rather than appends.
    fx.clock.advance(Duration::hours(13));
    fx.engine.rebuild_discount_summary().await.unwrap();
    assert!(fx.engine.discount_summary().await.is_empty());
}

#[tokio::test]
async fn due_reminder_is_sent_once() {
    let fx = Fixture::new();
    let user = fx.customer(100).await;
    let class = fx
        .class(ClassSpec {
            starts_in: Duration::hours(3),
            ..ClassSpec::default()
        })
        .await;
    let receipt = fx.engine.book_class(user, class, None).await.unwrap();

    assert_eq!(fx.engine.dispatch_due_reminders().await.unwrap().examined, 0);

    fx.clock.advance(Duration::hours(2));
    let report = fx.engine.dispatch_due_reminders().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(fx.engine.dispatch_due_reminders().await.unwrap().examined, 0);

    fx.engine.settle().await;
    let reminders: Vec<_> = fx
        .notifier
        .events()
        .into_iter()
        .filter(|e| matches!(e, NotificationEvent::ClassReminder { .. }))
        .collect();
    assert_eq!(reminders.len(), 1);

    let records = fx.engine.reminders_for_booking(receipt.booking_id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, NotificationStatus::Sent);
    assert_eq!(records[0].updated_at, fx.now());
}

#[tokio::test]
async fn scheduling_a_reminder_twice_keeps_one() {
    let fx = Fixture::new();
    let user = fx.customer(100).await;
    let class = fx.class(ClassSpec::default()).await;
    let receipt = fx.engine.book_class(user, class, None).await.unwrap();
    let start = fx.engine.booking(receipt.booking_id).await.unwrap().class_start();

    let first = fx.engine.reminders_for_booking(receipt.booking_id).await[0].id;
    let again = fx
        .engine
        .schedule_class_reminder(receipt.booking_id, user, start, ReminderKind::class_reminder(1))
        .await
        .unwrap();
    assert_eq!(again, Some(first));
    assert_eq!(fx.engine.reminders_for_booking(receipt.booking_id).await.len(), 1);

    let too_late = fx
        .engine
        .schedule_class_reminder(receipt.booking_id, user, start, ReminderKind::class_reminder(72))
        .await
        .unwrap();
    assert_eq!(too_late, None);

    assert_eq!(fx.engine.cancel_reminders_for_class(class).await.unwrap(), 1);
    assert_eq!(fx.engine.cancel_reminders_for_booking(receipt.booking_id).await.unwrap(), 0);
}

#[tokio::test]
async fn reminder_is_not_rearmed_after_cancellation() {
    let fx = Fixture::new();
    let user = fx.customer(100).await;
    let class = fx.class(ClassSpec::default()).await;
    let receipt = fx.engine.book_class(user, class, None).await.unwrap();
    let start = fx.engine.booking(receipt.booking_id).await.unwrap().class_start();
    fx.engine
        .cancel_booking(receipt.booking_id, Canceller::Consumer(user), None)
        .await
        .unwrap();

    // A follow-up that lost the race with the cancellation.
    let late = fx
        .engine
        .schedule_class_reminder(receipt.booking_id, user, start, ReminderKind::class_reminder(1))
        .await
        .unwrap();
    assert_eq!(late, None);
    assert!(fx
        .engine
        .reminders_for_booking(receipt.booking_id)
        .await
        .iter()
        .all(|r| r.status != NotificationStatus::Pending));

    fx.clock.advance(Duration::hours(47));
    assert_eq!(fx.engine.dispatch_due_reminders().await.unwrap().examined, 0);
}

#[tokio::test]
async fn job_runner_sweeps_until_stopped() {
    let fx = Fixture::new();
    let user = fx.customer(100).await;
    let class = fx
        .class(ClassSpec {
            starts_in: Duration::hours(1),
            ..ClassSpec::default()
        })
        .await;
    let receipt = fx.engine.book_class(user, class, None).await.unwrap();
    fx.clock.advance(Duration::hours(6));

    let every = std::time::Duration::from_millis(10);
    let jobs = spawn_background_jobs(
        &fx.engine,
        &JobSchedule {
            no_show_interval: every,
            completion_interval: every,
            discount_summary_interval: every,
            reminder_dispatch_interval: every,
        },
    );
    assert_eq!(jobs.len(), 4);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    jobs.stop().await;

    let booking = fx.engine.booking(receipt.booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::NoShow);
    let instance = fx.engine.class_instance(class).await.unwrap();
    assert_eq!(instance.status, ClassStatus::Completed);
    assert!(fx.engine.discount_summary().await.rebuilt_at.is_some());
}
