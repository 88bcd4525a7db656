//! Booking state machine transitions.
//!
//! Each function validates against the untouched state first, then applies.
//! The single fallible mutation (the ledger post) always comes first in the
//! apply phase, so a rejection never leaves a partial change behind.

use crate::booking::{
    AppliedDiscount, Booking, BookingStatus, Canceller, ClassSnapshot, UserSnapshot,
    VenueSnapshot,
};
use crate::catalog::ClassStatus;
use crate::error::{CreditsError, Result};
use crate::ledger::{self, Linkage, NewTransaction, TransactionType};
use crate::metrics::BookingMetrics;
use crate::notify::{BookingNotice, NotificationEvent};
use crate::pricing::{self, credits_for, RefundQuote};
use crate::reducer::{
    BookingReceipt, CancellationReceipt, ClassCancellationReceipt, CreditsAction,
    CreditsEnvironment, CreditsOutput, CreditsState,
};
use crate::types::{BookingId, BusinessId, ClassInstanceId, Credits, TransactionId, UserId};
use chrono::{DateTime, Utc};
use studio_credits_core::effect::Effect;
use studio_credits_core::reducer::Reduced;

type Reduction = Result<Reduced<CreditsOutput, CreditsAction>>;

fn live_booking(state: &CreditsState, booking_id: BookingId) -> Result<&Booking> {
    state
        .bookings
        .live(&booking_id)
        .ok_or_else(|| CreditsError::not_found("booking", booking_id))
}

fn ensure_business(booking: &Booking, business_id: BusinessId) -> Result<()> {
    if booking.business_id == business_id {
        Ok(())
    } else {
        Err(CreditsError::Unauthorized { entity: "booking" })
    }
}

fn booking_linkage(booking: &Booking) -> Linkage {
    Linkage {
        business_id: Some(booking.business_id),
        venue_id: Some(booking.venue_snapshot.venue_id),
        class_instance_id: Some(booking.class_instance_id),
        booking_id: Some(booking.id),
        ..Linkage::default()
    }
}

fn refund_transaction(booking: &Booking, credits: Credits) -> Option<NewTransaction> {
    (credits > 0).then(|| {
        NewTransaction::new(booking.user_id, credits, TransactionType::Refund)
            .with_linkage(booking_linkage(booking))
    })
}

fn post_refund(
    state: &mut CreditsState,
    refund: Option<NewTransaction>,
    now: DateTime<Utc>,
) -> Result<Option<TransactionId>> {
    let Some(tx) = refund else {
        return Ok(None);
    };
    let credits = tx.amount;
    let id = ledger::post(&mut state.ledger, &mut state.balances, tx, now)?;
    BookingMetrics::record_refund(credits);
    Ok(Some(id))
}

/// Reserves a seat, charging the discounted price in credits.
///
/// A second call for a user who already holds an active booking on the
/// instance returns that booking and charges nothing.
pub(crate) fn book_class(
    state: &mut CreditsState,
    env: &CreditsEnvironment,
    user_id: UserId,
    class_instance_id: ClassInstanceId,
    description: Option<String>,
) -> Reduction {
    let now = env.now();

    if let Some(existing) = state.bookings.active_for(&user_id, &class_instance_id) {
        tracing::debug!(booking_id = %existing.id, user_id = %user_id, "Booking already exists");
        return Ok(Reduced::new(CreditsOutput::Booked(BookingReceipt {
            booking_id: existing.id,
            transaction_id: existing.spend_transaction_id,
            status: existing.status,
            final_price: existing.final_price,
            credits_used: existing.credits_used,
            applied_discount: existing.applied_discount.clone(),
            duplicate: true,
        })));
    }

    // Validate
    let instance = state
        .catalog
        .live(&class_instance_id)
        .ok_or_else(|| CreditsError::not_found("class instance", class_instance_id))?;
    if instance.status != ClassStatus::Scheduled {
        return Err(CreditsError::ClassNotBookable {
            reason: format!("class is {}", instance.status),
        });
    }
    if instance.start_time <= now {
        return Err(CreditsError::ClassNotBookable {
            reason: "class has already started".to_string(),
        });
    }
    let profile = state
        .catalog
        .user(&user_id)
        .ok_or_else(|| CreditsError::not_found("user", user_id))?;
    if instance.booked_count >= instance.capacity {
        return Err(CreditsError::ClassFull {
            capacity: instance.capacity,
        });
    }
    let limit = env.policy.max_active_bookings;
    if state.bookings.active_count(&user_id) >= limit {
        return Err(CreditsError::MaxActiveBookingsExceeded { limit });
    }

    let (price, discount) = pricing::calculate_final_price_from_instance(instance, now)?;
    let rate = env.policy.credit_value_cents;
    let credits_used = credits_for(price.final_price, rate);
    let available = state.balances.available(&user_id);
    if available < credits_used {
        return Err(CreditsError::InsufficientCredits {
            required: credits_used,
            available,
        });
    }

    let status = if instance.requires_confirmation {
        BookingStatus::AwaitingApproval
    } else {
        BookingStatus::Pending
    };
    let applied_discount = discount
        .filter(|_| !price.discount_amount.is_zero())
        .map(|d| AppliedDiscount {
            source: d.source,
            rule_name: d.rule_name,
            amount_saved: price.discount_amount,
            credits_saved: credits_for(price.original_price, rate) - credits_used,
        });
    let mut booking = Booking {
        id: BookingId::new(),
        user_id,
        class_instance_id,
        business_id: instance.business_id,
        status,
        original_price: price.original_price,
        final_price: price.final_price,
        credits_used,
        applied_discount,
        class_snapshot: ClassSnapshot {
            name: instance.name.clone(),
            start_time: instance.start_time,
            end_time: instance.end_time,
        },
        venue_snapshot: VenueSnapshot {
            venue_id: instance.venue_id,
            name: instance.venue_name.clone(),
        },
        user_snapshot: UserSnapshot {
            name: profile.name.clone(),
            email: profile.email.clone(),
        },
        description: description.clone(),
        spend_transaction_id: None,
        refund_transaction_id: None,
        refund_amount: None,
        refund_credits: None,
        booked_at: now,
        updated_at: now,
        cancelled_at: None,
        approved_at: None,
        rejected_at: None,
        completed_at: None,
        no_show_at: None,
        cancelled_by: None,
        cancel_reason: None,
        rejection_reason: None,
        deleted: false,
    };
    let spend = (credits_used > 0).then(|| {
        let linkage = Linkage {
            class_template_id: Some(instance.template_id),
            description,
            ..booking_linkage(&booking)
        };
        NewTransaction::new(user_id, -credits_used, TransactionType::Spend).with_linkage(linkage)
    });

    // Apply
    booking.spend_transaction_id = match spend {
        Some(tx) => Some(ledger::post(&mut state.ledger, &mut state.balances, tx, now)?),
        None => None,
    };
    state.catalog.update(&class_instance_id, |instance| {
        instance.booked_count += 1;
    });

    let receipt = BookingReceipt {
        booking_id: booking.id,
        transaction_id: booking.spend_transaction_id,
        status,
        final_price: booking.final_price,
        credits_used,
        applied_discount: booking.applied_discount.clone(),
        duplicate: false,
    };
    let notice = BookingNotice::from(&booking);
    let class_start = booking.class_start();

    tracing::info!(
        booking_id = %booking.id,
        user_id = %user_id,
        class_instance_id = %class_instance_id,
        credits = credits_used,
        status = status.as_str(),
        "Class booked"
    );
    BookingMetrics::record_created(status.as_str());
    state.bookings.insert(booking);

    let reminder = if status == BookingStatus::Pending {
        Effect::dispatch(CreditsAction::ScheduleClassReminder {
            booking_id: receipt.booking_id,
            user_id,
            class_start,
            kind: env.reminder_kind(),
        })
    } else {
        Effect::None
    };

    Ok(Reduced::new(CreditsOutput::Booked(receipt))
        .with_effect(reminder)
        .with_effect(env.notify(NotificationEvent::BookingCreated { notice, status })))
}

/// Cancels an active booking, refunding by timing tier.
pub(crate) fn cancel_booking(
    state: &mut CreditsState,
    env: &CreditsEnvironment,
    booking_id: BookingId,
    cancelled_by: Canceller,
    reason: Option<String>,
) -> Reduction {
    let now = env.now();

    // Validate
    let booking = live_booking(state, booking_id)?;
    let owns = match cancelled_by {
        Canceller::Consumer(user_id) => user_id == booking.user_id,
        Canceller::Business(business_id) => business_id == booking.business_id,
    };
    if !owns {
        return Err(CreditsError::Unauthorized { entity: "booking" });
    }
    let target = cancelled_by.target_status();
    if !booking.status.is_active() {
        return Err(CreditsError::transition(booking.status, target));
    }
    let window = state
        .catalog
        .get(&booking.class_instance_id)
        .map(|instance| instance.cancellation_window_hours)
        .ok_or_else(|| CreditsError::not_found("class instance", booking.class_instance_id))?;

    let quote = pricing::quote_refund(
        booking.final_price,
        booking.credits_used,
        window,
        booking.class_start(),
        now,
        &env.policy,
    );
    let refund = refund_transaction(booking, quote.credits);
    let notice = BookingNotice::from(booking);
    let class_instance_id = booking.class_instance_id;

    // Apply
    let refund_transaction_id = post_refund(state, refund, now)?;
    state.bookings.update(&booking_id, |b| {
        b.status = target;
        b.cancelled_at = Some(now);
        b.updated_at = now;
        b.cancelled_by = Some(cancelled_by);
        b.cancel_reason.clone_from(&reason);
        b.refund_amount = Some(quote.amount);
        b.refund_credits = Some(quote.credits);
        b.refund_transaction_id = refund_transaction_id;
    });
    state.catalog.release_seat(&class_instance_id);

    tracing::info!(
        booking_id = %booking_id,
        status = target.as_str(),
        tier = %quote.tier,
        refund_credits = quote.credits,
        "Booking cancelled"
    );
    BookingMetrics::record_closed(target.as_str());

    Ok(Reduced::new(CreditsOutput::Cancelled(CancellationReceipt {
        booking_id,
        status: target,
        tier: Some(quote.tier),
        refund_amount: quote.amount,
        refund_credits: quote.credits,
        refund_transaction_id,
    }))
    .with_effect(Effect::dispatch(CreditsAction::CancelRemindersForBooking { booking_id }))
    .with_effect(env.notify(NotificationEvent::BookingCancelled {
        notice,
        cancelled_by,
        refund_amount: quote.amount,
        refund_credits: quote.credits,
        reason,
    })))
}

/// Confirms a booking that was waiting for the business.
pub(crate) fn approve_booking(
    state: &mut CreditsState,
    env: &CreditsEnvironment,
    booking_id: BookingId,
    business_id: BusinessId,
) -> Reduction {
    let now = env.now();

    let booking = live_booking(state, booking_id)?;
    ensure_business(booking, business_id)?;
    if booking.status != BookingStatus::AwaitingApproval {
        return Err(CreditsError::transition(booking.status, BookingStatus::Pending));
    }
    let (user_id, class_start) = (booking.user_id, booking.class_start());

    let mut notice = None;
    state.bookings.update(&booking_id, |b| {
        b.status = BookingStatus::Pending;
        b.approved_at = Some(now);
        b.updated_at = now;
        notice = Some(BookingNotice::from(&*b));
    });

    tracing::info!(booking_id = %booking_id, "Booking approved");

    let notify = notice.map_or(Effect::None, |notice| {
        env.notify(NotificationEvent::BookingApproved { notice })
    });
    Ok(Reduced::new(CreditsOutput::Done)
        .with_effect(Effect::dispatch(CreditsAction::ScheduleClassReminder {
            booking_id,
            user_id,
            class_start,
            kind: env.reminder_kind(),
        }))
        .with_effect(notify))
}

/// Declines a booking that was waiting for the business, refunding in full.
pub(crate) fn reject_booking(
    state: &mut CreditsState,
    env: &CreditsEnvironment,
    booking_id: BookingId,
    business_id: BusinessId,
    reason: Option<String>,
) -> Reduction {
    ensure_business(live_booking(state, booking_id)?, business_id)?;
    reject_unapproved(state, env, booking_id, reason)
}

/// Declines an `awaiting_approval` booking with a full refund. Shared by the
/// business-facing reject and the stale-approval sweep.
pub(crate) fn reject_unapproved(
    state: &mut CreditsState,
    env: &CreditsEnvironment,
    booking_id: BookingId,
    reason: Option<String>,
) -> Reduction {
    let now = env.now();

    // Validate
    let booking = live_booking(state, booking_id)?;
    if booking.status != BookingStatus::AwaitingApproval {
        return Err(CreditsError::transition(
            booking.status,
            BookingStatus::RejectedByBusiness,
        ));
    }
    let quote = RefundQuote::full(booking.final_price, booking.credits_used);
    let refund = refund_transaction(booking, quote.credits);
    let notice = BookingNotice::from(booking);
    let class_instance_id = booking.class_instance_id;

    // Apply
    let refund_transaction_id = post_refund(state, refund, now)?;
    state.bookings.update(&booking_id, |b| {
        b.status = BookingStatus::RejectedByBusiness;
        b.rejected_at = Some(now);
        b.updated_at = now;
        b.rejection_reason.clone_from(&reason);
        b.refund_amount = Some(quote.amount);
        b.refund_credits = Some(quote.credits);
        b.refund_transaction_id = refund_transaction_id;
    });
    state.catalog.release_seat(&class_instance_id);

    tracing::info!(booking_id = %booking_id, refund_credits = quote.credits, "Booking rejected");
    BookingMetrics::record_closed(BookingStatus::RejectedByBusiness.as_str());

    Ok(Reduced::new(CreditsOutput::Cancelled(CancellationReceipt {
        booking_id,
        status: BookingStatus::RejectedByBusiness,
        tier: None,
        refund_amount: quote.amount,
        refund_credits: quote.credits,
        refund_transaction_id,
    }))
    .with_effect(Effect::dispatch(CreditsAction::CancelRemindersForBooking { booking_id }))
    .with_effect(env.notify(NotificationEvent::BookingRejected { notice, reason })))
}

/// Records attendance for a pending booking once the class has started.
pub(crate) fn complete_booking(
    state: &mut CreditsState,
    env: &CreditsEnvironment,
    booking_id: BookingId,
    business_id: BusinessId,
) -> Reduction {
    let now = env.now();

    let booking = live_booking(state, booking_id)?;
    ensure_business(booking, business_id)?;
    if booking.status != BookingStatus::Pending {
        return Err(CreditsError::transition(booking.status, BookingStatus::Completed));
    }
    if now < booking.class_start() {
        return Err(CreditsError::ClassNotStarted);
    }

    state.bookings.update(&booking_id, |b| {
        b.status = BookingStatus::Completed;
        b.completed_at = Some(now);
        b.updated_at = now;
    });

    tracing::info!(booking_id = %booking_id, "Booking completed");
    BookingMetrics::record_closed(BookingStatus::Completed.as_str());

    Ok(Reduced::new(CreditsOutput::Done)
        .with_effect(Effect::dispatch(CreditsAction::CancelRemindersForBooking { booking_id })))
}

/// Cancels a whole class: every active booking moves to
/// `cancelled_by_business` with a full refund.
pub(crate) fn cancel_class_instance(
    state: &mut CreditsState,
    env: &CreditsEnvironment,
    class_instance_id: ClassInstanceId,
    business_id: BusinessId,
    reason: Option<String>,
) -> Reduction {
    let now = env.now();

    // Validate
    let instance = state
        .catalog
        .live(&class_instance_id)
        .ok_or_else(|| CreditsError::not_found("class instance", class_instance_id))?;
    if instance.business_id != business_id {
        return Err(CreditsError::Unauthorized {
            entity: "class instance",
        });
    }
    if instance.status != ClassStatus::Scheduled {
        return Err(CreditsError::transition(instance.status, ClassStatus::Cancelled));
    }
    let (class_name, venue_name, start_time) = (
        instance.name.clone(),
        instance.venue_name.clone(),
        instance.start_time,
    );

    let affected: Vec<(BookingId, RefundQuote, Option<NewTransaction>, BookingNotice)> = state
        .bookings
        .for_instance(&class_instance_id)
        .filter(|b| b.status.is_active())
        .map(|b| {
            let quote = RefundQuote::full(b.final_price, b.credits_used);
            (b.id, quote, refund_transaction(b, quote.credits), BookingNotice::from(b))
        })
        .collect();
    for (_, _, refund, _) in &affected {
        if let Some(tx) = refund {
            tx.validate()?;
        }
    }

    // Apply
    let canceller = Canceller::Business(business_id);
    let mut cancelled_bookings = Vec::with_capacity(affected.len());
    let mut notices = Vec::with_capacity(affected.len());
    let mut credits_refunded = 0;
    for (booking_id, quote, refund, notice) in affected {
        let refund_transaction_id = post_refund(state, refund, now)?;
        state.bookings.update(&booking_id, |b| {
            b.status = BookingStatus::CancelledByBusiness;
            b.cancelled_at = Some(now);
            b.updated_at = now;
            b.cancelled_by = Some(canceller);
            b.cancel_reason.clone_from(&reason);
            b.refund_amount = Some(quote.amount);
            b.refund_credits = Some(quote.credits);
            b.refund_transaction_id = refund_transaction_id;
        });
        BookingMetrics::record_closed(BookingStatus::CancelledByBusiness.as_str());
        credits_refunded += quote.credits;
        cancelled_bookings.push(booking_id);
        notices.push(notice);
    }
    let released = u32::try_from(cancelled_bookings.len()).unwrap_or(u32::MAX);
    state.catalog.update(&class_instance_id, |instance| {
        instance.status = ClassStatus::Cancelled;
        instance.cancelled_at = Some(now);
        instance.booked_count = instance.booked_count.saturating_sub(released);
    });

    tracing::info!(
        class_instance_id = %class_instance_id,
        bookings = cancelled_bookings.len(),
        credits_refunded,
        "Class cancelled"
    );

    Ok(Reduced::new(CreditsOutput::ClassCancelled(ClassCancellationReceipt {
        class_instance_id,
        cancelled_bookings,
        credits_refunded,
    }))
    .with_effect(Effect::dispatch(CreditsAction::CancelRemindersForClass { class_instance_id }))
    .with_effect(env.notify(NotificationEvent::ClassCancelled {
        class_instance_id,
        class_name,
        venue_name,
        start_time,
        affected: notices,
        reason,
    })))
}
