//! Business earnings, derived from bookings on read.

use crate::booking::{Booking, BookingStatus, BookingTable};
use crate::types::{BusinessId, Money};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Calendar month
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthKey {
    /// Year
    pub year: i32,
    /// Month, 1-12
    pub month: u32,
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Earnings for one month
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyEarnings {
    /// Month of the class start
    pub month: MonthKey,
    /// Recognized revenue
    pub revenue: Money,
    /// Bookings that contributed revenue
    pub recognized_bookings: usize,
    /// Cents given back through refunds
    pub refunded: Money,
}

/// Earnings for a business, oldest month first
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsReport {
    /// Business
    pub business_id: BusinessId,
    /// One entry per month with at least one booking
    pub months: Vec<MonthlyEarnings>,
    /// Sum over all months
    pub total_revenue: Money,
}

/// Revenue a booking has earned so far.
///
/// Attended and no-show bookings earn the full final price; cancelled and
/// rejected bookings earn whatever was not refunded; open bookings earn
/// nothing yet.
#[must_use]
pub fn recognized_revenue(booking: &Booking) -> Money {
    match booking.status {
        BookingStatus::Completed | BookingStatus::NoShow => booking.final_price,
        BookingStatus::CancelledByConsumer
        | BookingStatus::CancelledByBusiness
        | BookingStatus::RejectedByBusiness => booking
            .final_price
            .saturating_sub(booking.refund_amount.unwrap_or(booking.final_price)),
        BookingStatus::Pending | BookingStatus::AwaitingApproval => Money::ZERO,
    }
}

/// Groups a business's bookings by the month their class starts in.
#[must_use]
pub fn earnings_for_business(bookings: &BookingTable, business_id: BusinessId) -> EarningsReport {
    let mut months: BTreeMap<MonthKey, MonthlyEarnings> = BTreeMap::new();

    for booking in bookings
        .iter()
        .filter(|b| b.business_id == business_id && !b.deleted)
    {
        let start = booking.class_start();
        let month = MonthKey {
            year: start.year(),
            month: start.month(),
        };
        let entry = months.entry(month).or_insert(MonthlyEarnings {
            month,
            revenue: Money::ZERO,
            recognized_bookings: 0,
            refunded: Money::ZERO,
        });

        let revenue = recognized_revenue(booking);
        if !revenue.is_zero() {
            entry.revenue = entry.revenue.saturating_add(revenue);
            entry.recognized_bookings += 1;
        }
        if let Some(refund) = booking.refund_amount {
            entry.refunded = entry.refunded.saturating_add(refund);
        }
    }

    let months: Vec<MonthlyEarnings> = months.into_values().collect();
    let total_revenue = months
        .iter()
        .fold(Money::ZERO, |total, m| total.saturating_add(m.revenue));

    EarningsReport {
        business_id,
        months,
        total_revenue,
    }
}
