//! Final price, credit conversion, and refund tiers.

use crate::catalog::ClassInstance;
use crate::config::BookingPolicy;
use crate::discount::{self, BookingContext, DiscountOutcome};
use crate::error::Result;
use crate::types::{Credits, Money};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Price of a booking after the discount is applied
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Live price before discount
    pub original_price: Money,
    /// Amount charged, never below zero
    pub final_price: Money,
    /// Effective (capped) discount
    pub discount_amount: Money,
    /// `discount_amount` as a whole percentage of the original, rounded half up
    pub discount_percentage: u8,
}

/// Applies a discount, capping it at the original price.
#[must_use]
pub fn compute_final_price(original: Money, discount: Option<&DiscountOutcome>) -> PriceBreakdown {
    let raw = discount.map_or(Money::ZERO, |d| d.raw_discount);
    let final_price = original.saturating_sub(raw);
    let discount_amount = original.saturating_sub(final_price);

    let discount_percentage = if original.is_zero() {
        0
    } else {
        let pct = (u128::from(discount_amount.cents()) * 100 + u128::from(original.cents()) / 2)
            / u128::from(original.cents());
        u8::try_from(pct).unwrap_or(100)
    };

    PriceBreakdown {
        original_price: original,
        final_price,
        discount_amount,
        discount_percentage,
    }
}

/// Converts cents to credits, rounding half up.
///
/// A zero `cents_per_credit` is treated as one cent per credit.
#[must_use]
pub fn credits_for(amount: Money, cents_per_credit: u64) -> Credits {
    let rate = u128::from(cents_per_credit.max(1));
    let credits = (u128::from(amount.cents()) + rate / 2) / rate;
    Credits::try_from(credits).unwrap_or(Credits::MAX)
}

/// Cancellation timing relative to the class's cancellation window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundTier {
    /// At or before the window boundary: full refund
    Early,
    /// Inside the window but before the start: partial refund
    Late,
    /// At or after the start: no refund
    AfterStart,
}

impl RefundTier {
    /// Classifies a cancellation made at `now`
    #[must_use]
    pub fn classify(window_hours: u32, class_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let until_start = class_start - now;
        if until_start >= Duration::hours(i64::from(window_hours)) {
            Self::Early
        } else if until_start > Duration::zero() {
            Self::Late
        } else {
            Self::AfterStart
        }
    }

    /// Refund percentage for this tier
    #[must_use]
    pub const fn percent(self, policy: &BookingPolicy) -> u8 {
        match self {
            Self::Early => 100,
            Self::Late => policy.late_cancel_refund_percent,
            Self::AfterStart => 0,
        }
    }
}

impl std::fmt::Display for RefundTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Early => write!(f, "early"),
            Self::Late => write!(f, "late"),
            Self::AfterStart => write!(f, "after_start"),
        }
    }
}

/// Refund owed for a cancellation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundQuote {
    /// Timing tier
    pub tier: RefundTier,
    /// Percentage of the final price refunded
    pub percent: u8,
    /// Refund in cents
    pub amount: Money,
    /// Refund in credits, never more than were spent
    pub credits: Credits,
}

impl RefundQuote {
    /// Everything back, regardless of timing
    #[must_use]
    pub const fn full(final_price: Money, credits_used: Credits) -> Self {
        Self {
            tier: RefundTier::Early,
            percent: 100,
            amount: final_price,
            credits: credits_used,
        }
    }
}

/// Prices a cancellation from the booking's frozen final price.
#[must_use]
pub fn quote_refund(
    final_price: Money,
    credits_used: Credits,
    window_hours: u32,
    class_start: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> RefundQuote {
    let tier = RefundTier::classify(window_hours, class_start, now);
    let percent = tier.percent(policy);
    if percent >= 100 {
        return RefundQuote::full(final_price, credits_used);
    }
    let amount = final_price.percent(percent);
    let credits = credits_for(amount, policy.credit_value_cents).min(credits_used);
    RefundQuote {
        tier,
        percent,
        amount,
        credits,
    }
}

/// Evaluates the instance's live rules and prices it for a booking at `now`.
///
/// # Errors
///
/// [`crate::CreditsError::InvalidDiscountRule`] when the winning rule is malformed.
pub fn calculate_final_price_from_instance(
    instance: &ClassInstance,
    now: DateTime<Utc>,
) -> Result<(PriceBreakdown, Option<DiscountOutcome>)> {
    let ctx = BookingContext {
        now,
        class_start: instance.start_time,
        original_price: instance.price,
        instance_rules: &instance.discount_rules,
        template_rules: &instance.template_discount_rules,
    };
    let outcome = discount::evaluate(&ctx)?;
    Ok((compute_final_price(instance.price, outcome.as_ref()), outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount::DiscountSource;
    use crate::types::RuleId;
    use proptest::prelude::*;

    fn outcome(cents: u64) -> DiscountOutcome {
        DiscountOutcome {
            source: DiscountSource::InstanceRule,
            rule_id: RuleId::new(),
            rule_name: "test".to_string(),
            raw_discount: Money::from_cents(cents),
        }
    }

    #[test]
    fn discount_larger_than_price_is_capped() {
        let price = compute_final_price(Money::from_cents(1000), Some(&outcome(1500)));
        assert_eq!(price.final_price, Money::ZERO);
        assert_eq!(price.discount_amount, Money::from_cents(1000));
        assert_eq!(price.discount_percentage, 100);
    }

    #[test]
    fn no_discount_keeps_price() {
        let price = compute_final_price(Money::from_cents(2000), None);
        assert_eq!(price.final_price, Money::from_cents(2000));
        assert_eq!(price.discount_amount, Money::ZERO);
        assert_eq!(price.discount_percentage, 0);
    }

    #[test]
    fn discount_percentage_rounds_half_up() {
        let price = compute_final_price(Money::from_cents(2000), Some(&outcome(700)));
        assert_eq!(price.final_price, Money::from_cents(1300));
        assert_eq!(price.discount_percentage, 35);

        let price = compute_final_price(Money::from_cents(800), Some(&outcome(100)));
        assert_eq!(price.discount_percentage, 13);
    }

    #[test]
    fn credits_round_half_up() {
        assert_eq!(credits_for(Money::from_cents(2000), 50), 40);
        assert_eq!(credits_for(Money::from_cents(1325), 50), 27);
        assert_eq!(credits_for(Money::from_cents(1324), 50), 26);
        assert_eq!(credits_for(Money::ZERO, 50), 0);
    }

    #[test]
    fn refund_tiers_follow_window() {
        let now = Utc::now();
        let policy = BookingPolicy::default();
        let price = Money::from_cents(2000);

        let early = quote_refund(price, 40, 24, now + Duration::hours(48), now, &policy);
        assert_eq!(early.tier, RefundTier::Early);
        assert_eq!(early.amount, price);
        assert_eq!(early.credits, 40);

        let late = quote_refund(price, 40, 24, now + Duration::hours(8), now, &policy);
        assert_eq!(late.tier, RefundTier::Late);
        assert_eq!(late.amount, Money::from_cents(1000));
        assert_eq!(late.credits, 20);

        let after = quote_refund(price, 40, 24, now - Duration::minutes(5), now, &policy);
        assert_eq!(after.tier, RefundTier::AfterStart);
        assert_eq!(after.amount, Money::ZERO);
        assert_eq!(after.credits, 0);
    }

    #[test]
    fn window_boundary_counts_as_early() {
        let now = Utc::now();
        assert_eq!(
            RefundTier::classify(24, now + Duration::hours(24), now),
            RefundTier::Early
        );
        assert_eq!(RefundTier::classify(24, now, now), RefundTier::AfterStart);
    }

    proptest! {
        #[test]
        fn final_price_never_exceeds_original(price in 0u64..1_000_000, raw in 0u64..2_000_000) {
            let breakdown = compute_final_price(Money::from_cents(price), Some(&outcome(raw)));
            prop_assert!(breakdown.final_price.cents() <= price);
            prop_assert_eq!(
                breakdown.final_price.cents() + breakdown.discount_amount.cents(),
                price
            );
            prop_assert!(breakdown.discount_percentage <= 100);
        }

        #[test]
        fn partial_refund_never_exceeds_spend(price in 0u64..100_000, pct in 0u8..=100) {
            let policy = BookingPolicy {
                late_cancel_refund_percent: pct,
                ..BookingPolicy::default()
            };
            let spent = credits_for(Money::from_cents(price), policy.credit_value_cents);
            let now = Utc::now();
            let quote = quote_refund(
                Money::from_cents(price),
                spent,
                24,
                now + Duration::hours(1),
                now,
                &policy,
            );
            prop_assert!(quote.credits <= spent);
            prop_assert!(quote.amount.cents() <= price);
        }
    }
}
