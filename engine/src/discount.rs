//! Discount rules and the first-match evaluation policy.
//!
//! Rules come from an ordered list of sources ([`RULE_SOURCES`]). Each source
//! is scanned in list order and yields its first rule whose condition passes;
//! the first source that yields a rule wins. Instance rules therefore always
//! beat template rules, whatever the discount magnitude.
//!
//! No capping happens here. The raw discount may exceed the price; pricing
//! caps it.

use crate::error::{CreditsError, Result};
use crate::types::{Money, RuleId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Where a rule is attached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Defined on the class template, inherited by every instance
    Template,
    /// Defined on one class instance
    Instance,
}

/// When a rule applies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountCondition {
    /// Always passes
    Always,
    /// Passes when booking at least `hours` before the class starts
    HoursBeforeMin {
        /// Minimum lead time in hours
        hours: u32,
    },
}

impl DiscountCondition {
    /// Evaluates the condition for a booking made at `now`
    #[must_use]
    pub fn passes(&self, now: DateTime<Utc>, class_start: DateTime<Utc>) -> bool {
        match self {
            Self::Always => true,
            Self::HoursBeforeMin { hours } => {
                class_start - now >= Duration::hours(i64::from(*hours))
            },
        }
    }
}

/// How much a rule takes off
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountValue {
    /// Flat amount in cents
    FixedAmount {
        /// Discount in cents
        value_in_cents: u64,
    },
    /// Percentage of the original price (0-100)
    Percentage {
        /// Percent off
        percent: u8,
    },
}

impl DiscountValue {
    /// Raw (uncapped) discount against `original`
    #[must_use]
    pub fn raw_discount(&self, original: Money) -> Money {
        match self {
            Self::FixedAmount { value_in_cents } => Money::from_cents(*value_in_cents),
            Self::Percentage { percent } => original.percent(*percent),
        }
    }
}

/// A discount rule attached to a template or instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRule {
    /// Rule identifier
    pub id: RuleId,
    /// Human-readable name, copied onto bookings that use it
    pub name: String,
    /// Where the rule is attached
    pub scope: RuleScope,
    /// When it applies
    pub condition: DiscountCondition,
    /// What it takes off
    pub discount: DiscountValue,
    /// When the rule was created
    pub created_at: DateTime<Utc>,
    /// Who created it
    pub created_by: UserId,
}

impl DiscountRule {
    /// Creates a rule with a fresh id
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        scope: RuleScope,
        condition: DiscountCondition,
        discount: DiscountValue,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            scope,
            condition,
            discount,
            created_at,
            created_by,
        }
    }

    /// Checks that the rule can be evaluated
    ///
    /// # Errors
    ///
    /// [`CreditsError::InvalidDiscountRule`] for a percentage above 100.
    pub fn validate(&self) -> Result<()> {
        match self.discount {
            DiscountValue::Percentage { percent } if percent > 100 => {
                Err(CreditsError::InvalidDiscountRule {
                    rule: self.name.clone(),
                    reason: format!("percentage {percent} exceeds 100"),
                })
            },
            _ => Ok(()),
        }
    }
}

/// Origin of an applied discount
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountSource {
    /// Rule attached to the class instance
    InstanceRule,
    /// Rule inherited from the class template
    TemplateRule,
}

impl std::fmt::Display for DiscountSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstanceRule => write!(f, "instance_rule"),
            Self::TemplateRule => write!(f, "template_rule"),
        }
    }
}

/// Evaluation order of rule sources
pub const RULE_SOURCES: [DiscountSource; 2] =
    [DiscountSource::InstanceRule, DiscountSource::TemplateRule];

/// Everything the discount engine looks at
#[derive(Clone, Copy, Debug)]
pub struct BookingContext<'a> {
    /// Evaluation time
    pub now: DateTime<Utc>,
    /// Start of the class being booked
    pub class_start: DateTime<Utc>,
    /// Live price of the class
    pub original_price: Money,
    /// Rules attached to the instance
    pub instance_rules: &'a [DiscountRule],
    /// Rules inherited from the template
    pub template_rules: &'a [DiscountRule],
}

impl BookingContext<'_> {
    const fn rules(&self, source: DiscountSource) -> &[DiscountRule] {
        match source {
            DiscountSource::InstanceRule => self.instance_rules,
            DiscountSource::TemplateRule => self.template_rules,
        }
    }
}

/// The single discount selected for a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountOutcome {
    /// Which source produced it
    pub source: DiscountSource,
    /// Rule that matched
    pub rule_id: RuleId,
    /// Rule name
    pub rule_name: String,
    /// Uncapped discount in cents
    pub raw_discount: Money,
}

/// Selects at most one discount for the context.
///
/// # Errors
///
/// [`CreditsError::InvalidDiscountRule`] when the winning rule is malformed.
/// Malformed rules that are never reached do not fail the evaluation.
pub fn evaluate(ctx: &BookingContext<'_>) -> Result<Option<DiscountOutcome>> {
    for source in RULE_SOURCES {
        let matched = ctx
            .rules(source)
            .iter()
            .find(|rule| rule.condition.passes(ctx.now, ctx.class_start));

        if let Some(rule) = matched {
            rule.validate()?;
            return Ok(Some(DiscountOutcome {
                source,
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                raw_discount: rule.discount.raw_discount(ctx.original_price),
            }));
        }
    }
    Ok(None)
}
