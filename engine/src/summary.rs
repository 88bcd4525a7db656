//! Denormalized "discounted and starting soon" browse list.
//!
//! Rebuilt wholesale by a periodic job; never patched incrementally.

use crate::catalog::{ClassCatalog, ClassStatus};
use crate::discount::DiscountSource;
use crate::pricing;
use crate::sweeps::SweepReport;
use crate::types::{ClassInstanceId, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discounted class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountSummaryEntry {
    /// Class instance
    pub class_instance_id: ClassInstanceId,
    /// Class name
    pub name: String,
    /// Venue name
    pub venue_name: String,
    /// Class start
    pub start_time: DateTime<Utc>,
    /// Live price
    pub original_price: Money,
    /// Price after the discount
    pub final_price: Money,
    /// Effective discount
    pub discount_amount: Money,
    /// Whole percentage off
    pub discount_percentage: u8,
    /// Rule source that won
    pub source: DiscountSource,
}

/// The current browse list
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountSummary {
    /// Entries ordered by start time
    pub entries: Vec<DiscountSummaryEntry>,
    /// When the list was last rebuilt
    pub rebuilt_at: Option<DateTime<Utc>>,
}

impl DiscountSummary {
    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no class is currently discounted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Prices every scheduled class starting in `(now, horizon]` and keeps the
/// discounted ones. A class whose pricing fails is logged and skipped.
pub(crate) fn build(
    catalog: &ClassCatalog,
    now: DateTime<Utc>,
    horizon: DateTime<Utc>,
) -> (DiscountSummary, SweepReport) {
    let candidates = catalog.starting_between(ClassStatus::Scheduled, now, horizon);
    let mut report = SweepReport {
        examined: candidates.len(),
        ..SweepReport::default()
    };
    let mut entries = Vec::new();

    for id in candidates {
        let Some(instance) = catalog.live(&id) else {
            report.failed += 1;
            continue;
        };
        let (price, outcome) = match pricing::calculate_final_price_from_instance(instance, now) {
            Ok(priced) => priced,
            Err(error) => {
                tracing::warn!(class_instance_id = %id, %error, "Skipping class in discount summary");
                report.failed += 1;
                continue;
            },
        };
        let Some(outcome) = outcome.filter(|_| !price.discount_amount.is_zero()) else {
            continue;
        };

        entries.push(DiscountSummaryEntry {
            class_instance_id: id,
            name: instance.name.clone(),
            venue_name: instance.venue_name.clone(),
            start_time: instance.start_time,
            original_price: price.original_price,
            final_price: price.final_price,
            discount_amount: price.discount_amount,
            discount_percentage: price.discount_percentage,
            source: outcome.source,
        });
        report.processed += 1;
    }

    (
        DiscountSummary {
            entries,
            rebuilt_at: Some(now),
        },
        report,
    )
}
