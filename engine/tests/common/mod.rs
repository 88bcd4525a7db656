//! Shared fixtures for engine integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use studio_credits::catalog::{ClassInstance, ClassStatus};
use studio_credits::config::{BookingPolicy, DeliveryPolicy};
use studio_credits::discount::DiscountRule;
use studio_credits::notify::RecordingNotifier;
use studio_credits::{
    BusinessId, ClassInstanceId, ClassTemplateId, CreditsEnvironment, Engine, Money, UserId,
    UserProfile, VenueId,
};
use studio_credits_testing::{test_epoch, ManualClock};

pub struct Fixture {
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
    pub engine: Engine,
    pub business: BusinessId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_policy(BookingPolicy::default())
    }

    pub fn with_policy(policy: BookingPolicy) -> Self {
        studio_credits_testing::init_test_tracing();
        let clock = ManualClock::new(test_epoch());
        let notifier = RecordingNotifier::new();
        let env = environment(&clock, &notifier).with_policy(policy);
        Self {
            engine: Engine::new(env),
            clock,
            notifier,
            business: BusinessId::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use studio_credits_core::environment::Clock;
        self.clock.now()
    }

    /// Registers a customer holding `credits` gifted credits
    pub async fn customer(&self, credits: i64) -> UserId {
        let profile = UserProfile::new("Ada Lovelace", "ada@example.com");
        let id = profile.id;
        self.engine.register_user(profile).await.unwrap();
        if credits > 0 {
            self.engine
                .gift_credits(id, credits, Some("welcome".to_string()))
                .await
                .unwrap();
        }
        id
    }

    /// Upserts a class owned by the fixture's business
    pub async fn class(&self, class: ClassSpec) -> ClassInstanceId {
        let instance = class.build(self.business, self.now());
        let id = instance.id;
        self.engine.upsert_class_instance(instance).await.unwrap();
        id
    }
}

pub fn environment(clock: &ManualClock, notifier: &RecordingNotifier) -> CreditsEnvironment {
    CreditsEnvironment::new(Arc::new(clock.clone()), Arc::new(notifier.clone())).with_delivery(
        DeliveryPolicy {
            max_retries: 1,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
            multiplier: 2.0,
        },
    )
}

/// Class description relative to the fixture clock
pub struct ClassSpec {
    pub starts_in: Duration,
    pub price_cents: u64,
    pub capacity: u32,
    pub cancellation_window_hours: u32,
    pub requires_confirmation: bool,
    pub instance_rules: Vec<DiscountRule>,
    pub template_rules: Vec<DiscountRule>,
}

impl Default for ClassSpec {
    fn default() -> Self {
        Self {
            starts_in: Duration::hours(48),
            price_cents: 2000,
            capacity: 10,
            cancellation_window_hours: 24,
            requires_confirmation: false,
            instance_rules: Vec::new(),
            template_rules: Vec::new(),
        }
    }
}

impl ClassSpec {
    pub fn build(self, business_id: BusinessId, now: DateTime<Utc>) -> ClassInstance {
        let start = now + self.starts_in;
        ClassInstance {
            id: ClassInstanceId::new(),
            business_id,
            venue_id: VenueId::new(),
            template_id: ClassTemplateId::new(),
            name: "Vinyasa Flow".to_string(),
            venue_name: "Harbor Studio".to_string(),
            start_time: start,
            end_time: start + Duration::hours(1),
            capacity: self.capacity,
            booked_count: 0,
            price: Money::from_cents(self.price_cents),
            cancellation_window_hours: self.cancellation_window_hours,
            requires_confirmation: self.requires_confirmation,
            status: ClassStatus::Scheduled,
            deleted: false,
            discount_rules: self.instance_rules,
            template_discount_rules: self.template_rules,
            cancelled_at: None,
            completed_at: None,
        }
    }
}
