//! Class instances and user profiles fed in by the surrounding platform.
//!
//! The engine owns only `booked_count` and the lifecycle `status` of an
//! instance; everything else is replaced wholesale by upserts.

use crate::discount::DiscountRule;
use crate::types::{
    BusinessId, ClassInstanceId, ClassTemplateId, Money, UserId, UserProfile, VenueId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Lifecycle of a class instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    /// Open (or ran, pending the completion sweep)
    Scheduled,
    /// Cancelled by the business
    Cancelled,
    /// Ended and swept
    Completed,
}

impl std::fmt::Display for ClassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One scheduled occurrence of a class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInstance {
    /// Instance identifier
    pub id: ClassInstanceId,
    /// Owning business
    pub business_id: BusinessId,
    /// Venue hosting the class
    pub venue_id: VenueId,
    /// Template this instance was generated from
    pub template_id: ClassTemplateId,
    /// Class name
    pub name: String,
    /// Venue name
    pub venue_name: String,
    /// Start time
    pub start_time: DateTime<Utc>,
    /// End time
    pub end_time: DateTime<Utc>,
    /// Seat capacity
    pub capacity: u32,
    /// Seats currently taken by active bookings
    pub booked_count: u32,
    /// Live price in cents
    pub price: Money,
    /// Full-refund cutoff, in hours before start
    pub cancellation_window_hours: u32,
    /// New bookings wait for business approval
    pub requires_confirmation: bool,
    /// Lifecycle status
    pub status: ClassStatus,
    /// Soft-delete flag
    #[serde(default)]
    pub deleted: bool,
    /// Rules attached to this instance
    #[serde(default)]
    pub discount_rules: Vec<DiscountRule>,
    /// Rules inherited from the template snapshot
    #[serde(default)]
    pub template_discount_rules: Vec<DiscountRule>,
    /// When the business cancelled the class
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the completion sweep closed the class
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClassInstance {
    /// Whether the instance is visible to queries and sweeps
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Seats still open
    #[must_use]
    pub const fn seats_left(&self) -> u32 {
        self.capacity.saturating_sub(self.booked_count)
    }
}

type TimeKey = (ClassStatus, DateTime<Utc>, ClassInstanceId);

/// Class instances and user profiles, with the time indexes the sweeps scan
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CatalogRecords", into = "CatalogRecords")]
pub struct ClassCatalog {
    instances: HashMap<ClassInstanceId, ClassInstance>,
    users: HashMap<UserId, UserProfile>,
    by_start: BTreeSet<TimeKey>,
    by_end: BTreeSet<TimeKey>,
}

#[derive(Serialize, Deserialize)]
struct CatalogRecords {
    instances: Vec<ClassInstance>,
    users: Vec<UserProfile>,
}

impl From<CatalogRecords> for ClassCatalog {
    fn from(records: CatalogRecords) -> Self {
        let mut catalog = Self::default();
        for user in records.users {
            catalog.register_user(user);
        }
        for instance in records.instances {
            catalog.insert(instance);
        }
        catalog
    }
}

impl From<ClassCatalog> for CatalogRecords {
    fn from(catalog: ClassCatalog) -> Self {
        let mut instances: Vec<_> = catalog.instances.into_values().collect();
        instances.sort_by_key(|i| (i.start_time, i.id));
        let mut users: Vec<_> = catalog.users.into_values().collect();
        users.sort_by_key(|u| u.id);
        Self { instances, users }
    }
}

impl ClassCatalog {
    /// Creates an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user profile
    pub fn register_user(&mut self, profile: UserProfile) {
        self.users.insert(profile.id, profile);
    }

    /// Looks up a user profile
    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<&UserProfile> {
        self.users.get(id)
    }

    /// Adds or replaces an instance, keeping the engine-owned seat count
    /// and lifecycle status of an existing record.
    pub fn upsert(&mut self, mut instance: ClassInstance) {
        if let Some(existing) = self.instances.get(&instance.id) {
            instance.booked_count = existing.booked_count;
            instance.status = existing.status;
            instance.cancelled_at = existing.cancelled_at;
            instance.completed_at = existing.completed_at;
        }
        self.insert(instance);
    }

    fn insert(&mut self, instance: ClassInstance) {
        if let Some(previous) = self.instances.remove(&instance.id) {
            self.unindex(&previous);
        }
        self.index(&instance);
        self.instances.insert(instance.id, instance);
    }

    fn index(&mut self, instance: &ClassInstance) {
        if instance.is_live() {
            self.by_start
                .insert((instance.status, instance.start_time, instance.id));
            self.by_end
                .insert((instance.status, instance.end_time, instance.id));
        }
    }

    fn unindex(&mut self, instance: &ClassInstance) {
        self.by_start
            .remove(&(instance.status, instance.start_time, instance.id));
        self.by_end
            .remove(&(instance.status, instance.end_time, instance.id));
    }

    /// Looks up an instance, including soft-deleted ones
    #[must_use]
    pub fn get(&self, id: &ClassInstanceId) -> Option<&ClassInstance> {
        self.instances.get(id)
    }

    /// Looks up a live (not soft-deleted) instance
    #[must_use]
    pub fn live(&self, id: &ClassInstanceId) -> Option<&ClassInstance> {
        self.instances.get(id).filter(|i| i.is_live())
    }

    /// Mutates an instance in place, keeping the time indexes current
    pub fn update<F>(&mut self, id: &ClassInstanceId, f: F) -> bool
    where
        F: FnOnce(&mut ClassInstance),
    {
        let Some(mut instance) = self.instances.remove(id) else {
            return false;
        };
        self.unindex(&instance);
        f(&mut instance);
        self.index(&instance);
        self.instances.insert(instance.id, instance);
        true
    }

    /// Frees one seat
    pub fn release_seat(&mut self, id: &ClassInstanceId) {
        self.update(id, |instance| {
            instance.booked_count = instance.booked_count.saturating_sub(1);
        });
    }

    /// Live instances in `status` ending strictly before `cutoff`
    #[must_use]
    pub fn ending_before(&self, status: ClassStatus, cutoff: DateTime<Utc>) -> Vec<ClassInstanceId> {
        self.by_end
            .range((status, DateTime::<Utc>::MIN_UTC, ClassInstanceId::nil())..(status, cutoff, ClassInstanceId::nil()))
            .map(|(_, _, id)| *id)
            .collect()
    }

    /// Live instances in `status` starting in `(from, to]`
    #[must_use]
    pub fn starting_between(
        &self,
        status: ClassStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<ClassInstanceId> {
        self.by_start
            .range((status, from, ClassInstanceId::nil())..)
            .take_while(|(s, start, _)| *s == status && *start <= to)
            .filter(|(_, start, _)| *start > from)
            .map(|(_, _, id)| *id)
            .collect()
    }

    /// Number of instances, including soft-deleted ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the catalog holds no instances
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn instance_at(start: DateTime<Utc>) -> ClassInstance {
        ClassInstance {
            id: ClassInstanceId::new(),
            business_id: BusinessId::new(),
            venue_id: VenueId::new(),
            template_id: ClassTemplateId::new(),
            name: "Vinyasa Flow".to_string(),
            venue_name: "Studio North".to_string(),
            start_time: start,
            end_time: start + Duration::hours(1),
            capacity: 10,
            booked_count: 0,
            price: Money::from_cents(2000),
            cancellation_window_hours: 24,
            requires_confirmation: false,
            status: ClassStatus::Scheduled,
            deleted: false,
            discount_rules: Vec::new(),
            template_discount_rules: Vec::new(),
            cancelled_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn upsert_keeps_engine_owned_fields() {
        let now = Utc::now();
        let mut catalog = ClassCatalog::new();
        let mut instance = instance_at(now);
        let id = instance.id;
        catalog.upsert(instance.clone());
        catalog.update(&id, |i| i.booked_count = 4);

        instance.name = "Power Flow".to_string();
        instance.booked_count = 0;
        catalog.upsert(instance);

        let stored = catalog.get(&id).map(|i| (i.name.clone(), i.booked_count));
        assert_eq!(stored, Some(("Power Flow".to_string(), 4)));
    }

    #[test]
    fn ending_before_scans_by_status_and_end_time() {
        let now = Utc::now();
        let mut catalog = ClassCatalog::new();
        let old = instance_at(now - Duration::hours(5));
        let recent = instance_at(now - Duration::minutes(30));
        let (old_id, recent_id) = (old.id, recent.id);
        catalog.upsert(old);
        catalog.upsert(recent);

        let cutoff = now - Duration::hours(2);
        assert_eq!(catalog.ending_before(ClassStatus::Scheduled, cutoff), vec![old_id]);

        catalog.update(&old_id, |i| i.status = ClassStatus::Completed);
        assert!(catalog.ending_before(ClassStatus::Scheduled, cutoff).is_empty());
        assert!(!catalog.ending_before(ClassStatus::Scheduled, now + Duration::hours(2)).contains(&old_id));
        assert!(catalog.ending_before(ClassStatus::Scheduled, now + Duration::hours(2)).contains(&recent_id));
    }

    #[test]
    fn deleted_instances_are_not_indexed() {
        let now = Utc::now();
        let mut catalog = ClassCatalog::new();
        let mut instance = instance_at(now + Duration::hours(3));
        instance.deleted = true;
        let id = instance.id;
        catalog.upsert(instance);

        assert!(catalog.live(&id).is_none());
        assert!(catalog
            .starting_between(ClassStatus::Scheduled, now, now + Duration::hours(48))
            .is_empty());
    }

    #[test]
    fn starting_between_excludes_lower_bound() {
        let now = Utc::now();
        let mut catalog = ClassCatalog::new();
        let at_now = instance_at(now);
        let soon = instance_at(now + Duration::hours(2));
        let later = instance_at(now + Duration::hours(72));
        let soon_id = soon.id;
        catalog.upsert(at_now);
        catalog.upsert(soon);
        catalog.upsert(later);

        let found = catalog.starting_between(ClassStatus::Scheduled, now, now + Duration::hours(48));
        assert_eq!(found, vec![soon_id]);
    }

    #[test]
    fn serde_round_trip_rebuilds_indexes() {
        let now = Utc::now();
        let mut catalog = ClassCatalog::new();
        let instance = instance_at(now - Duration::hours(5));
        let id = instance.id;
        catalog.upsert(instance);

        let json = serde_json::to_string(&catalog).unwrap_or_default();
        let restored: ClassCatalog = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(restored.ending_before(ClassStatus::Scheduled, now), vec![id]);
    }
}
