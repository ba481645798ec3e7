//! Load-time snapshots for detecting price-relevant changes.
//!
//! A [`Loaded`] value pairs a persisted entity with the value its
//! price-sensitive field had when it was read. Saving compares the two to
//! decide whether dependent subscriptions need their price recomputed.

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};

use crate::models::{Plan, Service};

/// An entity whose change can alter the price of its subscriptions
pub trait PriceSensitive {
    type Value: PartialEq + Copy + Debug;

    /// Identity of the persisted row
    fn id(&self) -> i64;

    /// Current value of the field that feeds the price formula
    fn price_input(&self) -> Self::Value;
}

impl PriceSensitive for Service {
    type Value = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn price_input(&self) -> i64 {
        self.full_price
    }
}

impl PriceSensitive for Plan {
    type Value = i32;

    fn id(&self) -> i64 {
        self.id
    }

    fn price_input(&self) -> i32 {
        self.discount_percent
    }
}

/// A persisted entity plus the snapshot taken when it was loaded.
///
/// Only rows that already exist can be wrapped, so a change reported by
/// [`Loaded::is_price_dirty`] is always an update, never a creation.
#[derive(Debug, Clone)]
pub struct Loaded<T: PriceSensitive> {
    entity: T,
    snapshot: T::Value,
}

impl<T: PriceSensitive> Loaded<T> {
    pub fn new(entity: T) -> Self {
        let snapshot = entity.price_input();
        Self { entity, snapshot }
    }

    /// Value of the price-sensitive field at load (or last save) time
    pub fn snapshot(&self) -> T::Value {
        self.snapshot
    }

    pub fn is_price_dirty(&self) -> bool {
        self.entity.price_input() != self.snapshot
    }

    /// Re-baseline after a successful save so the next save diffs against
    /// what is now stored.
    pub(crate) fn mark_saved(&mut self) {
        self.snapshot = self.entity.price_input();
    }
}

impl<T: PriceSensitive> Deref for Loaded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

impl<T: PriceSensitive> DerefMut for Loaded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanType;

    fn service(full_price: i64) -> Service {
        Service {
            id: 7,
            name: "Hosting".to_string(),
            full_price,
        }
    }

    #[test]
    fn test_unchanged_service_is_clean() {
        let mut loaded = Loaded::new(service(100));
        loaded.name = "Renamed".to_string();
        assert!(!loaded.is_price_dirty());
    }

    #[test]
    fn test_price_change_is_dirty() {
        let mut loaded = Loaded::new(service(100));
        loaded.full_price = 150;
        assert!(loaded.is_price_dirty());
        assert_eq!(loaded.snapshot(), 100);
    }

    #[test]
    fn test_change_back_to_original_is_clean() {
        let mut loaded = Loaded::new(service(100));
        loaded.full_price = 150;
        loaded.full_price = 100;
        assert!(!loaded.is_price_dirty());
    }

    #[test]
    fn test_mark_saved_rebaselines() {
        let mut loaded = Loaded::new(service(100));
        loaded.full_price = 150;
        loaded.mark_saved();
        assert!(!loaded.is_price_dirty());
        assert_eq!(loaded.snapshot(), 150);
    }

    #[test]
    fn test_plan_discount_tracked() {
        let mut loaded = Loaded::new(Plan {
            id: 3,
            plan_type: PlanType::Full,
            discount_percent: 10,
        });
        loaded.plan_type = PlanType::Student;
        assert!(!loaded.is_price_dirty());
        loaded.discount_percent = 20;
        assert!(loaded.is_price_dirty());
    }
}
