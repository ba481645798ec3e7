//! Domain models for clients, services, plans and subscriptions

mod client;
mod plan;
mod service;
mod subscription;

pub use client::{Client, NewClient, User};
pub use plan::{validate_discount_percent, NewPlan, Plan, PlanType, MAX_DISCOUNT_PERCENT};
pub use service::{validate_full_price, NewService, Service};
pub use subscription::{NewSubscription, Subscription, SubscriptionRow};
