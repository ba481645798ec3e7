//! Subscription pricing and the listing API.
//!
//! Prices are derived from the service's full price and the plan's discount
//! and kept current by background jobs. The listing reads the store directly
//! and the aggregate total through the cache.

pub mod calculators;
pub mod responses;
pub mod routes;
pub mod services;

// Re-export commonly used items
pub use calculators::{subscription_price, truncate_money};
pub use responses::{ListingResponse, PlanResponse, SubscriptionRecord};
pub use routes::router;
pub use services::ClientSignup;
