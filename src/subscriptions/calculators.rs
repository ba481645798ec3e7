//! Core pricing calculation functions.
//!
//! Pure functions for pricing math - no database access.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::MAX_DISCOUNT_PERCENT;

/// Round toward zero to whole currency units.
///
/// Subscription prices are stored as integers, so the fractional part left
/// by a percentage discount is dropped rather than rounded.
///
/// # Examples
/// ```
/// use rust_decimal_macros::dec;
/// use subscription_service::subscriptions::truncate_money;
///
/// assert_eq!(truncate_money(dec!(67.67)), dec!(67));
/// assert_eq!(truncate_money(dec!(49.5)), dec!(49));
/// ```
pub fn truncate_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::ToZero)
}

/// Discounted subscription price.
///
/// `full_price - full_price * discount_percent / 100`, computed exactly in
/// decimal and truncated toward zero. The discount is clamped to 0..=100 so a
/// row that bypassed validation can never produce a negative or inflated
/// price.
///
/// # Examples
/// ```
/// use subscription_service::subscriptions::subscription_price;
///
/// assert_eq!(subscription_price(100, 10), 90);
/// assert_eq!(subscription_price(101, 33), 67);
/// ```
pub fn subscription_price(full_price: i64, discount_percent: i32) -> i64 {
    let full = Decimal::from(full_price.max(0));
    let percent = Decimal::from(discount_percent.clamp(0, MAX_DISCOUNT_PERCENT));
    let discount = full * percent / Decimal::ONE_HUNDRED;

    truncate_money(full - discount).to_i64().unwrap_or(0)
}
