//! Plan model and discount validation

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, Result};

pub const MAX_DISCOUNT_PERCENT: i32 = 100;

/// Plan tier, stored as the Postgres `plan_type` enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "plan_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Full,
    Student,
    Discount,
}

/// Plan from the `plans` table
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Plan {
    pub id: i64,
    pub plan_type: PlanType,
    pub discount_percent: i32,
}

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub plan_type: PlanType,
    pub discount_percent: i32,
}

/// Discount must stay within 0..=100 percent
pub fn validate_discount_percent(discount_percent: i32) -> Result<()> {
    if !(0..=MAX_DISCOUNT_PERCENT).contains(&discount_percent) {
        return Err(AppError::Validation(format!(
            "discount_percent must be between 0 and {}, got {}",
            MAX_DISCOUNT_PERCENT, discount_percent
        )));
    }
    Ok(())
}

impl Plan {
    pub fn validate(&self) -> Result<()> {
        validate_discount_percent(self.discount_percent)
    }
}

impl NewPlan {
    pub fn validate(&self) -> Result<()> {
        validate_discount_percent(self.discount_percent)
    }
}
