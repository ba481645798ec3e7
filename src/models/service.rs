//! Service model

use serde::Serialize;
use sqlx::FromRow;

use crate::error::{AppError, Result};

/// Service from the `services` table
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub full_price: i64,
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub full_price: i64,
}

/// Reject negative prices before they reach storage
pub fn validate_full_price(full_price: i64) -> Result<()> {
    if full_price < 0 {
        return Err(AppError::Validation(format!(
            "full_price must be non-negative, got {}",
            full_price
        )));
    }
    Ok(())
}

impl Service {
    pub fn validate(&self) -> Result<()> {
        validate_full_price(self.full_price)
    }
}

impl NewService {
    pub fn validate(&self) -> Result<()> {
        validate_full_price(self.full_price)
    }
}
