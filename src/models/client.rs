//! Client and user identity models

use serde::Serialize;
use sqlx::FromRow;

/// User account from the `users` table.
///
/// Accounts are owned by the authentication layer; this crate only reads the
/// email for listings and creates rows when seeding.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// Client company, one per user
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Client {
    pub id: i64,
    pub user_id: i64,
    pub company_name: String,
    pub company_full_address: String,
}

#[derive(Debug, Clone)]
pub struct NewClient {
    pub user_id: i64,
    pub company_name: String,
    pub company_full_address: String,
}
