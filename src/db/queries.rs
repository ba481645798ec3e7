//! Postgres queries for the entity store

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{AppError, Result};
use crate::models::{
    Client, NewClient, NewPlan, NewService, NewSubscription, Plan, Service, Subscription,
    SubscriptionRow, User,
};
use crate::subscriptions::subscription_price;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Transaction attempts before a conflict is surfaced to the job
const MAX_TRANSACTION_ATTEMPTS: u32 = 3;

fn db_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Map constraint violations on insert/update to caller-facing errors
fn map_write_error(err: sqlx::Error) -> AppError {
    match db_code(&err).as_deref() {
        Some(CHECK_VIOLATION) => AppError::Validation(err.to_string()),
        Some(FOREIGN_KEY_VIOLATION) => {
            AppError::Validation(format!("referenced record does not exist: {}", err))
        }
        Some(UNIQUE_VIOLATION) => AppError::Conflict(err.to_string()),
        _ => AppError::Database(err),
    }
}

/// Map a restricted delete to a conflict
fn map_delete_error(err: sqlx::Error, entity: &str, id: i64) -> AppError {
    match db_code(&err).as_deref() {
        Some(FOREIGN_KEY_VIOLATION) => AppError::Conflict(format!(
            "{} {} is referenced by existing subscriptions",
            entity, id
        )),
        _ => AppError::Database(err),
    }
}

fn is_retryable(err: &AppError) -> bool {
    match err {
        AppError::Database(e) => matches!(
            db_code(e).as_deref(),
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
        ),
        _ => false,
    }
}

/// Insert a user account
pub async fn insert_user(pool: &PgPool, username: &str, email: &str) -> Result<User> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email)
        VALUES ($1, $2)
        RETURNING id, username, email
        "#,
    )
    .bind(username)
    .bind(email)
    .fetch_one(pool)
    .await
    .map_err(map_write_error)
}

/// Insert a client for an existing user
pub async fn insert_client(pool: &PgPool, client: &NewClient) -> Result<Client> {
    sqlx::query_as::<_, Client>(
        r#"
        INSERT INTO clients (user_id, company_name, company_full_address)
        VALUES ($1, $2, $3)
        RETURNING id, user_id, company_name, company_full_address
        "#,
    )
    .bind(client.user_id)
    .bind(&client.company_name)
    .bind(&client.company_full_address)
    .fetch_one(pool)
    .await
    .map_err(map_write_error)
}

pub async fn delete_client(pool: &PgPool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM clients WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| map_delete_error(e, "client", id))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub async fn insert_service(pool: &PgPool, service: &NewService) -> Result<Service> {
    sqlx::query_as::<_, Service>(
        r#"
        INSERT INTO services (name, full_price)
        VALUES ($1, $2)
        RETURNING id, name, full_price
        "#,
    )
    .bind(&service.name)
    .bind(service.full_price)
    .fetch_one(pool)
    .await
    .map_err(map_write_error)
}

pub async fn get_service(pool: &PgPool, id: i64) -> Result<Option<Service>> {
    let service = sqlx::query_as::<_, Service>(
        "SELECT id, name, full_price FROM services WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(service)
}

pub async fn update_service(pool: &PgPool, service: &Service) -> Result<()> {
    let result = sqlx::query("UPDATE services SET name = $2, full_price = $3 WHERE id = $1")
        .bind(service.id)
        .bind(&service.name)
        .bind(service.full_price)
        .execute(pool)
        .await
        .map_err(map_write_error)?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub async fn delete_service(pool: &PgPool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM services WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| map_delete_error(e, "service", id))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub async fn insert_plan(pool: &PgPool, plan: &NewPlan) -> Result<Plan> {
    sqlx::query_as::<_, Plan>(
        r#"
        INSERT INTO plans (plan_type, discount_percent)
        VALUES ($1, $2)
        RETURNING id, plan_type, discount_percent
        "#,
    )
    .bind(plan.plan_type)
    .bind(plan.discount_percent)
    .fetch_one(pool)
    .await
    .map_err(map_write_error)
}

pub async fn get_plan(pool: &PgPool, id: i64) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>(
        "SELECT id, plan_type, discount_percent FROM plans WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(plan)
}

pub async fn update_plan(pool: &PgPool, plan: &Plan) -> Result<()> {
    let result =
        sqlx::query("UPDATE plans SET plan_type = $2, discount_percent = $3 WHERE id = $1")
            .bind(plan.id)
            .bind(plan.plan_type)
            .bind(plan.discount_percent)
            .execute(pool)
            .await
            .map_err(map_write_error)?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub async fn delete_plan(pool: &PgPool, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM plans WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| map_delete_error(e, "plan", id))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub async fn insert_subscription(
    pool: &PgPool,
    subscription: &NewSubscription,
) -> Result<Subscription> {
    sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (client_id, service_id, plan_id)
        VALUES ($1, $2, $3)
        RETURNING id, client_id, service_id, plan_id, price, last_change_time
        "#,
    )
    .bind(subscription.client_id)
    .bind(subscription.service_id)
    .bind(subscription.plan_id)
    .fetch_one(pool)
    .await
    .map_err(map_write_error)
}

pub async fn get_subscription(pool: &PgPool, id: i64) -> Result<Option<Subscription>> {
    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, client_id, service_id, plan_id, price, last_change_time
        FROM subscriptions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(subscription)
}

pub async fn delete_subscription(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn subscription_ids_for_service(pool: &PgPool, service_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM subscriptions WHERE service_id = $1 ORDER BY id",
    )
    .bind(service_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

pub async fn subscription_ids_for_plan(pool: &PgPool, plan_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM subscriptions WHERE plan_id = $1 ORDER BY id",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Recompute a subscription's price, retrying the transaction on
/// serialization failures and deadlocks.
pub async fn recompute_price(pool: &PgPool, subscription_id: i64) -> Result<Option<i64>> {
    let mut attempt = 1;
    loop {
        match try_recompute_price(pool, subscription_id).await {
            Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS && is_retryable(&e) => {
                tracing::warn!(
                    subscription_id,
                    attempt,
                    error = %e,
                    "Price transaction conflicted, retrying"
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn try_recompute_price(pool: &PgPool, subscription_id: i64) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;

    let inputs: Option<(i64, i32)> = sqlx::query_as(
        r#"
        SELECT sv.full_price, p.discount_percent
        FROM subscriptions s
        JOIN services sv ON sv.id = s.service_id
        JOIN plans p ON p.id = s.plan_id
        WHERE s.id = $1
        FOR UPDATE OF s
        "#,
    )
    .bind(subscription_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((full_price, discount_percent)) = inputs else {
        tx.rollback().await?;
        return Ok(None);
    };

    let price = subscription_price(full_price, discount_percent);

    sqlx::query("UPDATE subscriptions SET price = $2 WHERE id = $1")
        .bind(subscription_id)
        .bind(price)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Some(price))
}

/// Single-statement update, atomic on its own
pub async fn touch_last_change_time(
    pool: &PgPool,
    subscription_id: i64,
    at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let stamped = sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        UPDATE subscriptions
        SET last_change_time = $2
        WHERE id = $1
        RETURNING last_change_time
        "#,
    )
    .bind(subscription_id)
    .bind(at)
    .fetch_optional(pool)
    .await?;

    Ok(stamped)
}

/// Get every subscription with its plan, client and user in one query
pub async fn list_subscriptions(pool: &PgPool) -> Result<Vec<SubscriptionRow>> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT
            s.id,
            s.plan_id,
            p.plan_type,
            p.discount_percent,
            s.price,
            s.last_change_time,
            c.company_name AS client_name,
            u.email
        FROM subscriptions s
        JOIN plans p ON p.id = s.plan_id
        JOIN clients c ON c.id = s.client_id
        JOIN users u ON u.id = c.user_id
        ORDER BY s.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn find_subscription_row(pool: &PgPool, id: i64) -> Result<Option<SubscriptionRow>> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT
            s.id,
            s.plan_id,
            p.plan_type,
            p.discount_percent,
            s.price,
            s.last_change_time,
            c.company_name AS client_name,
            u.email
        FROM subscriptions s
        JOIN plans p ON p.id = s.plan_id
        JOIN clients c ON c.id = s.client_id
        JOIN users u ON u.id = c.user_id
        WHERE s.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Sum of all subscription prices
pub async fn total_price(pool: &PgPool) -> Result<i64> {
    let total: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(price), 0)::BIGINT FROM subscriptions")
            .fetch_one(pool)
            .await?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanType;

    // These tests require Postgres at DATABASE_URL; sqlx creates a fresh
    // database per test and applies ./migrations.

    async fn seed(pool: &PgPool, full_price: i64, discount_percent: i32) -> Subscription {
        let user = insert_user(pool, "acme", "billing@acme.test").await.unwrap();
        let client = insert_client(
            pool,
            &NewClient {
                user_id: user.id,
                company_name: "Acme".to_string(),
                company_full_address: "1 Main St".to_string(),
            },
        )
        .await
        .unwrap();
        let service = insert_service(
            pool,
            &NewService {
                name: "Hosting".to_string(),
                full_price,
            },
        )
        .await
        .unwrap();
        let plan = insert_plan(
            pool,
            &NewPlan {
                plan_type: PlanType::Discount,
                discount_percent,
            },
        )
        .await
        .unwrap();
        insert_subscription(
            pool,
            &NewSubscription {
                client_id: client.id,
                service_id: service.id,
                plan_id: plan.id,
            },
        )
        .await
        .unwrap()
    }

    /// Make the next `failures` updates of `subscriptions` raise a
    /// serialization failure. The sequence survives the rollbacks.
    async fn inject_conflicts(pool: &PgPool, failures: i64) {
        sqlx::raw_sql(&format!(
            r#"
            CREATE SEQUENCE conflict_seq;
            CREATE FUNCTION raise_conflict() RETURNS trigger AS $$
            BEGIN
                IF nextval('conflict_seq') <= {failures} THEN
                    RAISE EXCEPTION 'injected conflict' USING ERRCODE = '40001';
                END IF;
                RETURN NEW;
            END
            $$ LANGUAGE plpgsql;
            CREATE TRIGGER subscriptions_conflict BEFORE UPDATE ON subscriptions
                FOR EACH ROW EXECUTE FUNCTION raise_conflict();
            "#
        ))
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres
    async fn test_recompute_price(pool: PgPool) {
        let subscription = seed(&pool, 200, 25).await;
        assert_eq!(subscription.price, 0);

        assert_eq!(recompute_price(&pool, subscription.id).await.unwrap(), Some(150));
        // Idempotent
        assert_eq!(recompute_price(&pool, subscription.id).await.unwrap(), Some(150));

        let rows = list_subscriptions(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 150);
        assert_eq!(rows[0].client_name, "Acme");
        assert_eq!(rows[0].plan_type, PlanType::Discount);
        assert_eq!(total_price(&pool).await.unwrap(), 150);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres
    async fn test_recompute_deleted_subscription_is_noop(pool: PgPool) {
        let subscription = seed(&pool, 200, 25).await;
        assert!(delete_subscription(&pool, subscription.id).await.unwrap());

        assert_eq!(recompute_price(&pool, subscription.id).await.unwrap(), None);
        let stamped = touch_last_change_time(&pool, subscription.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(stamped, None);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres
    async fn test_recompute_retries_serialization_failures(pool: PgPool) {
        let subscription = seed(&pool, 100, 10).await;
        inject_conflicts(&pool, 2).await;

        assert_eq!(recompute_price(&pool, subscription.id).await.unwrap(), Some(90));
        let stored = get_subscription(&pool, subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.price, 90);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres
    async fn test_recompute_gives_up_after_max_attempts(pool: PgPool) {
        let subscription = seed(&pool, 100, 10).await;
        inject_conflicts(&pool, i64::from(MAX_TRANSACTION_ATTEMPTS)).await;

        let err = recompute_price(&pool, subscription.id).await.unwrap_err();
        assert!(is_retryable(&err));
        let stored = get_subscription(&pool, subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.price, 0);
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres
    async fn test_referenced_rows_are_protected(pool: PgPool) {
        let subscription = seed(&pool, 100, 10).await;

        assert!(matches!(
            delete_service(&pool, subscription.service_id).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            delete_plan(&pool, subscription.plan_id).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            delete_client(&pool, subscription.client_id).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres
    async fn test_check_constraint_rejects_discount_over_100(pool: PgPool) {
        let subscription = seed(&pool, 100, 10).await;
        let plan = Plan {
            id: subscription.plan_id,
            plan_type: PlanType::Discount,
            discount_percent: 101,
        };

        assert!(matches!(
            update_plan(&pool, &plan).await,
            Err(AppError::Validation(_))
        ));
    }

    #[sqlx::test]
    #[ignore] // Requires Postgres
    async fn test_empty_total_is_zero(pool: PgPool) {
        assert_eq!(total_price(&pool).await.unwrap(), 0);
    }
}
