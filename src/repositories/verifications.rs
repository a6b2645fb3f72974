use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::VerificationRecord;
use crate::db::types::VerificationStatus;

pub(crate) const COLUMNS: &str = "\
    id, user_id, status, expiry_date, expiry_notification_sent_at, created_at, updated_at";

/// Lowest and highest user id among approved records whose expiry is already
/// in the past. `None` when the eligible set is empty.
pub(crate) async fn expired_user_id_bounds(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Option<(i64, i64)>, sqlx::Error> {
    let (min, max): (Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT MIN(user_id), MAX(user_id) FROM verification_records \
         WHERE status = $1 AND expiry_date < $2",
    )
    .bind(VerificationStatus::Approved)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(min.zip(max))
}

pub(crate) async fn expired_user_ids_in_window(
    pool: &PgPool,
    now: PrimitiveDateTime,
    batch_start: i64,
    batch_stop: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM verification_records \
         WHERE status = $1 AND expiry_date < $2 AND user_id >= $3 AND user_id < $4 \
         ORDER BY user_id",
    )
    .bind(VerificationStatus::Approved)
    .bind(now)
    .bind(batch_start)
    .bind(batch_stop)
    .fetch_all(pool)
    .await
}

pub(crate) async fn latest_expired_for_user(
    pool: &PgPool,
    now: PrimitiveDateTime,
    user_id: i64,
) -> Result<Option<VerificationRecord>, sqlx::Error> {
    sqlx::query_as::<_, VerificationRecord>(&format!(
        "SELECT {COLUMNS} FROM verification_records \
         WHERE user_id = $1 AND status = $2 AND expiry_date < $3 \
         ORDER BY updated_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .bind(VerificationStatus::Approved)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn set_notification_sent(
    pool: &PgPool,
    id: i64,
    sent_reference: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE verification_records \
         SET expiry_notification_sent_at = $2, updated_at = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(sent_reference)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Bounds over approved records that never had an expiry window assigned.
pub(crate) async fn missing_expiry_user_id_bounds(
    pool: &PgPool,
) -> Result<Option<(i64, i64)>, sqlx::Error> {
    let (min, max): (Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT MIN(user_id), MAX(user_id) FROM verification_records \
         WHERE status = $1 AND expiry_date IS NULL",
    )
    .bind(VerificationStatus::Approved)
    .fetch_one(pool)
    .await?;

    Ok(min.zip(max))
}

pub(crate) async fn missing_expiry_user_ids_in_window(
    pool: &PgPool,
    batch_start: i64,
    batch_stop: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM verification_records \
         WHERE status = $1 AND expiry_date IS NULL AND user_id >= $2 AND user_id < $3 \
         ORDER BY user_id",
    )
    .bind(VerificationStatus::Approved)
    .bind(batch_start)
    .bind(batch_stop)
    .fetch_all(pool)
    .await
}

pub(crate) async fn latest_missing_expiry_for_user(
    pool: &PgPool,
    user_id: i64,
) -> Result<Option<VerificationRecord>, sqlx::Error> {
    sqlx::query_as::<_, VerificationRecord>(&format!(
        "SELECT {COLUMNS} FROM verification_records \
         WHERE user_id = $1 AND status = $2 AND expiry_date IS NULL \
         ORDER BY updated_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .bind(VerificationStatus::Approved)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn set_expiry_date(
    pool: &PgPool,
    id: i64,
    expiry_date: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE verification_records SET expiry_date = $2, updated_at = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(expiry_date)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
