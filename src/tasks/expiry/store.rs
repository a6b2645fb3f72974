use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{User, VerificationRecord};
use crate::repositories;

/// Query primitives the expiry jobs need from the verification record store.
///
/// The production implementation is Postgres-backed; tests drive the jobs
/// through an in-memory implementation instead.
#[async_trait]
pub(crate) trait VerificationStore: Send + Sync {
    /// Lowest and highest user id with an approved record expired before
    /// `now`, or `None` when no such record exists.
    async fn expired_user_id_bounds(
        &self,
        now: PrimitiveDateTime,
    ) -> Result<Option<(i64, i64)>>;

    /// Distinct user ids with eligible records in `[batch_start, batch_stop)`.
    async fn expired_user_ids_in_window(
        &self,
        now: PrimitiveDateTime,
        batch_start: i64,
        batch_stop: i64,
    ) -> Result<Vec<i64>>;

    /// The user's most-recently-updated approved record expired before `now`.
    async fn latest_expired_for_user(
        &self,
        now: PrimitiveDateTime,
        user_id: i64,
    ) -> Result<Option<VerificationRecord>>;

    /// Stamps `expiry_notification_sent_at` after a successful dispatch.
    async fn record_notification_sent(
        &self,
        record_id: i64,
        sent_reference: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<()>;

    async fn missing_expiry_user_id_bounds(&self) -> Result<Option<(i64, i64)>>;

    async fn missing_expiry_user_ids_in_window(
        &self,
        batch_start: i64,
        batch_stop: i64,
    ) -> Result<Vec<i64>>;

    async fn latest_missing_expiry_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<VerificationRecord>>;

    async fn set_expiry_date(
        &self,
        record_id: i64,
        expiry_date: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<()>;

    async fn find_user(&self, user_id: i64) -> Result<Option<User>>;
}

pub(crate) struct PgVerificationStore {
    pool: PgPool,
}

impl PgVerificationStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationStore for PgVerificationStore {
    async fn expired_user_id_bounds(
        &self,
        now: PrimitiveDateTime,
    ) -> Result<Option<(i64, i64)>> {
        Ok(repositories::verifications::expired_user_id_bounds(&self.pool, now).await?)
    }

    async fn expired_user_ids_in_window(
        &self,
        now: PrimitiveDateTime,
        batch_start: i64,
        batch_stop: i64,
    ) -> Result<Vec<i64>> {
        Ok(repositories::verifications::expired_user_ids_in_window(
            &self.pool,
            now,
            batch_start,
            batch_stop,
        )
        .await?)
    }

    async fn latest_expired_for_user(
        &self,
        now: PrimitiveDateTime,
        user_id: i64,
    ) -> Result<Option<VerificationRecord>> {
        Ok(repositories::verifications::latest_expired_for_user(&self.pool, now, user_id).await?)
    }

    async fn record_notification_sent(
        &self,
        record_id: i64,
        sent_reference: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<()> {
        Ok(repositories::verifications::set_notification_sent(
            &self.pool,
            record_id,
            sent_reference,
            now,
        )
        .await?)
    }

    async fn missing_expiry_user_id_bounds(&self) -> Result<Option<(i64, i64)>> {
        Ok(repositories::verifications::missing_expiry_user_id_bounds(&self.pool).await?)
    }

    async fn missing_expiry_user_ids_in_window(
        &self,
        batch_start: i64,
        batch_stop: i64,
    ) -> Result<Vec<i64>> {
        Ok(repositories::verifications::missing_expiry_user_ids_in_window(
            &self.pool,
            batch_start,
            batch_stop,
        )
        .await?)
    }

    async fn latest_missing_expiry_for_user(
        &self,
        user_id: i64,
    ) -> Result<Option<VerificationRecord>> {
        Ok(repositories::verifications::latest_missing_expiry_for_user(&self.pool, user_id)
            .await?)
    }

    async fn set_expiry_date(
        &self,
        record_id: i64,
        expiry_date: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<()> {
        Ok(repositories::verifications::set_expiry_date(&self.pool, record_id, expiry_date, now)
            .await?)
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(repositories::users::find_by_id(&self.pool, user_id).await?)
    }
}
