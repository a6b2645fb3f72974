use anyhow::{Context, Result};
use time::Duration;

use crate::core::config::Settings;
use crate::core::time::primitive_now_utc;
use crate::tasks::expiry::VerificationStore;

#[derive(Debug, Clone)]
pub(crate) struct PopulateExpiryConfig {
    pub(crate) batch_size: u32,
    pub(crate) sleep_seconds: u64,
    pub(crate) days_good_for: u32,
}

impl PopulateExpiryConfig {
    pub(crate) fn from_settings(
        settings: &Settings,
        batch_size: Option<u32>,
        sleep_seconds: Option<u64>,
    ) -> Self {
        let expiry = settings.expiry();

        Self {
            batch_size: batch_size.unwrap_or(expiry.batch_size).max(1),
            sleep_seconds: sleep_seconds.unwrap_or(expiry.sleep_seconds),
            days_good_for: expiry.days_good_for,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PopulateRunReport {
    pub(crate) batches: u64,
    pub(crate) backfilled: u64,
}

/// Assigns an expiry window to approved records created before expiry dates
/// existed: per user, the most-recently-updated approved record without an
/// `expiry_date` gets `updated_at + days_good_for`. Older rows stay null.
pub(crate) async fn populate_expiry_dates<S: VerificationStore>(
    store: &S,
    config: &PopulateExpiryConfig,
) -> Result<PopulateRunReport> {
    let Some((min_user_id, max_user_id)) = store
        .missing_expiry_user_id_bounds()
        .await
        .context("Failed to fetch verification backfill bounds")?
    else {
        tracing::info!("No approved verification records awaiting expiry backfill");
        return Ok(PopulateRunReport::default());
    };

    let mut report = PopulateRunReport::default();
    let batch_size = i64::from(config.batch_size);
    let mut batch_start = min_user_id;
    let mut batch_stop = batch_start + batch_size;

    while batch_start <= max_user_id {
        let user_ids = store
            .missing_expiry_user_ids_in_window(batch_start, batch_stop)
            .await
            .context("Failed to fetch users awaiting expiry backfill")?;

        for user_id in user_ids {
            let Some(record) = store
                .latest_missing_expiry_for_user(user_id)
                .await
                .context("Failed to fetch most recent approved verification")?
            else {
                continue;
            };

            let expiry_date = record.updated_at + Duration::days(i64::from(config.days_good_for));
            store
                .set_expiry_date(record.id, expiry_date, primitive_now_utc())
                .await
                .context("Failed to set verification expiry date")?;

            metrics::counter!("verification_expiry_dates_backfilled_total").increment(1);
            report.backfilled += 1;
        }

        report.batches += 1;

        if batch_stop < max_user_id && config.sleep_seconds > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(config.sleep_seconds)).await;
        }

        batch_start = batch_stop;
        batch_stop += batch_size;
    }

    tracing::info!(
        backfilled = report.backfilled,
        "Populated expiry dates for approved verification records"
    );

    Ok(report)
}
