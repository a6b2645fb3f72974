use anyhow::{Context, Result};
use time::{Duration, PrimitiveDateTime};

use crate::core::config::Settings;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::services::expiry_mailer::{ExpiryEmail, ExpiryEmailVars, Mailer};
use crate::tasks::expiry::VerificationStore;

#[derive(Debug, Clone)]
pub(crate) struct ExpiryEmailConfig {
    pub(crate) resend_days: u32,
    pub(crate) batch_size: u32,
    pub(crate) sleep_seconds: u64,
    pub(crate) platform_name: String,
    pub(crate) reverification_link: String,
    pub(crate) support_link: String,
}

impl ExpiryEmailConfig {
    pub(crate) fn from_settings(
        settings: &Settings,
        resend_days: Option<u32>,
        batch_size: Option<u32>,
        sleep_seconds: Option<u64>,
    ) -> Self {
        let expiry = settings.expiry();
        let platform = settings.platform();

        Self {
            resend_days: resend_days.unwrap_or(expiry.resend_days),
            batch_size: batch_size.unwrap_or(expiry.batch_size).max(1),
            sleep_seconds: sleep_seconds.unwrap_or(expiry.sleep_seconds),
            platform_name: platform.platform_name.clone(),
            reverification_link: platform.reverification_link(),
            support_link: platform.support_link.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExpiryRunReport {
    pub(crate) batches: u64,
    pub(crate) notified: u64,
    pub(crate) resend_skipped: u64,
    pub(crate) send_failures: u64,
}

/// Walks approved-and-expired verification records in contiguous user-id
/// windows and emails each affected learner at most once per cooldown.
///
/// A failed send is logged and skipped; the record keeps a null
/// `expiry_notification_sent_at` so the learner is picked up again on the
/// next run. An empty eligible set is a normal, successful outcome.
pub(crate) async fn send_expiry_notifications<S: VerificationStore, M: Mailer>(
    store: &S,
    mailer: &M,
    config: &ExpiryEmailConfig,
) -> Result<ExpiryRunReport> {
    let now = primitive_now_utc();
    let resend_threshold = now - Duration::days(i64::from(config.resend_days));

    let Some((min_user_id, max_user_id)) = store
        .expired_user_id_bounds(now)
        .await
        .context("Failed to fetch expired verification bounds")?
    else {
        tracing::info!("No approved expired verification records found");
        return Ok(ExpiryRunReport::default());
    };

    let mut report = ExpiryRunReport::default();
    let batch_size = i64::from(config.batch_size);
    let mut batch_start = min_user_id;
    let mut batch_stop = batch_start + batch_size;

    while batch_start <= max_user_id {
        let user_ids = store
            .expired_user_ids_in_window(now, batch_start, batch_stop)
            .await
            .context("Failed to fetch users with expired verifications")?;

        for user_id in user_ids {
            let Some(record) = store
                .latest_expired_for_user(now, user_id)
                .await
                .context("Failed to fetch most recent expired verification")?
            else {
                continue;
            };

            if !due_for_notification(record.expiry_notification_sent_at, resend_threshold) {
                report.resend_skipped += 1;
                continue;
            }

            // Only empty result sets and per-user transport failures are
            // tolerated; a verification record without its user row is fatal.
            let user = store
                .find_user(user_id)
                .await
                .context("Failed to fetch user")?
                .with_context(|| {
                    format!("User {user_id} missing for expired verification record")
                })?;

            let email = ExpiryEmail::verification_expired(
                &user.email,
                ExpiryEmailVars {
                    platform_name: &config.platform_name,
                    reverification_link: &config.reverification_link,
                    support_link: &config.support_link,
                    full_name: &user.full_name,
                },
            );

            match mailer.send(&email).await {
                Ok(()) => {
                    // The stored value is the resend reference, one cooldown
                    // ahead of the send time, matching the long-standing
                    // stamping behavior of this job.
                    let sent_reference = now + Duration::days(i64::from(config.resend_days));
                    store
                        .record_notification_sent(record.id, sent_reference, now)
                        .await
                        .context("Failed to record expiry notification timestamp")?;

                    tracing::debug!(
                        user_id,
                        record_id = record.id,
                        sent_reference = %format_primitive(sent_reference),
                        "Sent verification expiry email"
                    );
                    metrics::counter!("verification_expiry_emails_sent_total").increment(1);
                    report.notified += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        user_id,
                        error = %err,
                        "Failure in sending verification expiry email"
                    );
                    metrics::counter!("verification_expiry_email_failures_total").increment(1);
                    report.send_failures += 1;
                }
            }
        }

        report.batches += 1;

        if batch_stop < max_user_id && config.sleep_seconds > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(config.sleep_seconds)).await;
        }

        batch_start = batch_stop;
        batch_stop += batch_size;
    }

    tracing::info!(
        notified = report.notified,
        resend_skipped = report.resend_skipped,
        send_failures = report.send_failures,
        "Processed expired verification records"
    );

    Ok(report)
}

/// A learner is due when never notified, or when the stored resend reference
/// predates `now - resend_days`.
fn due_for_notification(
    sent_at: Option<PrimitiveDateTime>,
    resend_threshold: PrimitiveDateTime,
) -> bool {
    match sent_at {
        None => true,
        Some(sent_at) => sent_at < resend_threshold,
    }
}
