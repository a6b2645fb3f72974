pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod services;
pub(crate) mod tasks;

use crate::core::config::Settings;
use crate::core::telemetry;
use crate::services::expiry_mailer::SmtpMailer;
use crate::tasks::expiry::{ExpiryEmailConfig, PgVerificationStore, PopulateExpiryConfig};

/// Runs the verification-expiry notification email batch once and exits.
///
/// CLI overrides take precedence over the environment-driven settings. The
/// "no eligible records" path is a normal success, not an error.
pub async fn run_send_expiry_email(
    resend_days: Option<u32>,
    batch_size: Option<u32>,
    sleep_seconds: Option<u64>,
) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let config =
        ExpiryEmailConfig::from_settings(&settings, resend_days, batch_size, sleep_seconds);
    let store = PgVerificationStore::new(db_pool);
    let mailer = SmtpMailer::from_settings(&settings)?;

    let report = tasks::expiry::send_expiry_notifications(&store, &mailer, &config).await?;

    tracing::info!(
        batches = report.batches,
        notified = report.notified,
        resend_skipped = report.resend_skipped,
        send_failures = report.send_failures,
        "Verification expiry email run finished"
    );

    Ok(())
}

/// Backfills `expiry_date` for approved verification records that predate the
/// expiry-window rollout, then exits.
pub async fn run_populate_expiry_date(
    batch_size: Option<u32>,
    sleep_seconds: Option<u64>,
) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let config = PopulateExpiryConfig::from_settings(&settings, batch_size, sleep_seconds);
    let store = PgVerificationStore::new(db_pool);

    let report = tasks::expiry::populate_expiry_dates(&store, &config).await?;

    tracing::info!(
        batches = report.batches,
        backfilled = report.backfilled,
        "Verification expiry backfill run finished"
    );

    Ok(())
}
