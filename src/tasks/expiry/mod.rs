mod notify;
mod populate;
mod store;

#[cfg(test)]
mod tests;

pub(crate) use notify::{send_expiry_notifications, ExpiryEmailConfig};
pub(crate) use populate::{populate_expiry_dates, PopulateExpiryConfig};
pub(crate) use store::{PgVerificationStore, VerificationStore};
