use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::VerificationStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: i64,
    pub(crate) email: String,
    pub(crate) full_name: String,
    pub(crate) is_active: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// One identity-verification attempt. A user accumulates rows over time; only
/// the most-recently-updated approved row drives expiry handling.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct VerificationRecord {
    pub(crate) id: i64,
    pub(crate) user_id: i64,
    pub(crate) status: VerificationStatus,
    pub(crate) expiry_date: Option<PrimitiveDateTime>,
    pub(crate) expiry_notification_sent_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}
