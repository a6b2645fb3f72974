use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "verificationstatus", rename_all = "snake_case")]
pub(crate) enum VerificationStatus {
    Created,
    Ready,
    Submitted,
    MustRetry,
    Approved,
    Denied,
}
