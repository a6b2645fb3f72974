pub(crate) mod users;
pub(crate) mod verifications;
