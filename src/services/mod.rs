pub(crate) mod expiry_mailer;
