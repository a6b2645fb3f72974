use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::core::config::Settings;

#[derive(Debug, Error)]
pub(crate) enum MailerError {
    #[error("smtp transport error: {0}")]
    Transport(String),

    #[error("address error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("message build error: {0}")]
    Build(String),
}

#[derive(Debug, Clone)]
pub(crate) struct ExpiryEmail {
    pub(crate) to: String,
    pub(crate) subject: String,
    pub(crate) body: String,
}

pub(crate) struct ExpiryEmailVars<'a> {
    pub(crate) platform_name: &'a str,
    pub(crate) reverification_link: &'a str,
    pub(crate) support_link: &'a str,
    pub(crate) full_name: &'a str,
}

impl ExpiryEmail {
    /// Renders the "your verification has expired" message for one learner.
    pub(crate) fn verification_expired(to: &str, vars: ExpiryEmailVars<'_>) -> Self {
        let subject =
            format!("Your {} Verification has Expired", vars.platform_name);

        let body = format!(
            r#"{full_name},

Your {platform_name} identity verification has expired and no longer grants
access to verified course content.

To stay verified, complete the verification process again:

{reverification_link}

If you have questions, the help center covers identity verification:

{support_link}

Thank you,
The {platform_name} Team
"#,
            full_name = vars.full_name,
            platform_name = vars.platform_name,
            reverification_link = vars.reverification_link,
            support_link = vars.support_link,
        );

        Self { to: to.to_string(), subject, body }
    }
}

#[async_trait]
pub(crate) trait Mailer: Send + Sync {
    async fn send(&self, email: &ExpiryEmail) -> Result<(), MailerError>;
}

pub(crate) struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let smtp = settings.smtp();

        let mut builder = if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        builder = builder.port(smtp.port);

        if !smtp.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(smtp.username.clone(), smtp.password.clone()));
        }

        let from: Mailbox = smtp.from_address.parse()?;

        Ok(Self { transport: builder.build(), from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &ExpiryEmail) -> Result<(), MailerError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .body(email.body.clone())
            .map_err(|err| MailerError::Build(err.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|err| MailerError::Transport(err.to_string()))?;

        Ok(())
    }
}
