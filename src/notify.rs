use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::{
    config::{MailConfig, SmtpConfig},
    users::repo_types::User,
};

/// Outgoing user notifications for the auth flows.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the signed link that verifies `user`'s email address.
    async fn send_verification_link(&self, user: &User, url: &str) -> anyhow::Result<()>;
    /// Tell `user` their address is now verified.
    async fn email_verified(&self, user: &User) -> anyhow::Result<()>;
}

pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Box<dyn Notifier>> {
    Ok(match &cfg.smtp {
        Some(smtp) => Box::new(SmtpNotifier::new(smtp, &cfg.from)?),
        None => Box::new(LogNotifier),
    })
}

/// Writes notifications to the log. Default for development.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification_link(&self, user: &User, url: &str) -> anyhow::Result<()> {
        info!(user_id = %user.id, email = %user.email, %url, "verification link");
        Ok(())
    }

    async fn email_verified(&self, user: &User) -> anyhow::Result<()> {
        info!(user_id = %user.id, email = %user.email, "email verified");
        Ok(())
    }
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(cfg: &SmtpConfig, from: &str) -> anyhow::Result<Self> {
        let mut builder = if cfg.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                .with_context(|| format!("smtp relay {}", cfg.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
        };
        builder = builder.port(cfg.port);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.parse().context("parse MAIL_FROM")?,
        })
    }

    async fn send(&self, user: &User, subject: &str, body: String) -> anyhow::Result<()> {
        let address: Address = user
            .email
            .parse()
            .with_context(|| format!("parse recipient {}", user.email))?;
        let to = Mailbox::new(Some(user.username.clone()), address);
        let msg = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .context("build message")?;
        self.transport.send(msg).await.context("smtp send")?;
        info!(user_id = %user.id, subject, "mail sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_verification_link(&self, user: &User, url: &str) -> anyhow::Result<()> {
        let body = format!(
            "Hello {},\n\n\
             Please click the link below to verify your email address.\n\n\
             {}\n\n\
             If you did not create an account, no further action is required.\n",
            user.username, url
        );
        self.send(user, "Verify Email Address", body).await
    }

    async fn email_verified(&self, user: &User) -> anyhow::Result<()> {
        let body = format!(
            "Hello {},\n\nYour email address has been verified.\n",
            user.username
        );
        self.send(user, "Email Verified", body).await
    }
}
