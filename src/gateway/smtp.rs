//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::gateway::{Channel, Delivery, Sender};

/// SMTP settings, loaded by `OutreachConfig`.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// Sends email deliveries over SMTP. Other channels are not delivered.
pub struct SmtpSender {
    config: SmtpConfig,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build and send one message (blocking; run in `spawn_blocking`).
    fn send_email(config: &SmtpConfig, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| format!("Invalid from address: {e}"))?,
            )
            .to(to.parse().map_err(|e| format!("Invalid to address: {e}"))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| format!("Failed to build email: {e}"))?;

        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| format!("SMTP relay error: {e}"))?
            .port(config.port)
            .credentials(creds)
            .build();

        transport
            .send(&email)
            .map_err(|e| format!("SMTP send failed: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(&self, delivery: &Delivery) -> bool {
        let to = match &delivery.channel {
            Channel::Email(addr) => addr.clone(),
            other => {
                warn!(channel = %other, "SMTP sender cannot deliver to this channel");
                return false;
            }
        };

        let config = self.config.clone();
        let subject = delivery.subject.clone();
        let body = delivery.body.clone();
        let recipient = to.clone();
        let result =
            tokio::task::spawn_blocking(move || Self::send_email(&config, &recipient, &subject, &body))
                .await;

        match result {
            Ok(Ok(())) => {
                info!(to = %to, "Email sent");
                true
            }
            Ok(Err(reason)) => {
                warn!(to = %to, error = %reason, "Email not sent");
                false
            }
            Err(e) => {
                warn!(to = %to, error = %e, "Email task failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "bot@example.com".into(),
            password: SecretString::from("hunter2"),
            from_address: "bot@example.com".into(),
        }
    }

    #[tokio::test]
    async fn direct_messages_are_not_delivered() {
        let sender = SmtpSender::new(config());
        let delivery = Delivery {
            channel: Channel::DirectMessage("@ada".into()),
            subject: String::new(),
            body: "hi".into(),
        };
        assert!(!sender.send(&delivery).await);
    }

    #[test]
    fn invalid_recipient_is_rejected_before_connecting() {
        let err = SmtpSender::send_email(&config(), "not an address", "Hi", "Body").unwrap_err();
        assert!(err.contains("Invalid to address"), "{err}");
    }

    #[test]
    fn password_is_not_debug_printed() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("hunter2"));
    }
}
