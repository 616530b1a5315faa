use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    clients::template::render_welcome_email,
    models::{event::NotificationEvent, settings::SmtpSettings, template::RenderedEmail},
};

/// Mail transport failure, classified for the consumer's retry decision.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;

    /// Non-destructive handshake with the transport. Never errors.
    async fn verify(&self) -> bool;

    /// Transport details reported by the health check.
    fn describe(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

pub struct SmtpMailDispatcher {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    settings: Arc<SmtpSettings>,
}

impl SmtpMailDispatcher {
    pub fn new(settings: SmtpSettings) -> anyhow::Result<Self> {
        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
        } else {
            let tls = TlsParameters::new(settings.host.clone())?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .tls(Tls::Opportunistic(tls))
        };

        let mut builder = builder
            .port(settings.port)
            .timeout(Some(settings.timeout));

        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }

        info!(
            host = %settings.host,
            port = settings.port,
            secure = settings.secure,
            "Email transporter initialized"
        );

        Ok(Self {
            transport: builder.build(),
            settings: Arc::new(settings),
        })
    }

    fn build_message(&self, email: &RenderedEmail) -> Result<Message, DeliveryError> {
        let from: Mailbox = format!("{} <{}>", self.settings.from_name, self.settings.from_email)
            .parse()
            .map_err(|e| DeliveryError::Permanent(format!("Invalid from address: {}", e)))?;

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError::Permanent(format!("Invalid recipient address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.body_text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.body_html.clone()),
                    ),
            )
            .map_err(|e| DeliveryError::Permanent(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl MailDispatcher for SmtpMailDispatcher {
    async fn send(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let rendered = render_welcome_email(event);
        let message = self.build_message(&rendered)?;

        debug!(user_id = %event.user_id, to = %rendered.to, "Sending welcome email");

        let response = match timeout(self.settings.timeout, self.transport.send(message)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_permanent() => {
                error!(to = %rendered.to, error = %e, "SMTP server rejected message");
                return Err(DeliveryError::Permanent(e.to_string()));
            }
            Ok(Err(e)) => {
                warn!(to = %rendered.to, error = %e, "SMTP send failed");
                return Err(DeliveryError::Transient(e.to_string()));
            }
            Err(_) => {
                warn!(to = %rendered.to, "SMTP send timed out");
                return Err(DeliveryError::Transient(format!(
                    "SMTP send timed out after {:?}",
                    self.settings.timeout
                )));
            }
        };

        let message_id = response.message().next().unwrap_or_default().to_string();

        info!(
            user_id = %event.user_id,
            to = %rendered.to,
            message_id = %message_id,
            "Welcome email sent"
        );

        Ok(())
    }

    async fn verify(&self) -> bool {
        match timeout(self.settings.timeout, self.transport.test_connection()).await {
            Ok(Ok(true)) => {
                debug!("SMTP connection verified");
                true
            }
            Ok(Ok(false)) => {
                warn!("SMTP server did not accept the connection test");
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, "SMTP connection verification failed");
                false
            }
            Err(_) => {
                warn!("SMTP connection verification timed out");
                false
            }
        }
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "service": "SMTP Email Service",
            "host": self.settings.host,
            "port": self.settings.port,
            "secure": self.settings.secure,
        })
    }
}
