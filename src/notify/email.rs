//! SMTP email sink

use async_trait::async_trait;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Mailbox, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, instrument};

use crate::config::{ResolvedEmailConfig, SmtpConfig};

use super::error::DeliveryError;
use super::event::{NotificationEvent, Severity};
use super::Sink;

pub struct EmailSink {
    app_name: String,
    subject: Option<String>,
    sender: Mailbox,
    receivers: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSink {
    pub fn new(app_name: impl Into<String>, config: &ResolvedEmailConfig) -> Result<Self, DeliveryError> {
        Ok(Self {
            app_name: app_name.into(),
            subject: config.subject.clone(),
            sender: config.sender.clone(),
            receivers: config.receivers.clone(),
            transport: build_transport(&config.smtp)?,
        })
    }

    fn subject_for(&self, event: &NotificationEvent) -> String {
        match &self.subject {
            Some(subject) => format!("[{}] {}", event.severity.label(), subject),
            None => format!(
                "[{}] {}: Message from channel {}",
                event.severity.label(),
                self.app_name,
                event.channel
            ),
        }
    }

    fn build_message(&self, event: &NotificationEvent) -> Result<Message, DeliveryError> {
        // recipients travel as Bcc so the visible header stays undisclosed
        let builder = self
            .receivers
            .iter()
            .cloned()
            .fold(Message::builder().from(self.sender.clone()), |builder, to| {
                builder.bcc(to)
            });

        let body = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .header(ContentTransferEncoding::Base64)
            .body(event.message.clone());

        builder
            .subject(self.subject_for(event))
            .singlepart(body)
            .map_err(|e| DeliveryError::Email(e.to_string()))
    }
}

fn build_transport(smtp: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
    let builder = if smtp.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
            .map_err(|e| DeliveryError::Email(e.to_string()))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
    };
    let mut builder = builder.port(smtp.port);

    if !smtp.username.is_empty() {
        builder = builder
            .credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ))
            .authentication(vec![Mechanism::Plain]);
    }

    Ok(builder.build())
}

#[async_trait]
impl Sink for EmailSink {
    fn name(&self) -> &str {
        "email"
    }

    #[instrument(skip_all, fields(channel = %event.channel))]
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        if event.severity == Severity::Debug {
            return Ok(());
        }

        let message = self.build_message(event)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Email(e.to_string()))?;
        debug!("email notification sent to {} receiver(s)", self.receivers.len());
        Ok(())
    }
}
