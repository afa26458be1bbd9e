use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::model::AlertMessage;
use crate::notify::error::DispatchError;
use crate::notify::registry::NotificationSender;

/// SMTP delivery via lettre
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn mailbox(raw: &str) -> Result<Mailbox, DispatchError> {
    raw.parse().map_err(|e| DispatchError::InvalidConfig(format!("email address {raw:?}: {e}")))
}

impl EmailSender {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        to: &[String],
        starttls: bool,
    ) -> Result<Self, DispatchError> {
        if to.is_empty() {
            return Err(DispatchError::InvalidConfig("email provider has no recipients".into()));
        }

        let mut builder = if starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
                .map_err(|e| DispatchError::InvalidConfig(format!("smtp host {smtp_host:?}: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: mailbox(from)?,
            to: to.iter().map(|addr| mailbox(addr)).collect::<Result<_, _>>()?,
        })
    }
}

/// Plain-text mail body
pub fn format_body(alert: &AlertMessage) -> String {
    let mut body = format!(
        "{headline}\n\n{body}\n\nSeverity: {severity}\nTime: {time}",
        headline = alert.headline(),
        body = alert.body,
        severity = alert.severity,
        time = alert.timestamp.to_rfc3339(),
    );
    if let Some(incident_id) = alert.incident_id {
        body.push_str(&format!("\nIncident: {incident_id}"));
    }
    if !alert.recipients.is_empty() {
        body.push_str(&format!("\nOn call: {}", alert.recipients.join(", ")));
    }
    body
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(&self, alert: &AlertMessage) -> Result<(), DispatchError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(format!("[uppe] {}", alert.headline()));
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(format_body(alert))
            .map_err(|e| DispatchError::Smtp(e.to_string()))?;

        self.transport.send(email).await.map_err(|e| DispatchError::Smtp(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertKind, Severity};

    #[test]
    fn body_includes_incident_and_on_call() {
        let mut alert = AlertMessage::new(AlertKind::Trigger, Severity::High, "api is down", "HTTP 503");
        let incident = uuid::Uuid::new_v4();
        alert.incident_id = Some(incident);
        alert.recipients = vec!["alice".into()];

        let body = format_body(&alert);
        assert!(body.starts_with("[DOWN] [high] api is down\n\nHTTP 503"));
        assert!(body.contains(&format!("Incident: {incident}")));
        assert!(body.ends_with("On call: alice"));
    }

    #[tokio::test]
    async fn rejects_bad_addresses() {
        let err = EmailSender::new("smtp.example.com", 587, None, None, "not-an-address", &["ops@example.com".into()], true);
        assert!(matches!(err, Err(DispatchError::InvalidConfig(_))));

        let none = EmailSender::new("smtp.example.com", 587, None, None, "uppe@example.com", &[], true);
        assert!(none.is_err());
    }
}
