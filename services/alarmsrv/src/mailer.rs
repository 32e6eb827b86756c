//! Outgoing notification email

use crate::error::{AlarmError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// One email: a plain body, an optional HTML alternative, one or more recipients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
    pub html: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

impl EmailMessage {
    /// Same message with the HTML part dropped
    pub fn plain_only(&self) -> Self {
        Self {
            html: None,
            ..self.clone()
        }
    }

    /// Reject messages no transport could deliver
    pub fn check_deliverable(&self) -> Result<()> {
        if self.to.is_empty() {
            return Err(AlarmError::mail(format!("'{}' has no recipients", self.subject)));
        }
        if let Some(bad) = self.to.iter().find(|addr| !is_address(addr)) {
            return Err(AlarmError::mail(format!("invalid recipient address '{}'", bad)));
        }
        Ok(())
    }
}

fn is_address(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !addr.chars().any(char::is_whitespace)
        },
        None => false,
    }
}

/// Email transport
pub trait EmailSender: Send + Sync + 'static {
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Writes each message to the log and keeps an outbox
#[derive(Debug, Default)]
pub struct LogMailer {
    outbox: Mutex<Vec<EmailMessage>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, in send order
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.outbox.lock().clone()
    }

    pub fn clear(&self) {
        self.outbox.lock().clear();
    }
}

impl EmailSender for LogMailer {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        message.check_deliverable()?;
        info!(
            subject = %message.subject,
            from = %message.from,
            to = %message.to.join(", "),
            html = message.html.is_some(),
            "Email sent"
        );
        self.outbox.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_log_mailer_records_outbox() {
        let mailer = LogMailer::new();
        let message = EmailMessage {
            subject: "Event Alert: DV-1".to_string(),
            body: "Low food".to_string(),
            html: Some("<b>Low food</b>".to_string()),
            from: "noreply@localhost.com".to_string(),
            to: vec!["ana@example.com".to_string()],
        };

        mailer.send(&message).unwrap();
        mailer.send(&message.plain_only()).unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].html.is_some());
        assert!(sent[1].html.is_none());
        assert_eq!(sent[1].body, "Low food");

        mailer.clear();
        assert!(mailer.sent().is_empty());
    }

    #[test]
    fn test_log_mailer_rejects_undeliverable() {
        let mailer = LogMailer::new();
        let mut message = EmailMessage {
            subject: "Event Alert: DV-1".to_string(),
            body: "Low food".to_string(),
            html: None,
            from: "noreply@localhost.com".to_string(),
            to: Vec::new(),
        };

        assert!(matches!(mailer.send(&message), Err(AlarmError::Mail(_))));

        message.to = vec!["ana@example.com".to_string(), "ben at example.com".to_string()];
        let err = mailer.send(&message).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Mail error: invalid recipient address 'ben at example.com'"
        );
        assert!(mailer.sent().is_empty());
    }
}
