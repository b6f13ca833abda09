//! Completion notifications.
//!
//! Sent once a run reaches NOTIFY. Failures are reported to the caller as
//! `ProvisionError::Notification` and never change the run's outcome.

use crate::config::{NotifyMode, NotifySection};
use crate::errors::ProvisionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, Message, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Admin login of a machine the run built. The email is the only place the
/// password is handed back to the caller.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AdminLogin {
    pub username: String,
    #[serde(skip)]
    pub password: String,
}

impl std::fmt::Debug for AdminLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminLogin")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// What a completion notification says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionNotice {
    pub blueprint: String,
    pub target_name: String,
    pub resource_group: String,
    pub location: String,
    pub recipients: Vec<String>,
    pub access_urls: Vec<String>,
    pub login: Option<AdminLogin>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionNotice {
    pub fn subject(&self) -> String {
        format!("Provisioning of '{}' completed", self.target_name)
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "{} '{}' has been provisioned.\n\n\
             Resource group: {}\n\
             Location: {}\n\
             Completed at: {}\n",
            self.blueprint,
            self.target_name,
            self.resource_group,
            self.location,
            self.completed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        if !self.access_urls.is_empty() {
            body.push_str("\nAccess:\n");
            for url in &self.access_urls {
                body.push_str(&format!("  {}\n", url));
            }
        }
        if let Some(login) = &self.login {
            body.push_str(&format!(
                "\nLogin:\n  Username: {}\n  Password: {}\n",
                login.username, login.password
            ));
        }
        body.push_str(
            "\nThe setup script keeps running on the machine and reports its own progress \
             to the status webhook.\n",
        );
        body
    }
}

/// Split a comma-separated recipient list, dropping blanks.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), ProvisionError>;
}

/// Logs the notification instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), ProvisionError> {
        info!(
            to = %notice.recipients.join(", "),
            subject = %notice.subject(),
            urls = ?notice.access_urls,
            "Completion notification (log mode)"
        );
        Ok(())
    }
}

/// SMTP relay settings, read from `SMTP_*` and `SENDER_EMAIL`.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl SmtpSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set for smtp notifications", name))
        };
        let port = match lookup("SMTP_PORT") {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .with_context(|| format!("SMTP_PORT '{}' is not a valid port", p))?,
            None => 587,
        };
        Ok(Self {
            host: required("SMTP_HOST")?,
            port,
            username: required("SMTP_USER")?,
            password: required("SMTP_PASS")?,
            sender: required("SENDER_EMAIL")?,
        })
    }
}

pub struct SmtpNotifier {
    transport: Arc<SmtpTransport>,
    sender: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let sender: Mailbox = settings
            .sender
            .parse()
            .with_context(|| format!("Invalid sender address '{}'", settings.sender))?;
        let transport = SmtpTransport::relay(&settings.host)
            .with_context(|| format!("Invalid SMTP relay '{}'", settings.host))?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();
        info!(host = %settings.host, port = settings.port, "Configured SMTP transport");
        Ok(Self {
            transport: Arc::new(transport),
            sender,
        })
    }

    fn build_message(&self, notice: &CompletionNotice) -> Result<Message, ProvisionError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(notice.subject())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &notice.recipients {
            let mailbox: Mailbox = recipient.parse().map_err(|e| {
                ProvisionError::Notification(format!("Invalid recipient '{}': {}", recipient, e))
            })?;
            builder = builder.to(mailbox);
        }
        builder
            .body(notice.body())
            .map_err(|e| ProvisionError::Notification(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), ProvisionError> {
        if notice.recipients.is_empty() {
            return Ok(());
        }
        let message = self.build_message(notice)?;
        let transport = self.transport.clone();

        // SmtpTransport is blocking
        let response = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| ProvisionError::Notification(format!("Email task failed: {}", e)))?
            .map_err(|e| ProvisionError::Notification(format!("Failed to send email: {}", e)))?;

        info!(
            to = %notice.recipients.join(", "),
            code = %response.code(),
            "Completion email sent"
        );
        Ok(())
    }
}

/// Build the notifier selected by `[notify]`.
pub fn from_config(section: &NotifySection) -> Result<Arc<dyn Notifier>> {
    match section.mode {
        NotifyMode::Log => Ok(Arc::new(LogNotifier)),
        NotifyMode::Smtp => Ok(Arc::new(SmtpNotifier::new(&SmtpSettings::from_env()?)?)),
    }
}

/// Keeps every notice; optionally fails each call. For tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<CompletionNotice>>,
    fail_with: Option<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    pub fn sent(&self) -> Vec<CompletionNotice> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), ProvisionError> {
        if let Some(msg) = &self.fail_with {
            return Err(ProvisionError::Notification(msg.clone()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notice.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn notice(recipients: &[&str]) -> CompletionNotice {
        CompletionNotice {
            blueprint: "app-vm".into(),
            target_name: "web01".into(),
            resource_group: "rg".into(),
            location: "westeurope".into(),
            recipients: recipients.iter().map(|s| s.to_string()).collect(),
            access_urls: vec!["https://web01.example.com".into()],
            login: Some(AdminLogin {
                username: "azureuser".into(),
                password: "Sf!0123456789abcdefZ9".into(),
            }),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        assert_eq!(
            parse_recipients(" a@example.com, ,b@example.com,"),
            vec!["a@example.com", "b@example.com"]
        );
        assert!(parse_recipients("").is_empty());
    }

    #[test]
    fn subject_and_body_mention_target_and_urls() {
        let n = notice(&["ops@example.com"]);
        assert_eq!(n.subject(), "Provisioning of 'web01' completed");
        let body = n.body();
        assert!(body.contains("app-vm 'web01'"));
        assert!(body.contains("https://web01.example.com"));
        assert!(body.contains("Username: azureuser"));
        assert!(body.contains("Password: Sf!0123456789abcdefZ9"));
    }

    #[test]
    fn password_stays_out_of_logs_and_json() {
        let n = notice(&["ops@example.com"]);
        assert!(!format!("{:?}", n).contains("Sf!0123456789abcdefZ9"));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["login"]["username"], "azureuser");
        assert!(json["login"].get("password").is_none());
    }

    #[test]
    fn smtp_settings_default_port_and_missing_values() {
        let vars: HashMap<&str, &str> = [
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USER", "mailer"),
            ("SMTP_PASS", "pw"),
            ("SENDER_EMAIL", "noreply@example.com"),
        ]
        .into_iter()
        .collect();
        let settings =
            SmtpSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.port, 587);
        assert!(!format!("{:?}", settings).contains("pw"));

        let err = SmtpSettings::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("SMTP_HOST"));
    }

    #[test]
    fn invalid_recipient_is_notification_error() {
        let notifier = SmtpNotifier::new(&SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: "u".into(),
            password: "p".into(),
            sender: "noreply@example.com".into(),
        })
        .unwrap();
        let err = notifier.build_message(&notice(&["not an address"])).unwrap_err();
        assert!(matches!(err, ProvisionError::Notification(_)));
        assert!(notifier.build_message(&notice(&["ops@example.com"])).is_ok());
    }

    #[tokio::test]
    async fn recording_notifier_records_or_fails() {
        let ok = RecordingNotifier::new();
        ok.notify(&notice(&["a@example.com"])).await.unwrap();
        assert_eq!(ok.sent().len(), 1);

        let bad = RecordingNotifier::failing("relay down");
        assert!(bad.notify(&notice(&["a@example.com"])).await.is_err());
        assert!(bad.sent().is_empty());
    }
}
