//! Outbound email seam for the confirm flow.
//!
//! Delivery is an external collaborator; the auth core only needs "send
//! this confirm URL to this address". The default implementation logs the
//! mail through tracing, which is what small single-school deployments run
//! with; the admin reads the URL off the server log. An SMTP-backed
//! implementation plugs in behind the same trait.

use async_trait::async_trait;
use tracing::info;

#[derive(Debug)]
pub struct MailerError(pub String);

impl std::fmt::Display for MailerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to send mail: {}", self.0)
    }
}

impl std::error::Error for MailerError {}

/// Channel for the password-set confirmation email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_password_confirmation(
        &self,
        to: &str,
        name: &str,
        confirm_url: &str,
    ) -> Result<(), MailerError>;
}

/// Logs the confirmation URL instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_confirmation(
        &self,
        to: &str,
        name: &str,
        confirm_url: &str,
    ) -> Result<(), MailerError> {
        info!(to = %to, name = %name, url = %confirm_url, "Password confirmation mail");
        Ok(())
    }
}

/// Captured outbound mail, for assertions.
#[derive(Debug, Clone)]
pub struct CapturedMail {
    pub to: String,
    pub name: String,
    pub confirm_url: String,
}

/// Records mails instead of sending them. Used by the integration tests to
/// fish the confirm URL out of the request phase.
#[derive(Default)]
pub struct CaptureMailer {
    sent: std::sync::Mutex<Vec<CapturedMail>>,
}

impl CaptureMailer {
    pub fn sent(&self) -> Vec<CapturedMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<CapturedMail> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Mailer for CaptureMailer {
    async fn send_password_confirmation(
        &self,
        to: &str,
        name: &str,
        confirm_url: &str,
    ) -> Result<(), MailerError> {
        self.sent.lock().unwrap().push(CapturedMail {
            to: to.to_string(),
            name: name.to_string(),
            confirm_url: confirm_url.to_string(),
        });
        Ok(())
    }
}
