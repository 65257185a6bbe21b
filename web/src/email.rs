//! Transactional email routed through the email retry queue.
//!
//! The SMTP client lives outside this workspace. `LogEmailSender` stands in
//! for it in the server binary and in local runs.

use serde::{Deserialize, Serialize};
use turnstile_core::environment::MessageSender;

/// Outbound transactional email (order confirmations, ticket delivery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

impl EmailMessage {
    /// Create an email.
    #[must_use]
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Email sender that logs instead of delivering.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailSender;

impl LogEmailSender {
    /// Create a new logging sender.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MessageSender<EmailMessage> for LogEmailSender {
    type Error = std::convert::Infallible;

    async fn send(&self, message: &EmailMessage) -> Result<(), Self::Error> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            bytes = message.body.len(),
            "Email sent (log only)"
        );
        Ok(())
    }
}
