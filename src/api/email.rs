//! Outbound email for magic links.
//!
//! Delivery is best-effort: the request path hands the message to a blocking
//! task and answers the caller without waiting for it. A failed delivery is
//! logged and never reaches the HTTP response, so the response for an address
//! that bounces is the same as for one that accepts the mail.
//!
//! The default sender for local dev is `LogEmailSender`, which logs and returns
//! `Ok(())`. Production deployments plug an SMTP or API sender in behind the
//! same trait.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

/// Email delivery abstraction.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error describing why it was not sent.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs messages instead of sending real email.
///
/// Message bodies carry live sign-in links, so they are only logged when
/// debug logging is enabled.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender {
    debug_logging: bool,
}

impl LogEmailSender {
    #[must_use]
    pub fn new(debug_logging: bool) -> Self {
        Self { debug_logging }
    }
}

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.debug_logging {
            info!(
                to_email = %message.to_email,
                subject = %message.subject,
                body = %message.body,
                "email send stub"
            );
        } else {
            info!(subject = %message.subject, "email send stub");
        }
        Ok(())
    }
}

/// Handle to a delivery attempt whose outcome is not observable.
///
/// Dropping it detaches the attempt.
#[derive(Debug)]
pub struct BestEffort {
    handle: JoinHandle<()>,
}

impl BestEffort {
    /// Wait until the attempt has finished, successfully or not.
    pub async fn settled(self) {
        // A panicking sender is already reported by the runtime.
        let _ = self.handle.await;
    }
}

/// Hand a message to the sender on the blocking pool.
pub fn deliver(sender: Arc<dyn EmailSender>, message: EmailMessage) -> BestEffort {
    let handle = tokio::task::spawn_blocking(move || {
        if let Err(err) = sender.send(&message) {
            warn!("magic link delivery failed: {err:#}");
        }
    });
    BestEffort { handle }
}

/// Compose the sign-in email.
pub(crate) fn magic_link_message(to_email: &str, link: &str, ttl_minutes: i64) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Your sign-in link".to_string(),
        body: format!(
            "Use the link below to sign in. It works once and expires in {ttl_minutes} minutes.\n\n\
             {link}\n\n\
             If you did not ask for this email you can ignore it."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    struct RecordingSender {
        sent: Mutex<Vec<EmailMessage>>,
    }

    impl EmailSender for RecordingSender {
        fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct FailingSender;

    impl EmailSender for FailingSender {
        fn send(&self, _message: &EmailMessage) -> Result<()> {
            Err(anyhow!("smtp unavailable"))
        }
    }

    #[test]
    fn message_carries_link_and_ttl() {
        let message = magic_link_message("a@example.com", "https://x/link", 15);
        assert_eq!(message.to_email, "a@example.com");
        assert!(message.body.contains("https://x/link"));
        assert!(message.body.contains("15 minutes"));
    }

    #[test]
    fn log_sender_always_succeeds() {
        let message = magic_link_message("a@example.com", "https://x/link", 15);
        assert!(LogEmailSender::new(false).send(&message).is_ok());
        assert!(LogEmailSender::new(true).send(&message).is_ok());
    }

    #[tokio::test]
    async fn deliver_hands_message_to_sender() {
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        let message = magic_link_message("a@example.com", "https://x/link", 15);
        deliver(sender.clone(), message).settled().await;
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "a@example.com");
    }

    #[tokio::test]
    async fn deliver_swallows_sender_errors() {
        let message = magic_link_message("a@example.com", "https://x/link", 15);
        // Only completion is observable; the error is logged.
        deliver(Arc::new(FailingSender), message).settled().await;
    }
}
