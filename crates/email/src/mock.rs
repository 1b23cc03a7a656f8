//! Mock Email Service Implementation
//!
//! In-memory email capture for tests and local development. Captured messages
//! can be looked up by recipient and kind, and the action link they carry can
//! be pulled out to drive the next step of a flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::{EmailError, EmailKind, EmailMessage, EmailReceipt, EmailService};

lazy_static! {
    static ref TOKEN_PARAM: Regex = Regex::new(r"[?&]token=([A-Za-z0-9_\-\.]+)").unwrap();
    static ref FIRST_URL: Regex = Regex::new(r#"https?://[^\s"<>]+"#).unwrap();
}

/// Email captured by the mock service
#[derive(Debug, Clone)]
pub struct CapturedEmail {
    pub message: EmailMessage,
    pub receipt: EmailReceipt,
    pub captured_at: DateTime<Utc>,
}

impl CapturedEmail {
    /// Action link recorded by the template, or the first URL in the body
    pub fn link(&self) -> Option<String> {
        if let Some(link) = self.message.metadata.get("link") {
            return Some(link.clone());
        }
        FIRST_URL
            .find(&self.message.body_text)
            .map(|m| m.as_str().to_string())
    }

    /// Value of the `token` query parameter in the action link
    pub fn token(&self) -> Option<String> {
        let link = self.link()?;
        TOKEN_PARAM
            .captures(&link)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn is_kind(&self, kind: EmailKind) -> bool {
        self.message.kind() == Some(kind.as_str())
    }
}

/// Mock email service for testing
#[derive(Debug, Clone)]
pub struct MockEmailService {
    emails: Arc<Mutex<Vec<CapturedEmail>>>,
    default_from: String,
    app_name: String,
    fail_sends: Arc<Mutex<bool>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self {
            emails: Arc::new(Mutex::new(Vec::new())),
            default_from: "no-reply@tenantry.app".to_string(),
            app_name: "Tenantry".to_string(),
            fail_sends: Arc::new(Mutex::new(false)),
        }
    }

    /// Make subsequent sends fail, to exercise delivery error paths
    pub fn set_failing(&self, failing: bool) {
        *self.fail_sends.lock().unwrap() = failing;
    }

    /// Get all captured emails
    pub fn get_all_emails(&self) -> Vec<CapturedEmail> {
        self.emails.lock().unwrap().clone()
    }

    /// Get emails sent to a specific recipient (case-insensitive)
    pub fn get_emails_for_recipient(&self, email: &str) -> Vec<CapturedEmail> {
        self.emails
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.message.to.eq_ignore_ascii_case(email))
            .cloned()
            .collect()
    }

    /// Most recent email of `kind` sent to `email`
    pub fn latest(&self, email: &str, kind: EmailKind) -> Option<CapturedEmail> {
        self.get_emails_for_recipient(email)
            .into_iter()
            .filter(|e| e.is_kind(kind))
            .max_by_key(|e| e.captured_at)
    }

    /// Check if an email of `kind` was sent to `email`
    pub fn was_sent(&self, email: &str, kind: EmailKind) -> bool {
        self.latest(email, kind).is_some()
    }

    pub fn email_count(&self) -> usize {
        self.emails.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.emails.lock().unwrap().clear();
    }
}

impl Default for MockEmailService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EmailService for MockEmailService {
    async fn send_email(&self, message: EmailMessage) -> Result<EmailReceipt, EmailError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(EmailError::AwsSes("mock delivery failure".to_string()));
        }

        tracing::debug!(to = %message.to, kind = ?message.kind(), "Mock email service capturing email");

        let receipt = EmailReceipt {
            message_id: format!("mock-{}", Uuid::new_v4()),
            sent_at: Utc::now(),
            provider: "mock".to_string(),
            metadata: message.metadata.clone(),
        };

        self.emails.lock().unwrap().push(CapturedEmail {
            message,
            receipt: receipt.clone(),
            captured_at: Utc::now(),
        });

        Ok(receipt)
    }

    fn default_from(&self) -> String {
        self.default_from.clone()
    }

    fn app_name(&self) -> &str {
        &self.app_name
    }
}
