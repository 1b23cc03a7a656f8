//! Tenantry Email Service
//!
//! Provides transactional email for account and team workflows:
//! - AWS SES integration for production email delivery
//! - Mock email service for testing and development
//! - Templates for team invites, email confirmation and password reset

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aws_ses;
pub mod content;
pub mod mock;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Email configuration error: {0}")]
    Configuration(String),

    #[error("Email validation error: {0}")]
    Validation(String),

    #[error("AWS SES error: {0}")]
    AwsSes(String),
}

/// Kind of transactional email, recorded in message metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    TeamInvite,
    EmailConfirmation,
    PasswordReset,
}

impl EmailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::TeamInvite => "team_invite",
            EmailKind::EmailConfirmation => "email_confirmation",
            EmailKind::PasswordReset => "password_reset",
        }
    }
}

/// Email message to be sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl EmailMessage {
    pub fn new(to: String, from: String, subject: String, body_text: String) -> Self {
        Self {
            to,
            from,
            reply_to: None,
            subject,
            body_text,
            body_html: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_html(mut self, body_html: String) -> Self {
        self.body_html = Some(body_html);
        self
    }

    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Kind recorded by the template that built this message
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get("email_type").map(String::as_str)
    }
}

/// Email delivery receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailReceipt {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
    pub provider: String,
    pub metadata: HashMap<String, String>,
}

/// Email service configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Email service provider (ses, mock)
    pub provider: String,
    /// AWS region for SES
    pub aws_region: Option<String>,
    /// AWS endpoint URL (for LocalStack)
    pub aws_endpoint_url: Option<String>,
    /// Default from address
    pub default_from: String,
    /// Product name used in subjects and signatures
    pub app_name: String,
    /// Enable email sending (can disable for testing)
    pub enabled: bool,
}

impl EmailConfig {
    /// Create email config from environment variables
    pub fn from_env() -> Result<Self, EmailError> {
        dotenvy::dotenv().ok();

        let provider = std::env::var("EMAIL_PROVIDER").unwrap_or_else(|_| "mock".to_string());
        let aws_region = std::env::var("AWS_REGION").ok();
        let aws_endpoint_url = std::env::var("AWS_ENDPOINT_URL").ok();
        let default_from =
            std::env::var("FROM_EMAIL").unwrap_or_else(|_| "no-reply@tenantry.app".to_string());
        let app_name = std::env::var("APP_NAME").unwrap_or_else(|_| "Tenantry".to_string());
        let enabled = std::env::var("EMAIL_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        Ok(Self {
            provider,
            aws_region,
            aws_endpoint_url,
            default_from,
            app_name,
            enabled,
        })
    }
}

/// Email service trait for different implementations
#[async_trait::async_trait]
pub trait EmailService: Send + Sync {
    /// Send an email message
    async fn send_email(&self, message: EmailMessage) -> Result<EmailReceipt, EmailError>;

    /// Return the default "from" address for outgoing emails
    fn default_from(&self) -> String;

    /// Product name used in subjects and signatures
    fn app_name(&self) -> &str;

    /// Invite to join a team; `invite_url` is the accept link
    async fn send_team_invite(
        &self,
        recipient_email: &str,
        team_name: &str,
        inviter_name: &str,
        role: &str,
        invite_url: &str,
    ) -> Result<EmailReceipt, EmailError> {
        let subject = format!("You're invited to join {} on {}", team_name, self.app_name());
        let body_text =
            content::team_invite_text(self.app_name(), inviter_name, team_name, role, invite_url);
        let body_html =
            content::team_invite_html(self.app_name(), inviter_name, team_name, role, invite_url);

        let message = EmailMessage::new(
            recipient_email.to_string(),
            self.default_from(),
            subject,
            body_text,
        )
        .with_html(body_html)
        .with_metadata("email_type", EmailKind::TeamInvite.as_str())
        .with_metadata("team_name", team_name)
        .with_metadata("role", role)
        .with_metadata("link", invite_url);

        self.send_email(message).await
    }

    /// Ask a new user to confirm their address
    async fn send_email_confirmation(
        &self,
        recipient_email: &str,
        confirm_url: &str,
    ) -> Result<EmailReceipt, EmailError> {
        let subject = format!("Confirm your {} account", self.app_name());
        let message = EmailMessage::new(
            recipient_email.to_string(),
            self.default_from(),
            subject,
            content::confirmation_text(self.app_name(), confirm_url),
        )
        .with_html(content::confirmation_html(self.app_name(), confirm_url))
        .with_metadata("email_type", EmailKind::EmailConfirmation.as_str())
        .with_metadata("link", confirm_url);

        self.send_email(message).await
    }

    /// Password reset link
    async fn send_password_reset(
        &self,
        recipient_email: &str,
        reset_url: &str,
    ) -> Result<EmailReceipt, EmailError> {
        let subject = format!("Reset your {} password", self.app_name());
        let message = EmailMessage::new(
            recipient_email.to_string(),
            self.default_from(),
            subject,
            content::password_reset_text(self.app_name(), reset_url),
        )
        .with_html(content::password_reset_html(self.app_name(), reset_url))
        .with_metadata("email_type", EmailKind::PasswordReset.as_str())
        .with_metadata("link", reset_url);

        self.send_email(message).await
    }
}

/// Email service factory
pub struct EmailServiceFactory;

impl EmailServiceFactory {
    /// Create email service based on configuration
    pub async fn create(config: EmailConfig) -> Result<Arc<dyn EmailService>, EmailError> {
        if !config.enabled {
            tracing::info!("Email service disabled, using mock implementation");
            return Ok(Arc::new(mock::MockEmailService::new()));
        }

        match config.provider.as_str() {
            "ses" | "aws-ses" => {
                tracing::info!("Creating AWS SES email service");
                let ses_service = aws_ses::SesEmailService::new(config).await?;
                Ok(Arc::new(ses_service))
            }
            "mock" => {
                tracing::info!("Creating mock email service");
                Ok(Arc::new(mock::MockEmailService::new()))
            }
            provider => Err(EmailError::Configuration(format!(
                "Unknown email provider: {}. Supported providers: ses, mock",
                provider
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_message_creation() {
        let message = EmailMessage::new(
            "test@example.com".to_string(),
            "sender@example.com".to_string(),
            "Test Subject".to_string(),
            "Test body".to_string(),
        )
        .with_html("<p>Test body</p>".to_string())
        .with_reply_to("reply@example.com".to_string())
        .with_metadata("email_type", EmailKind::PasswordReset.as_str());

        assert_eq!(message.to, "test@example.com");
        assert_eq!(message.body_html, Some("<p>Test body</p>".to_string()));
        assert_eq!(message.reply_to, Some("reply@example.com".to_string()));
        assert_eq!(message.kind(), Some("password_reset"));
    }

    #[test]
    #[serial_test::serial]
    fn test_email_config_from_env() {
        std::env::remove_var("EMAIL_PROVIDER");
        std::env::remove_var("FROM_EMAIL");
        std::env::remove_var("EMAIL_ENABLED");

        let config = EmailConfig::from_env().unwrap();
        assert_eq!(config.provider, "mock");
        assert_eq!(config.default_from, "no-reply@tenantry.app");
        assert!(config.enabled);
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_provider() {
        let config = EmailConfig {
            provider: "sendgrid".to_string(),
            aws_region: None,
            aws_endpoint_url: None,
            default_from: "a@b.com".to_string(),
            app_name: "Tenantry".to_string(),
            enabled: true,
        };
        let err = match EmailServiceFactory::create(config).await {
            Err(e) => e,
            Ok(_) => panic!("Expected error for unknown provider"),
        };
        assert!(err.to_string().contains("Unknown email provider: sendgrid"));
    }
}
