//! SES delivery
//!
//! Each message goes out as one `SendEmail` call tagged with its email kind,
//! so bounce and complaint events can be split by flow (invite, confirmation,
//! reset). An endpoint override targets LocalStack with static credentials.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ses::config::Credentials;
use aws_sdk_ses::types::{Body, Content, Destination, Message, MessageTag};
use aws_sdk_ses::Client as SesClient;
use chrono::Utc;

use crate::{EmailConfig, EmailError, EmailMessage, EmailReceipt, EmailService};

const DEFAULT_REGION: &str = "us-east-1";

/// SES message tag carrying `EmailKind::as_str`
pub const KIND_TAG: &str = "email_type";

pub struct SesEmailService {
    client: SesClient,
    config: EmailConfig,
}

impl SesEmailService {
    pub async fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let sdk_config = load_sdk_config(&config).await;
        Ok(Self {
            client: SesClient::new(&sdk_config),
            config,
        })
    }
}

async fn load_sdk_config(config: &EmailConfig) -> SdkConfig {
    let region = config
        .aws_region
        .clone()
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

    match &config.aws_endpoint_url {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "SES endpoint override in use");
            loader
                .endpoint_url(endpoint)
                .credentials_provider(Credentials::new("local", "local", None, None, "tenantry-local"))
                .load()
                .await
        }
        None => loader.load().await,
    }
}

fn utf8(data: &str, part: &str) -> Result<Content, EmailError> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| EmailError::AwsSes(format!("invalid {part}: {e}")))
}

fn ses_message(message: &EmailMessage) -> Result<Message, EmailError> {
    let mut body = Body::builder().text(utf8(&message.body_text, "text body")?);
    if let Some(html) = &message.body_html {
        body = body.html(utf8(html, "html body")?);
    }
    Ok(Message::builder()
        .subject(utf8(&message.subject, "subject")?)
        .body(body.build())
        .build())
}

/// Tag for the message's kind; untagged when no template built it
fn kind_tag(message: &EmailMessage) -> Result<Option<MessageTag>, EmailError> {
    message
        .kind()
        .map(|kind| {
            MessageTag::builder()
                .name(KIND_TAG)
                .value(kind)
                .build()
                .map_err(|e| EmailError::AwsSes(format!("invalid message tag: {e}")))
        })
        .transpose()
}

#[async_trait::async_trait]
impl EmailService for SesEmailService {
    async fn send_email(&self, message: EmailMessage) -> Result<EmailReceipt, EmailError> {
        if !message.to.contains('@') || !message.from.contains('@') {
            return Err(EmailError::Validation(format!(
                "cannot send from {} to {}",
                message.from, message.to
            )));
        }

        let mut request = self
            .client
            .send_email()
            .source(&message.from)
            .destination(Destination::builder().to_addresses(&message.to).build())
            .message(ses_message(&message)?)
            .set_reply_to_addresses(message.reply_to.clone().map(|r| vec![r]));
        if let Some(tag) = kind_tag(&message)? {
            request = request.tags(tag);
        }

        let output = request.send().await.map_err(|e| {
            tracing::error!(error = %e, kind = ?message.kind(), "SES rejected message");
            EmailError::AwsSes(e.to_string())
        })?;

        let message_id = output.message_id().to_string();
        tracing::info!(message_id = %message_id, kind = ?message.kind(), "Email sent via SES");

        Ok(EmailReceipt {
            message_id,
            sent_at: Utc::now(),
            provider: "aws-ses".to_string(),
            metadata: message.metadata,
        })
    }

    fn default_from(&self) -> String {
        self.config.default_from.clone()
    }

    fn app_name(&self) -> &str {
        &self.config.app_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmailKind;

    fn message() -> EmailMessage {
        EmailMessage::new(
            "invitee@example.com".to_string(),
            "no-reply@tenantry.app".to_string(),
            "Join Acme".to_string(),
            "Follow the link".to_string(),
        )
    }

    #[test]
    fn test_kind_tag_follows_template_kind() {
        let invite = message().with_metadata("email_type", EmailKind::TeamInvite.as_str());
        let tag = kind_tag(&invite).unwrap().unwrap();
        assert_eq!(tag.name(), KIND_TAG);
        assert_eq!(tag.value(), "team_invite");

        assert!(kind_tag(&message()).unwrap().is_none());
    }

    #[test]
    fn test_ses_message_builds_with_and_without_html() {
        assert!(ses_message(&message()).is_ok());
        assert!(ses_message(&message().with_html("<p>Follow the link</p>".to_string())).is_ok());
    }

    #[tokio::test]
    async fn test_local_endpoint_client_builds_offline() {
        let config = EmailConfig {
            provider: "ses".to_string(),
            aws_region: None,
            aws_endpoint_url: Some("http://localhost:4566".to_string()),
            default_from: "no-reply@tenantry.app".to_string(),
            app_name: "Tenantry".to_string(),
            enabled: true,
        };
        let service = SesEmailService::new(config).await.unwrap();
        assert_eq!(service.default_from(), "no-reply@tenantry.app");
    }

    #[tokio::test]
    async fn test_rejects_address_without_domain() {
        let config = EmailConfig {
            provider: "ses".to_string(),
            aws_region: Some("eu-west-1".to_string()),
            aws_endpoint_url: Some("http://localhost:4566".to_string()),
            default_from: "no-reply@tenantry.app".to_string(),
            app_name: "Tenantry".to_string(),
            enabled: true,
        };
        let service = SesEmailService::new(config).await.unwrap();
        let mut bad = message();
        bad.to = "not-an-address".to_string();
        assert!(matches!(
            service.send_email(bad).await,
            Err(EmailError::Validation(_))
        ));
    }
}
