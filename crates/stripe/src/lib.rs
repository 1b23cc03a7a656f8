//! Tenantry payment provider integration
//!
//! Provides the payment-provider surface the billing domain consumes:
//! - Customers, prices and products
//! - Checkout sessions (subscription mode) and billing portal sessions
//! - Subscription, invoice and payment method reads
//! - Signed webhook verification and typed event decoding
//!
//! The client handle is constructed once from configuration and shared as
//! `Arc<dyn PaymentProvider>`.

pub mod client;
pub mod mock;
pub mod types;
pub mod webhook;

use std::sync::Arc;

use thiserror::Error;

pub use types::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error("Payment provider configuration error: {0}")]
    Configuration(String),

    #[error("Payment provider request error: {0}")]
    Request(String),

    #[error("Payment provider returned {status}: {message}")]
    Response { status: u16, message: String },

    #[error("Payment provider resource not found: {0}")]
    NotFound(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Payment provider configuration.
#[derive(Clone)]
pub struct PaymentConfig {
    /// `stripe` or `mock`
    pub provider: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl PaymentConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create payment config from environment variables.
    pub fn from_env() -> Result<Self, PaymentError> {
        let provider = std::env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| "stripe".to_string());
        let api_key = std::env::var("STRIPE_API_KEY").unwrap_or_default();
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let base_url = std::env::var("STRIPE_BASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());

        if provider != "mock" && api_key.is_empty() {
            return Err(PaymentError::Configuration(
                "STRIPE_API_KEY is required".to_string(),
            ));
        }

        Ok(Self {
            provider,
            api_key,
            webhook_secret,
            base_url,
        })
    }
}

/// Payment provider operations used by the billing domain.
#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        metadata: &[(&str, &str)],
    ) -> Result<Customer, PaymentError>;

    async fn get_customer(&self, customer_id: &str) -> Result<Customer, PaymentError>;

    async fn update_customer(
        &self,
        customer_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<Customer, PaymentError>;

    /// Active recurring prices carrying a lookup key
    async fn list_prices(&self) -> Result<Vec<Price>, PaymentError>;

    async fn get_price(&self, price_id: &str) -> Result<Price, PaymentError>;

    async fn find_price_by_lookup_key(&self, lookup_key: &str)
        -> Result<Option<Price>, PaymentError>;

    async fn get_product(&self, product_id: &str) -> Result<Product, PaymentError>;

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    async fn create_portal_session(
        &self,
        request: PortalRequest,
    ) -> Result<PortalSession, PaymentError>;

    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, PaymentError>;

    async fn get_invoice(&self, invoice_id: &str) -> Result<Invoice, PaymentError>;

    async fn list_invoices(&self, customer_id: &str, limit: u32)
        -> Result<Vec<Invoice>, PaymentError>;

    /// `None` when the customer has nothing scheduled
    async fn upcoming_invoice(&self, customer_id: &str) -> Result<Option<Invoice>, PaymentError>;

    async fn list_payment_methods(&self, customer_id: &str)
        -> Result<Vec<PaymentMethod>, PaymentError>;

    /// Verify signature and decode the envelope of a webhook delivery
    fn construct_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<webhook::Event, PaymentError>;
}

/// Factory for creating PaymentProvider implementations.
pub struct PaymentProviderFactory;

impl PaymentProviderFactory {
    pub fn create(config: PaymentConfig) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        match config.provider.as_str() {
            "stripe" => {
                tracing::info!("Creating Stripe payment provider");
                Ok(Arc::new(client::StripeClient::new(config)?))
            }
            "mock" => {
                tracing::info!("Creating mock payment provider");
                Ok(Arc::new(mock::MockPaymentProvider::with_webhook_secret(
                    &config.webhook_secret,
                )))
            }
            provider => Err(PaymentError::Configuration(format!(
                "Unknown payment provider: {}. Supported providers: stripe, mock",
                provider
            ))),
        }
    }
}
