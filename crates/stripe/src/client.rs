//! Stripe HTTP Client Implementation
//!
//! Lightweight client over the form-encoded REST API: basic auth with the
//! secret key, typed JSON responses.

use std::time::Duration;

use chrono::Utc;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::types::{
    CheckoutRequest, CheckoutSession, Customer, Invoice, List, PaymentMethod, PortalFlow,
    PortalRequest, PortalSession, Price, Product, Subscription,
};
use crate::webhook::{self, Event};
use crate::{PaymentConfig, PaymentError, PaymentProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

type Params = Vec<(String, String)>;

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

/// Real Stripe client.
pub struct StripeClient {
    http: reqwest::Client,
    config: PaymentConfig,
}

impl StripeClient {
    pub fn new(config: PaymentConfig) -> Result<Self, PaymentError> {
        if config.api_key.is_empty() {
            return Err(PaymentError::Configuration(
                "STRIPE_API_KEY is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Configuration(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.url(path))
            .basic_auth(&self.config.api_key, Option::<&str>::None)
    }

    fn post(&self, path: &str, params: &Params) -> RequestBuilder {
        self.http
            .post(self.url(path))
            .basic_auth(&self.config.api_key, Option::<&str>::None)
            .form(params)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, PaymentError> {
        let response = builder
            .send()
            .await
            .map_err(|e| PaymentError::Request(format!("Stripe request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| PaymentError::Request(format!("Stripe response parse failed: {}", e)));
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .error
            .message
            .or(body.error.code)
            .unwrap_or_else(|| "Unknown Stripe error".to_string());
        Err(match status {
            StatusCode::NOT_FOUND => PaymentError::NotFound(message),
            _ => PaymentError::Response {
                status: status.as_u16(),
                message,
            },
        })
    }
}

/// Form body for a subscription-mode checkout session
pub(crate) fn checkout_params(request: &CheckoutRequest) -> Params {
    let mut params = vec![
        param("mode", "subscription"),
        param("customer", request.customer_id.as_str()),
        param("line_items[0][price]", request.price_id.as_str()),
        param("line_items[0][quantity]", "1"),
        param("success_url", request.success_url.as_str()),
        param("cancel_url", request.cancel_url.as_str()),
    ];
    if let Some(days) = request.trial_period_days {
        params.push(param("subscription_data[trial_period_days]", days.to_string()));
        params.push(param(
            "subscription_data[trial_settings][end_behavior][missing_payment_method]",
            "pause",
        ));
        params.push(param("payment_method_collection", "if_required"));
    }
    for (key, value) in &request.metadata {
        params.push(param(&format!("metadata[{}]", key), value.as_str()));
        params.push(param(
            &format!("subscription_data[metadata][{}]", key),
            value.as_str(),
        ));
    }
    params
}

/// Form body for a billing portal session with an optional pre-filled flow
pub(crate) fn portal_params(request: &PortalRequest) -> Params {
    let mut params = vec![
        param("customer", request.customer_id.as_str()),
        param("return_url", request.return_url.as_str()),
    ];

    let Some(flow) = &request.flow else {
        return params;
    };

    match flow {
        PortalFlow::SubscriptionCancel { subscription_id } => {
            params.push(param("flow_data[type]", "subscription_cancel"));
            params.push(param(
                "flow_data[subscription_cancel][subscription]",
                subscription_id.as_str(),
            ));
        }
        PortalFlow::SubscriptionUpdate { subscription_id } => {
            params.push(param("flow_data[type]", "subscription_update"));
            params.push(param(
                "flow_data[subscription_update][subscription]",
                subscription_id.as_str(),
            ));
        }
        PortalFlow::SubscriptionUpdateConfirm {
            subscription_id,
            item_id,
            price_id,
        } => {
            params.push(param("flow_data[type]", "subscription_update_confirm"));
            params.push(param(
                "flow_data[subscription_update_confirm][subscription]",
                subscription_id.as_str(),
            ));
            params.push(param(
                "flow_data[subscription_update_confirm][items][0][id]",
                item_id.as_str(),
            ));
            params.push(param(
                "flow_data[subscription_update_confirm][items][0][price]",
                price_id.as_str(),
            ));
            params.push(param(
                "flow_data[subscription_update_confirm][items][0][quantity]",
                "1",
            ));
        }
        PortalFlow::PaymentMethodUpdate => {
            params.push(param("flow_data[type]", "payment_method_update"));
        }
    }

    if let Some(url) = &request.after_completion_url {
        params.push(param("flow_data[after_completion][type]", "redirect"));
        params.push(param(
            "flow_data[after_completion][redirect][return_url]",
            url.as_str(),
        ));
    }

    params
}

#[async_trait::async_trait]
impl PaymentProvider for StripeClient {
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        metadata: &[(&str, &str)],
    ) -> Result<Customer, PaymentError> {
        let mut params = vec![param("email", email), param("name", name)];
        for (key, value) in metadata {
            params.push(param(&format!("metadata[{}]", key), *value));
        }
        self.send(self.post("/customers", &params)).await
    }

    async fn get_customer(&self, customer_id: &str) -> Result<Customer, PaymentError> {
        self.send(self.get(&format!("/customers/{}", customer_id)))
            .await
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<Customer, PaymentError> {
        let mut params = Vec::new();
        if let Some(email) = email {
            params.push(param("email", email));
        }
        if let Some(name) = name {
            params.push(param("name", name));
        }
        self.send(self.post(&format!("/customers/{}", customer_id), &params))
            .await
    }

    async fn list_prices(&self) -> Result<Vec<Price>, PaymentError> {
        let list: List<Price> = self
            .send(self.get("/prices?active=true&type=recurring&limit=100"))
            .await?;
        Ok(list
            .data
            .into_iter()
            .filter(|p| p.lookup_key.is_some())
            .collect())
    }

    async fn get_price(&self, price_id: &str) -> Result<Price, PaymentError> {
        self.send(self.get(&format!("/prices/{}", price_id))).await
    }

    async fn find_price_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Option<Price>, PaymentError> {
        let list: List<Price> = self
            .send(
                self.get("/prices")
                    .query(&[("lookup_keys[]", lookup_key), ("active", "true")]),
            )
            .await?;
        Ok(list.data.into_iter().next())
    }

    async fn get_product(&self, product_id: &str) -> Result<Product, PaymentError> {
        self.send(self.get(&format!("/products/{}", product_id)))
            .await
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.send(self.post("/checkout/sessions", &checkout_params(&request)))
            .await
    }

    async fn create_portal_session(
        &self,
        request: PortalRequest,
    ) -> Result<PortalSession, PaymentError> {
        self.send(self.post("/billing_portal/sessions", &portal_params(&request)))
            .await
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, PaymentError> {
        self.send(self.get(&format!("/subscriptions/{}", subscription_id)))
            .await
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<Invoice, PaymentError> {
        self.send(self.get(&format!("/invoices/{}", invoice_id)))
            .await
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<Invoice>, PaymentError> {
        let list: List<Invoice> = self
            .send(
                self.get("/invoices")
                    .query(&[("customer", customer_id), ("limit", limit.to_string().as_str())]),
            )
            .await?;
        Ok(list.data)
    }

    async fn upcoming_invoice(&self, customer_id: &str) -> Result<Option<Invoice>, PaymentError> {
        match self
            .send(self.get("/invoices/upcoming").query(&[("customer", customer_id)]))
            .await
        {
            Ok(invoice) => Ok(Some(invoice)),
            Err(PaymentError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, PaymentError> {
        let list: List<PaymentMethod> = self
            .send(self.get(&format!(
                "/customers/{}/payment_methods?type=card",
                customer_id
            )))
            .await?;
        Ok(list.data)
    }

    fn construct_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<Event, PaymentError> {
        webhook::verify_signature(
            payload,
            signature_header,
            &self.config.webhook_secret,
            Utc::now(),
        )?;
        webhook::parse_event(payload)
    }
}
