//! Mock payment provider
//!
//! In-memory customers, a seeded price catalogue (`{basic,pro,premium}_{monthly,annually}`),
//! subscriptions and payment methods. Checkout and portal requests are recorded
//! for test assertions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::types::{
    CheckoutRequest, CheckoutSession, Customer, Invoice, PaymentMethod, PortalRequest,
    PortalSession, Price, Product, Recurring, RecurringInterval, Subscription,
};
use crate::webhook::{self, Event};
use crate::{PaymentError, PaymentProvider};

#[derive(Debug, Default)]
struct MockState {
    customers: HashMap<String, Customer>,
    prices: Vec<Price>,
    products: HashMap<String, Product>,
    subscriptions: HashMap<String, Subscription>,
    invoices: HashMap<String, Vec<Invoice>>,
    payment_methods: HashMap<String, Vec<PaymentMethod>>,
    checkout_requests: Vec<CheckoutRequest>,
    portal_requests: Vec<PortalRequest>,
}

/// Mock payment provider for tests and local development.
#[derive(Debug, Clone)]
pub struct MockPaymentProvider {
    state: Arc<Mutex<MockState>>,
    webhook_secret: String,
}

impl Default for MockPaymentProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn seeded_catalogue() -> (Vec<Price>, HashMap<String, Product>) {
    let mut prices = Vec::new();
    let mut products = HashMap::new();
    for (plan, monthly_cents) in [("basic", 900), ("pro", 2900), ("premium", 7900)] {
        let product_id = format!("prod_{}", plan);
        products.insert(
            product_id.clone(),
            Product {
                id: product_id.clone(),
                name: format!("{}{}", plan[..1].to_uppercase(), &plan[1..]),
                description: None,
            },
        );
        for (suffix, interval, amount) in [
            ("monthly", RecurringInterval::Month, monthly_cents),
            ("annually", RecurringInterval::Year, monthly_cents * 10),
        ] {
            prices.push(Price {
                id: format!("price_{}_{}", plan, suffix),
                lookup_key: Some(format!("{}_{}", plan, suffix)),
                product: product_id.clone(),
                unit_amount: Some(amount),
                currency: Some("usd".to_string()),
                recurring: Some(Recurring { interval }),
            });
        }
    }
    (prices, products)
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::with_webhook_secret("whsec_mock")
    }

    pub fn with_webhook_secret(secret: &str) -> Self {
        let (prices, products) = seeded_catalogue();
        Self {
            state: Arc::new(Mutex::new(MockState {
                prices,
                products,
                ..MockState::default()
            })),
            webhook_secret: secret.to_string(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, PaymentError> {
        self.state
            .lock()
            .map_err(|e| PaymentError::Request(format!("mock state lock poisoned: {e}")))
    }

    fn snapshot(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .expect("mock state lock poisoned: prior test panicked")
    }

    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    pub fn sign_webhook(&self, payload: &[u8]) -> String {
        webhook::sign(payload, &self.webhook_secret, Utc::now().timestamp())
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.snapshot()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub fn add_payment_method(&self, customer_id: &str, payment_method: PaymentMethod) {
        self.snapshot()
            .payment_methods
            .entry(customer_id.to_string())
            .or_default()
            .push(payment_method);
    }

    pub fn add_invoice(&self, customer_id: &str, invoice: Invoice) {
        self.snapshot()
            .invoices
            .entry(customer_id.to_string())
            .or_default()
            .push(invoice);
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.snapshot().customers.values().cloned().collect()
    }

    pub fn checkout_requests(&self) -> Vec<CheckoutRequest> {
        self.snapshot().checkout_requests.clone()
    }

    pub fn portal_requests(&self) -> Vec<PortalRequest> {
        self.snapshot().portal_requests.clone()
    }
}

#[async_trait::async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        metadata: &[(&str, &str)],
    ) -> Result<Customer, PaymentError> {
        let customer = Customer {
            id: format!("cus_{}", Uuid::new_v4().simple()),
            email: Some(email.to_string()),
            name: Some(name.to_string()),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.lock()?
            .customers
            .insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn get_customer(&self, customer_id: &str) -> Result<Customer, PaymentError> {
        self.lock()?
            .customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("customer {}", customer_id)))
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<Customer, PaymentError> {
        let mut state = self.lock()?;
        let customer = state
            .customers
            .get_mut(customer_id)
            .ok_or_else(|| PaymentError::NotFound(format!("customer {}", customer_id)))?;
        if let Some(email) = email {
            customer.email = Some(email.to_string());
        }
        if let Some(name) = name {
            customer.name = Some(name.to_string());
        }
        Ok(customer.clone())
    }

    async fn list_prices(&self) -> Result<Vec<Price>, PaymentError> {
        Ok(self.lock()?.prices.clone())
    }

    async fn get_price(&self, price_id: &str) -> Result<Price, PaymentError> {
        self.lock()?
            .prices
            .iter()
            .find(|p| p.id == price_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("price {}", price_id)))
    }

    async fn find_price_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Option<Price>, PaymentError> {
        Ok(self
            .lock()?
            .prices
            .iter()
            .find(|p| p.lookup_key.as_deref() == Some(lookup_key))
            .cloned())
    }

    async fn get_product(&self, product_id: &str) -> Result<Product, PaymentError> {
        self.lock()?
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("product {}", product_id)))
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let id = format!("cs_{}", Uuid::new_v4().simple());
        self.lock()?.checkout_requests.push(request);
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.mock.test/pay/{}", id)),
            id,
        })
    }

    async fn create_portal_session(
        &self,
        request: PortalRequest,
    ) -> Result<PortalSession, PaymentError> {
        let id = format!("bps_{}", Uuid::new_v4().simple());
        self.lock()?.portal_requests.push(request);
        Ok(PortalSession {
            url: format!("https://billing.mock.test/session/{}", id),
            id,
        })
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription, PaymentError> {
        self.lock()?
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("subscription {}", subscription_id)))
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<Invoice, PaymentError> {
        self.lock()?
            .invoices
            .values()
            .flatten()
            .find(|i| i.id.as_deref() == Some(invoice_id))
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("invoice {}", invoice_id)))
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<Invoice>, PaymentError> {
        Ok(self
            .lock()?
            .invoices
            .get(customer_id)
            .map(|list| list.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn upcoming_invoice(&self, _customer_id: &str) -> Result<Option<Invoice>, PaymentError> {
        Ok(None)
    }

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethod>, PaymentError> {
        Ok(self
            .lock()?
            .payment_methods
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }

    fn construct_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<Event, PaymentError> {
        webhook::verify_signature(payload, signature_header, &self.webhook_secret, Utc::now())?;
        webhook::parse_event(payload)
    }
}
