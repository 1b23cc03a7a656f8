//! Payment provider webhooks
//!
//! `Stripe-Signature: t=<unix seconds>,v1=<hex hmac>` over `"{t}.{raw body}"`.
//! After the signature passes, [`Event::classify`] decodes `data.object` into
//! the typed variant for the event kinds the billing projection handles.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tenantry_common::crypto::{hmac_sha256_hex, SignatureHeader};

use crate::types::{
    Charge, Invoice, PaymentIntent, PaymentMethod, SetupIntent, Subscription,
};
use crate::PaymentError;

pub const TOLERANCE_SECONDS: i64 = 300;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
    #[serde(default)]
    pub created: Option<i64>,
}

/// Typed view of the events the billing projection consumes
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    SubscriptionCreated(Subscription),
    SubscriptionUpdated {
        subscription: Subscription,
        previous_attributes: Option<serde_json::Value>,
    },
    SubscriptionDeleted(Subscription),
    TrialWillEnd(Subscription),
    InvoicePaymentFailed(Invoice),
    InvoicePaymentSucceeded(Invoice),
    ChargeFailed(Charge),
    PaymentIntentSucceeded(PaymentIntent),
    SetupIntentFailed(SetupIntent),
    SetupIntentSucceeded(SetupIntent),
    PaymentMethodAttached(PaymentMethod),
    /// Detached methods no longer carry a customer; it is recovered from
    /// `previous_attributes.customer`
    PaymentMethodDetached {
        payment_method: PaymentMethod,
        customer: Option<String>,
    },
    Ignored(String),
}

impl Event {
    fn object<T: DeserializeOwned>(&self) -> Result<T, PaymentError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| PaymentError::InvalidPayload(format!("{}: {}", self.kind, e)))
    }

    pub fn classify(&self) -> Result<BillingEvent, PaymentError> {
        Ok(match self.kind.as_str() {
            "customer.subscription.created" => BillingEvent::SubscriptionCreated(self.object()?),
            "customer.subscription.updated" => BillingEvent::SubscriptionUpdated {
                subscription: self.object()?,
                previous_attributes: self.data.previous_attributes.clone(),
            },
            "customer.subscription.deleted" => BillingEvent::SubscriptionDeleted(self.object()?),
            "customer.subscription.trial_will_end" => BillingEvent::TrialWillEnd(self.object()?),
            "invoice.payment_failed" => BillingEvent::InvoicePaymentFailed(self.object()?),
            "invoice.payment_succeeded" => BillingEvent::InvoicePaymentSucceeded(self.object()?),
            "charge.failed" => BillingEvent::ChargeFailed(self.object()?),
            "payment_intent.succeeded" => BillingEvent::PaymentIntentSucceeded(self.object()?),
            "setup_intent.setup_failed" => BillingEvent::SetupIntentFailed(self.object()?),
            "setup_intent.succeeded" => BillingEvent::SetupIntentSucceeded(self.object()?),
            "payment_method.attached" => BillingEvent::PaymentMethodAttached(self.object()?),
            "payment_method.detached" => {
                let payment_method: PaymentMethod = self.object()?;
                let customer = payment_method.customer.clone().or_else(|| {
                    self.data
                        .previous_attributes
                        .as_ref()
                        .and_then(|prev| prev.get("customer"))
                        .and_then(|c| c.as_str())
                        .map(String::from)
                });
                BillingEvent::PaymentMethodDetached {
                    payment_method,
                    customer,
                }
            }
            other => BillingEvent::Ignored(other.to_string()),
        })
    }
}

/// Header value for `payload` signed at `timestamp` (unix seconds)
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let signed = [timestamp.to_string().as_bytes(), b".", payload].concat();
    format!(
        "t={},v1={}",
        timestamp,
        hmac_sha256_hex(secret.as_bytes(), &signed)
    )
}

/// Check the signature and freshness of a delivery
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), PaymentError> {
    let header = SignatureHeader::parse(signature_header).ok_or(PaymentError::InvalidSignature)?;

    let signed = [header.timestamp.to_string().as_bytes(), b".", payload].concat();
    if !header.matches(&hmac_sha256_hex(secret.as_bytes(), &signed)) {
        return Err(PaymentError::InvalidSignature);
    }

    if (now.timestamp() - header.timestamp).abs() > TOLERANCE_SECONDS {
        tracing::warn!(timestamp = header.timestamp, "Payment webhook outside tolerance window");
        return Err(PaymentError::InvalidSignature);
    }

    Ok(())
}

/// Decode the envelope of a verified delivery
pub fn parse_event(payload: &[u8]) -> Result<Event, PaymentError> {
    serde_json::from_slice(payload).map_err(|e| PaymentError::InvalidPayload(e.to_string()))
}
