//! Provider payloads to [`PaymentEvent`]. Each adapter only understands its
//! own provider's shape; nothing past this module sees raw payloads.

use std::fmt;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest as _, Sha256};

use super::{PaymentEvent, PaymentOrder, Product};
use crate::error::{Error, Result};
use crate::ledger::keys::{is_plausible_email, normalize_email};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Provider {
    Asaas,
    Kiwify,
    Generic,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asaas => "asaas",
            Self::Kiwify => "kiwify",
            Self::Generic => "generic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asaas" => Some(Self::Asaas),
            "kiwify" => Some(Self::Kiwify),
            "generic" | "webhook" => Some(Self::Generic),
            _ => None,
        }
    }

    pub fn parse_event(self, payload: &Value) -> Result<PaymentEvent> {
        match self {
            Self::Asaas => asaas(payload),
            Self::Kiwify => kiwify(payload),
            Self::Generic => generic(payload),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn decode<T: serde::de::DeserializeOwned>(provider: Provider, payload: &Value) -> Result<T> {
    T::deserialize(payload)
        .map_err(|err| Error::validation(format!("malformed {provider} payload: {err}")))
}

fn email_of(provider: Provider, candidates: &[Option<&str>]) -> Result<String> {
    candidates
        .iter()
        .flatten()
        .map(|raw| normalize_email(raw))
        .find(|email| is_plausible_email(email))
        .ok_or_else(|| Error::validation(format!("{provider} payload carries no usable email")))
}

fn reais_to_cents(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    // Amounts stay far below i64::MAX cents.
    Some((amount * 100.0).round() as i64)
}

/// Identifier for payloads that carry none: a digest of the canonical JSON,
/// so the same delivery always maps to the same order.
fn payload_digest(payload: &Value) -> String {
    let canonical = payload.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct AsaasWebhook {
    event: String,
    payment: AsaasPayment,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AsaasPayment {
    id: String,
    value: Option<f64>,
    description: Option<String>,
    external_reference: Option<String>,
    customer_email: Option<String>,
    customer_name: Option<String>,
    customer: Option<Value>,
}

fn asaas(payload: &Value) -> Result<PaymentEvent> {
    const PROVIDER: Provider = Provider::Asaas;
    let hook: AsaasWebhook = decode(PROVIDER, payload)?;
    let payment = hook.payment;
    if payment.id.trim().is_empty() {
        return Err(Error::validation("asaas payment has no id"));
    }

    let customer_email = payment
        .customer
        .as_ref()
        .and_then(|c| c.get("email"))
        .and_then(Value::as_str);
    let customer_name = payment
        .customer
        .as_ref()
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str);
    let email = email_of(
        PROVIDER,
        &[
            payment.customer_email.as_deref(),
            customer_email,
            payment.external_reference.as_deref(),
        ],
    )?;
    let product_name = payment.description.unwrap_or_default();

    let order = PaymentOrder {
        provider: PROVIDER.as_str().to_owned(),
        transaction_id: payment.id,
        email,
        payer_name: payment
            .customer_name
            .or_else(|| customer_name.map(str::to_owned))
            .unwrap_or_default(),
        product: Product::classify(&product_name),
        product_name,
        amount_cents: payment.value.and_then(reais_to_cents),
        paid_at: Utc::now(),
    };
    Ok(match hook.event.as_str() {
        "PAYMENT_CONFIRMED" | "PAYMENT_RECEIVED" | "PAYMENT_RECEIVED_IN_CASH" => {
            PaymentEvent::Paid(order)
        }
        "PAYMENT_CREATED" | "PAYMENT_AWAITING_RISK_ANALYSIS" | "PAYMENT_UPDATED" => {
            PaymentEvent::Pending(order)
        }
        "PAYMENT_REFUNDED" | "PAYMENT_DELETED" | "PAYMENT_CHARGEBACK_REQUESTED"
        | "PAYMENT_OVERDUE" => PaymentEvent::Cancelled(order),
        other => PaymentEvent::Ignored {
            reason: format!("asaas event {other}"),
        },
    })
}

#[derive(Debug, Deserialize)]
struct KiwifyWebhook {
    order_id: String,
    order_status: String,
    #[serde(rename = "Product", default)]
    product: KiwifyProduct,
    #[serde(rename = "Customer", default)]
    customer: KiwifyCustomer,
    #[serde(rename = "Commissions", default)]
    commissions: KiwifyCommissions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifyProduct {
    product_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifyCustomer {
    email: Option<String>,
    full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifyCommissions {
    /// Already in cents.
    charge_amount: Option<Value>,
}

fn kiwify(payload: &Value) -> Result<PaymentEvent> {
    const PROVIDER: Provider = Provider::Kiwify;
    let hook: KiwifyWebhook = decode(PROVIDER, payload)?;
    if hook.order_id.trim().is_empty() {
        return Err(Error::validation("kiwify order has no id"));
    }
    let email = email_of(PROVIDER, &[hook.customer.email.as_deref()])?;
    let amount_cents = match hook.commissions.charge_amount {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };

    let order = PaymentOrder {
        provider: PROVIDER.as_str().to_owned(),
        transaction_id: hook.order_id,
        email,
        payer_name: hook.customer.full_name.unwrap_or_default(),
        product: Product::classify(&hook.product.product_name),
        product_name: hook.product.product_name,
        amount_cents,
        paid_at: Utc::now(),
    };
    Ok(match hook.order_status.as_str() {
        "paid" | "approved" => PaymentEvent::Paid(order),
        "waiting_payment" | "pending" => PaymentEvent::Pending(order),
        "refused" | "refunded" | "chargedback" | "canceled" => PaymentEvent::Cancelled(order),
        other => PaymentEvent::Ignored {
            reason: format!("kiwify status {other}"),
        },
    })
}

/// `{status, email, productName, amount, payerName, transactionId?}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenericWebhook {
    status: String,
    email: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    payer_name: String,
    #[serde(default)]
    transaction_id: Option<String>,
}

fn generic(payload: &Value) -> Result<PaymentEvent> {
    const PROVIDER: Provider = Provider::Generic;
    let hook: GenericWebhook = decode(PROVIDER, payload)?;
    let email = email_of(PROVIDER, &[Some(hook.email.as_str())])?;
    let transaction_id = hook
        .transaction_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| payload_digest(payload));

    let order = PaymentOrder {
        provider: PROVIDER.as_str().to_owned(),
        transaction_id,
        email,
        payer_name: hook.payer_name,
        product: Product::classify(&hook.product_name),
        product_name: hook.product_name,
        amount_cents: hook.amount.and_then(reais_to_cents),
        paid_at: Utc::now(),
    };
    Ok(match hook.status.trim().to_ascii_lowercase().as_str() {
        "paid" => PaymentEvent::Paid(order),
        "pending" => PaymentEvent::Pending(order),
        "cancelled" | "canceled" | "refunded" => PaymentEvent::Cancelled(order),
        other => PaymentEvent::Ignored {
            reason: format!("status {other}"),
        },
    })
}
