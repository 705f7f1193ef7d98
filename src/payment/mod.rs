//! Payment webhooks: provider payloads are normalized into one
//! [`PaymentEvent`] and applied to the entitlement ledger exactly once per
//! transaction id.

pub mod adapters;

pub use adapters::Provider;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use subtle::ConstantTimeEq as _;

use crate::entitlement::EntitlementService;
use crate::error::{Error, Result};
use crate::lead::{Lead, LeadStatus, LeadType, PaymentInfo};
use crate::ledger::Ledger;
use crate::ledger::keys::email_key;
use crate::ledger::repos::{OrderRecord, OrderRepository};
use crate::plan::{Billing, PlanName, UserPlan};

/// What was bought, derived from the provider's product name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Product {
    Book,
    Diagramming,
    Voucher,
    Subscription { plan: PlanName, billing: Billing },
}

impl Product {
    pub fn classify(product_name: &str) -> Self {
        let lowered = product_name.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |w: &str| words.contains(&w);

        let plan = PlanName::ALL
            .into_iter()
            .rev()
            .find(|p| has(&p.as_str().to_lowercase()));
        let subscription_words = ["plano", "assinatura", "subscription", "plan"];
        if let Some(plan) = plan
            && (subscription_words.iter().any(|&w| has(w)) || plan != PlanName::Pro)
        {
            let billing = words
                .iter()
                .find_map(|w| Billing::parse(w))
                .unwrap_or(Billing::Monthly);
            return Self::Subscription { plan, billing };
        }
        if words.iter().any(|w| w.starts_with("diagrama")) {
            return Self::Diagramming;
        }
        if has("voucher") || has("cupom") {
            return Self::Voucher;
        }
        Self::Book
    }

    pub fn lead_type(self) -> LeadType {
        match self {
            Self::Book => LeadType::Book,
            Self::Diagramming => LeadType::Diagramming,
            Self::Voucher => LeadType::Voucher,
            Self::Subscription { .. } => LeadType::Subscription,
        }
    }

    /// Generation credits the purchase grants.
    pub fn credits(self) -> i64 {
        match self {
            Self::Book | Self::Diagramming | Self::Voucher => 1,
            Self::Subscription { plan, billing } => plan.included_credits(billing),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOrder {
    pub provider: String,
    pub transaction_id: String,
    pub email: String,
    pub payer_name: String,
    pub product_name: String,
    pub product: Product,
    pub amount_cents: Option<i64>,
    pub paid_at: DateTime<Utc>,
}

impl PaymentOrder {
    fn payment_info(&self) -> PaymentInfo {
        PaymentInfo {
            provider: self.provider.clone(),
            transaction_id: self.transaction_id.clone(),
            amount_cents: self.amount_cents,
            product_name: self.product_name.clone(),
            paid_at: self.paid_at,
        }
    }
}

/// One normalized provider notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    Paid(PaymentOrder),
    Pending(PaymentOrder),
    Cancelled(PaymentOrder),
    Ignored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum WebhookOutcome {
    Applied {
        transaction_id: String,
        credits: i64,
        balance: i64,
    },
    /// The transaction id was seen before; nothing changed.
    Duplicate { transaction_id: String },
    LeadRecorded { status: LeadStatus },
    Ignored { reason: String },
}

#[derive(Clone)]
pub struct PaymentProcessor {
    entitlement: EntitlementService,
    orders: OrderRepository,
    webhook_token: Option<String>,
}

impl PaymentProcessor {
    pub fn new(ledger: Ledger, entitlement: EntitlementService, webhook_token: Option<String>) -> Self {
        Self {
            entitlement,
            orders: OrderRepository::new(ledger),
            webhook_token: webhook_token.filter(|t| !t.is_empty()),
        }
    }

    /// Without a configured token every webhook is refused.
    pub fn verify_token(&self, presented: Option<&str>) -> Result<()> {
        let (Some(expected), Some(presented)) = (self.webhook_token.as_deref(), presented) else {
            return Err(Error::Unauthorized);
        };
        if bool::from(expected.as_bytes().ct_eq(presented.trim().as_bytes())) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    /// Authenticates, normalizes and applies one provider delivery.
    pub async fn handle(
        &self,
        provider: Provider,
        token: Option<&str>,
        payload: &Value,
    ) -> Result<WebhookOutcome> {
        self.verify_token(token)?;
        let event = provider.parse_event(payload)?;
        self.apply(event).await
    }

    pub async fn apply(&self, event: PaymentEvent) -> Result<WebhookOutcome> {
        match event {
            PaymentEvent::Paid(order) => self.apply_paid(order).await,
            PaymentEvent::Pending(order) => {
                self.entitlement
                    .leads()
                    .ensure_pending(&order.email, &order.payer_name, order.product.lead_type())
                    .await?;
                tracing::info!(
                    email_key = %email_key(&order.email),
                    transaction_id = %order.transaction_id,
                    "payment pending"
                );
                Ok(WebhookOutcome::LeadRecorded {
                    status: LeadStatus::Pending,
                })
            }
            PaymentEvent::Cancelled(order) => {
                self.entitlement
                    .mark_lead(&order.email, LeadStatus::Cancelled)
                    .await;
                tracing::info!(
                    email_key = %email_key(&order.email),
                    transaction_id = %order.transaction_id,
                    "payment cancelled"
                );
                Ok(WebhookOutcome::LeadRecorded {
                    status: LeadStatus::Cancelled,
                })
            }
            PaymentEvent::Ignored { reason } => {
                tracing::debug!(reason, "webhook ignored");
                Ok(WebhookOutcome::Ignored { reason })
            }
        }
    }

    /// Records the order first so a redelivery is recognized; if granting
    /// fails afterwards the record is removed so the provider's retry can
    /// apply it.
    async fn apply_paid(&self, order: PaymentOrder) -> Result<WebhookOutcome> {
        let credits = order.product.credits();
        let record = OrderRecord {
            transaction_id: order.transaction_id.clone(),
            provider: order.provider.clone(),
            email: order.email.clone(),
            product_name: order.product_name.clone(),
            credits,
            recorded_at: Utc::now(),
        };
        if !self.orders.record_if_absent(&record).await? {
            tracing::info!(transaction_id = %order.transaction_id, "duplicate payment ignored");
            return Ok(WebhookOutcome::Duplicate {
                transaction_id: order.transaction_id,
            });
        }

        match self.grant(&order, credits).await {
            Ok(balance) => {
                tracing::info!(
                    email_key = %email_key(&order.email),
                    transaction_id = %order.transaction_id,
                    credits,
                    balance,
                    "payment applied"
                );
                Ok(WebhookOutcome::Applied {
                    transaction_id: order.transaction_id,
                    credits,
                    balance,
                })
            }
            Err(err) => {
                if let Err(remove_err) = self.orders.remove(&order.transaction_id).await {
                    tracing::error!(
                        transaction_id = %order.transaction_id,
                        err = ?remove_err,
                        "order rollback failed; redelivery will be treated as duplicate"
                    );
                }
                Err(err)
            }
        }
    }

    async fn grant(&self, order: &PaymentOrder, credits: i64) -> Result<i64> {
        let info = order.payment_info();
        if let Product::Subscription { plan, billing } = order.product {
            self.entitlement
                .activate_plan(&order.email, UserPlan::active(plan, billing, order.paid_at))
                .await?;
            self.entitlement
                .leads()
                .update_latest(&order.email, |lead| {
                    lead.payment_info = Some(info.clone());
                    if lead.name.is_empty() {
                        lead.name = order.payer_name.trim().to_owned();
                    }
                })
                .await?;
        } else {
            let lead_type = order.product.lead_type();
            self.entitlement
                .leads()
                .upsert_for_email(
                    &order.email,
                    || Lead::new(&order.email, &order.payer_name, LeadStatus::Approved, lead_type),
                    |lead| {
                        lead.apply_production_status(LeadStatus::Approved);
                        lead.payment_info = Some(info.clone());
                        if lead.status != LeadStatus::Subscriber {
                            lead.lead_type = lead_type;
                        }
                    },
                )
                .await?;
        }
        self.entitlement.grant_credit(&order.email, credits).await
    }
}
