use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::keys::normalize_email;
use crate::plan::UserPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "SUBSCRIBER")]
    Subscriber,
    #[serde(rename = "SUBSCRIBER_PENDING")]
    SubscriberPending,
    #[serde(rename = "LIVRO ENTREGUE")]
    Delivered,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Approved => "APPROVED",
            Self::Completed => "COMPLETED",
            Self::Subscriber => "SUBSCRIBER",
            Self::SubscriberPending => "SUBSCRIBER_PENDING",
            Self::Delivered => "LIVRO ENTREGUE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Statuses that count as one completed purchase in the discount cycle.
    pub fn counts_toward_cycle(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Completed | Self::Delivered | Self::InProgress
        )
    }

    pub fn is_paid(self) -> bool {
        self.counts_toward_cycle() || self == Self::Subscriber
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadType {
    Book,
    Diagramming,
    Voucher,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub provider: String,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
    pub product_name: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub status: LeadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_status: Option<LeadStatus>,
    #[serde(rename = "type")]
    pub lead_type: LeadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<UserPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_info: Option<PaymentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Lead {
    pub fn new(email: &str, name: &str, status: LeadStatus, lead_type: LeadType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            name: name.trim().to_owned(),
            phone: None,
            status,
            production_status: None,
            lead_type,
            plan: None,
            payment_info: None,
            tag: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn matches_email(&self, email: &str) -> bool {
        normalize_email(&self.email) == normalize_email(email)
    }

    /// Records a production transition. A SUBSCRIBER lead keeps its primary
    /// status; the transition lands on `productionStatus` instead.
    pub fn apply_production_status(&mut self, status: LeadStatus) {
        if self.status == LeadStatus::Subscriber {
            self.production_status = Some(status);
        } else {
            self.status = status;
        }
    }

    pub fn counts_toward_cycle(&self) -> bool {
        self.status.counts_toward_cycle()
            || self
                .production_status
                .is_some_and(LeadStatus::counts_toward_cycle)
    }

    pub fn is_paid(&self) -> bool {
        self.status.is_paid() || self.production_status.is_some_and(LeadStatus::is_paid)
    }

    pub fn carries_subscription(&self) -> bool {
        self.lead_type == LeadType::Subscription
            || matches!(
                self.status,
                LeadStatus::Subscriber | LeadStatus::SubscriberPending
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_status_is_preserved() {
        let mut lead = Lead::new("a@b.com", "Ana", LeadStatus::Subscriber, LeadType::Subscription);
        lead.apply_production_status(LeadStatus::InProgress);
        assert_eq!(lead.status, LeadStatus::Subscriber);
        assert_eq!(lead.production_status, Some(LeadStatus::InProgress));
        assert!(lead.counts_toward_cycle());
    }

    #[test]
    fn regular_lead_status_is_replaced() {
        let mut lead = Lead::new("a@b.com", "Ana", LeadStatus::Pending, LeadType::Book);
        assert!(!lead.is_paid());
        lead.apply_production_status(LeadStatus::InProgress);
        assert_eq!(lead.status, LeadStatus::InProgress);
        assert!(lead.production_status.is_none());
        assert!(lead.is_paid());
    }

    #[test]
    fn delivered_uses_legacy_wire_name() {
        let lead = Lead::new(" A@B.com ", "", LeadStatus::Delivered, LeadType::Book);
        let value = serde_json::to_value(&lead).unwrap();
        assert_eq!(value["status"], "LIVRO ENTREGUE");
        assert_eq!(value["type"], "BOOK");
        assert_eq!(value["email"], "a@b.com");
    }
}
