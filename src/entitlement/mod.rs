//! Entitlement Service: who may start or continue a production run, and at
//! what price.

pub mod pricing;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::lead::{Lead, LeadStatus, LeadType};
use crate::ledger::Ledger;
use crate::ledger::keys::{email_key, is_plausible_email, normalize_email};
use crate::ledger::repos::{
    CreditRepository, LeadRepository, PlanRepository, ProjectRepository, SettingsRepository,
};
use crate::plan::{PlanStatus, UserPlan};
use pricing::{Offer, Price};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessReport {
    pub email: String,
    pub has_access: bool,
    pub credits: i64,
    pub has_active_project: bool,
    pub lead_status: Option<LeadStatus>,
    pub plan: Option<UserPlan>,
    pub pending_plan: Option<UserPlan>,
    pub payment_bypass: bool,
    pub cycle_index: usize,
    pub discount_level: u8,
    pub book_price: Price,
    /// Renewal price of the effective (active or pending) plan.
    pub plan_price: Option<Price>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumed {
    pub remaining: i64,
    /// The payment bypass flag was on, so nothing was deducted.
    pub bypassed: bool,
}

#[derive(Clone)]
pub struct EntitlementService {
    credits: CreditRepository,
    plans: PlanRepository,
    leads: LeadRepository,
    projects: ProjectRepository,
    settings: SettingsRepository,
    checkout_base_url: String,
}

impl EntitlementService {
    pub fn new(ledger: Ledger, checkout_base_url: impl Into<String>) -> Self {
        Self {
            credits: CreditRepository::new(ledger.clone()),
            plans: PlanRepository::new(ledger.clone()),
            leads: LeadRepository::new(ledger.clone()),
            projects: ProjectRepository::new(ledger.clone()),
            settings: SettingsRepository::new(ledger),
            checkout_base_url: checkout_base_url.into(),
        }
    }

    pub fn leads(&self) -> &LeadRepository {
        &self.leads
    }

    pub fn credits(&self) -> &CreditRepository {
        &self.credits
    }

    pub fn plans(&self) -> &PlanRepository {
        &self.plans
    }

    pub fn settings(&self) -> &SettingsRepository {
        &self.settings
    }

    pub async fn check_access(&self, email: &str) -> Result<AccessReport> {
        self.check_access_at(email, Utc::now()).await
    }

    /// Access rights as of `now`. Ledger read failures degrade to empty
    /// values; only an unusable email is an error.
    pub async fn check_access_at(&self, email: &str, now: DateTime<Utc>) -> Result<AccessReport> {
        let email = validated_email(email)?;
        let key = email_key(&email);

        let credits = self.credits.balance(&email).await.unwrap_or_else(|err| {
            tracing::warn!(email_key = %key, err = ?err, "read credits failed; assuming 0");
            0
        });
        let payment_bypass = self.settings.payment_bypass().await;

        let leads = self.leads.for_email(&email).await.unwrap_or_else(|err| {
            tracing::warn!(email_key = %key, err = ?err, "read leads failed; assuming none");
            Vec::new()
        });
        let latest = leads.iter().max_by_key(|lead| lead.created_at);
        let lead_status = latest.map(|lead| lead.status);

        let usage = leads.iter().filter(|lead| lead.counts_toward_cycle()).count();
        let cycle_index = pricing::cycle_index(usage);

        let mut plan = self.plans.get(&email).await.unwrap_or_else(|err| {
            tracing::warn!(email_key = %key, err = ?err, "read plan failed; assuming none");
            None
        });
        if let Some(active) = plan.as_mut()
            && active.status == PlanStatus::Active
            && active.is_expired_at(now)
        {
            active.status = PlanStatus::Expired;
            if let Err(err) = self.plans.mark_expired(&email).await {
                tracing::warn!(email_key = %key, err = ?err, "mark plan expired failed");
            }
        }
        let pending_plan = latest
            .and_then(|lead| lead.plan.clone())
            .filter(|p| p.status == PlanStatus::Pending);

        let has_active_project = match self.projects.for_email(&email).await {
            Ok(projects) => projects
                .iter()
                .any(|p| p.is_active_generation() && p.metadata.entitled),
            Err(err) => {
                tracing::warn!(email_key = %key, err = ?err, "read projects failed; assuming none");
                false
            }
        };
        let lead_paid = latest.is_some_and(Lead::is_paid);
        // An in-flight project only grants access when it was charged and
        // its lead was paid. Uncharged drafts never count.
        let has_access =
            payment_bypass || credits > 0 || (has_active_project && lead_paid);

        let effective = plan
            .as_ref()
            .filter(|p| p.status != PlanStatus::Expired)
            .or(pending_plan.as_ref());
        let plan_price = effective.map(|p| {
            pricing::price(
                &self.checkout_base_url,
                Offer::Plan {
                    name: p.name,
                    billing: p.billing,
                },
                cycle_index,
            )
        });

        Ok(AccessReport {
            email,
            has_access,
            credits,
            has_active_project,
            lead_status,
            plan,
            pending_plan,
            payment_bypass,
            cycle_index,
            discount_level: pricing::discount_level(usage),
            book_price: pricing::price(&self.checkout_base_url, Offer::Book, cycle_index),
            plan_price,
        })
    }

    /// Takes one credit for a new production run. With the payment bypass
    /// on, nothing is deducted. The email's latest lead moves to
    /// IN_PROGRESS (best-effort).
    pub async fn consume_credit(&self, email: &str) -> Result<Consumed> {
        let email = validated_email(email)?;
        let consumed = if self.settings.payment_bypass().await {
            Consumed {
                remaining: self.credits.balance(&email).await?,
                bypassed: true,
            }
        } else {
            Consumed {
                remaining: self.credits.consume_one(&email).await?,
                bypassed: false,
            }
        };
        tracing::info!(
            email_key = %email_key(&email),
            remaining = consumed.remaining,
            bypassed = consumed.bypassed,
            "credit consumed"
        );

        self.mark_lead(&email, LeadStatus::InProgress).await;
        Ok(consumed)
    }

    pub async fn grant_credit(&self, email: &str, amount: i64) -> Result<i64> {
        let email = validated_email(email)?;
        let balance = self.credits.grant(&email, amount).await?;
        tracing::info!(email_key = %email_key(&email), amount, balance, "credit granted");
        Ok(balance)
    }

    /// Stores `plan` as the user's plan and mirrors it on the latest lead,
    /// which becomes a SUBSCRIBER lead.
    pub async fn activate_plan(&self, email: &str, plan: UserPlan) -> Result<UserPlan> {
        let email = validated_email(email)?;
        let plan = self.plans.activate(&email, plan).await?;
        let snapshot = plan.clone();
        self.leads
            .upsert_for_email(
                &email,
                || Lead::new(&email, "", LeadStatus::Subscriber, LeadType::Subscription),
                |lead| {
                    if lead.status != LeadStatus::Subscriber {
                        // Keep any production progress visible next to the
                        // new primary status.
                        if lead.status.counts_toward_cycle() && lead.production_status.is_none() {
                            lead.production_status = Some(lead.status);
                        }
                        lead.status = LeadStatus::Subscriber;
                    }
                    lead.lead_type = LeadType::Subscription;
                    lead.plan = Some(snapshot.clone());
                },
            )
            .await?;
        tracing::info!(
            email_key = %email_key(&email),
            plan = %plan.name,
            billing = %plan.billing,
            "plan activated"
        );
        Ok(plan)
    }

    /// Records a production transition on the email's latest lead and
    /// reports whether a lead was updated. Failures are logged; production
    /// status is not financially relevant.
    pub async fn mark_lead(&self, email: &str, status: LeadStatus) -> bool {
        let result = self
            .leads
            .update_latest(email, |lead| lead.apply_production_status(status))
            .await;
        match result {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::debug!(email_key = %email_key(email), "no lead to update");
                false
            }
            Err(err) => {
                tracing::warn!(email_key = %email_key(email), %status, err = ?err, "lead status update failed");
                false
            }
        }
    }

    /// Ensures a PENDING BOOK lead exists for someone who hit the paywall.
    pub async fn ensure_pending_lead(&self, email: &str, name: &str) {
        if let Err(err) = self.leads.ensure_pending(email, name, LeadType::Book).await {
            tracing::warn!(email_key = %email_key(email), err = ?err, "create pending lead failed");
        }
    }

    /// Deletes a lead. When it was the last subscription-bearing lead for
    /// its email, the user's plan is revoked too.
    pub async fn delete_lead(&self, id: &str) -> Result<Lead> {
        let deleted = self.leads.delete(id).await?;
        if deleted.carries_subscription() {
            let remaining = self.leads.for_email(&deleted.email).await?;
            if !remaining.iter().any(Lead::carries_subscription) {
                let revoked = self.plans.revoke(&deleted.email).await?;
                tracing::info!(
                    email_key = %email_key(&deleted.email),
                    revoked = revoked.is_some(),
                    "last subscription lead deleted; plan revoked"
                );
            }
        }
        Ok(deleted)
    }
}

fn validated_email(raw: &str) -> Result<String> {
    let email = normalize_email(raw);
    if !is_plausible_email(&email) {
        return Err(Error::validation(format!("invalid email: {raw:?}")));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone as _};

    use super::*;
    use crate::plan::{Billing, PlanName};

    fn service() -> EntitlementService {
        EntitlementService::new(Ledger::in_memory(), "https://pay.example/c")
    }

    #[tokio::test]
    async fn no_credits_no_access() -> anyhow::Result<()> {
        let svc = service();
        let report = svc.check_access("a@b.com").await?;
        assert!(!report.has_access);
        assert_eq!(report.discount_level, 1);
        assert_eq!(report.book_price.cents, 9_700);
        Ok(())
    }

    #[tokio::test]
    async fn bypass_grants_access_without_deducting() -> anyhow::Result<()> {
        let svc = service();
        svc.settings.set_payment_bypass(true).await?;
        assert!(svc.check_access("a@b.com").await?.has_access);
        let consumed = svc.consume_credit("a@b.com").await?;
        assert!(consumed.bypassed);
        assert_eq!(consumed.remaining, 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_plan_is_marked_but_credits_stay() -> anyhow::Result<()> {
        let svc = service();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        svc.activate_plan(
            "a@b.com",
            UserPlan::active(PlanName::Pro, Billing::Monthly, start),
        )
        .await?;
        svc.grant_credit("a@b.com", 2).await?;

        let report = svc
            .check_access_at("a@b.com", start + Duration::days(40))
            .await?;
        assert_eq!(report.plan.map(|p| p.status), Some(PlanStatus::Expired));
        assert_eq!(report.credits, 2);
        assert!(report.has_access);
        assert_eq!(
            svc.plans.get("a@b.com").await?.map(|p| p.status),
            Some(PlanStatus::Expired)
        );
        Ok(())
    }

    #[tokio::test]
    async fn consume_moves_lead_to_in_progress() -> anyhow::Result<()> {
        let svc = service();
        svc.ensure_pending_lead("a@b.com", "Ana").await;
        svc.grant_credit("a@b.com", 1).await?;
        assert_eq!(svc.consume_credit("A@B.com").await?.remaining, 0);
        let lead = svc.leads.latest_for_email("a@b.com").await?.expect("lead");
        assert_eq!(lead.status, LeadStatus::InProgress);
        Ok(())
    }

    #[tokio::test]
    async fn mark_lead_reports_whether_a_lead_changed() -> anyhow::Result<()> {
        let svc = service();
        assert!(!svc.mark_lead("a@b.com", LeadStatus::Delivered).await);
        svc.ensure_pending_lead("a@b.com", "Ana").await;
        assert!(svc.mark_lead("a@b.com", LeadStatus::Delivered).await);
        let lead = svc.leads.latest_for_email("a@b.com").await?.expect("lead");
        assert_eq!(lead.status, LeadStatus::Delivered);
        Ok(())
    }

    #[tokio::test]
    async fn uncharged_drafts_do_not_count_as_active_projects() -> anyhow::Result<()> {
        let svc = service();
        svc.leads
            .insert(Lead::new("a@b.com", "Ana", LeadStatus::Delivered, LeadType::Book))
            .await?;
        let request = crate::project::NewProject {
            topic: "Rascunho".to_owned(),
            email: "a@b.com".to_owned(),
            ..Default::default()
        };
        svc.projects
            .insert(crate::project::Project::new(&request, false))
            .await?;
        let report = svc.check_access("a@b.com").await?;
        assert!(!report.has_active_project);
        assert!(!report.has_access);

        svc.projects
            .insert(crate::project::Project::new(&request, true))
            .await?;
        let report = svc.check_access("a@b.com").await?;
        assert!(report.has_active_project);
        assert!(report.has_access);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let err = service().check_access("not-an-email").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
