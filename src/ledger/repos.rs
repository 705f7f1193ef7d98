//! Typed, schema-validated access to each ledger root.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Ledger;
use super::keys::email_key;
use crate::error::{Error, Result};
use crate::lead::{Lead, LeadStatus, LeadType};
use crate::plan::{PlanStatus, UserPlan};
use crate::project::Project;

pub const LEADS: &str = "leads";
pub const CREDITS: &str = "credits";
pub const USERS: &str = "users";
pub const PROJECTS: &str = "projects";
pub const ORDERS: &str = "orders";
pub const SETTINGS: &str = "settings";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<UserPlan>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub transaction_id: String,
    pub provider: String,
    pub email: String,
    pub product_name: String,
    pub credits: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    #[serde(default)]
    pub payment_bypass: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

type LeadsRoot = Vec<Lead>;
type CreditsRoot = BTreeMap<String, i64>;
type UsersRoot = BTreeMap<String, UserRecord>;
type ProjectsRoot = BTreeMap<String, Project>;
type OrdersRoot = BTreeMap<String, OrderRecord>;

/// Most recent lead for `email`; later entries win ties.
fn latest_index(leads: &[Lead], email: &str) -> Option<usize> {
    leads
        .iter()
        .enumerate()
        .filter(|(_, lead)| lead.matches_email(email))
        .max_by_key(|(idx, lead)| (lead.created_at, *idx))
        .map(|(idx, _)| idx)
}

#[derive(Clone)]
pub struct LeadRepository {
    ledger: Ledger,
}

impl LeadRepository {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub async fn list(&self) -> Result<Vec<Lead>> {
        Ok(self.ledger.read_typed::<LeadsRoot>(LEADS).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Lead> {
        self.list()
            .await?
            .into_iter()
            .find(|lead| lead.id == id)
            .ok_or_else(|| Error::not_found("lead", id))
    }

    pub async fn for_email(&self, email: &str) -> Result<Vec<Lead>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|lead| lead.matches_email(email))
            .collect())
    }

    pub async fn latest_for_email(&self, email: &str) -> Result<Option<Lead>> {
        let leads = self.list().await?;
        Ok(latest_index(&leads, email).map(|idx| leads[idx].clone()))
    }

    pub async fn insert(&self, lead: Lead) -> Result<Lead> {
        self.ledger
            .update_typed::<LeadsRoot, _, Error, _>(LEADS, |leads| {
                if leads.iter().any(|existing| existing.id == lead.id) {
                    return Err(Error::Conflict {
                        kind: "lead",
                        id: lead.id.clone(),
                    });
                }
                leads.push(lead.clone());
                Ok(())
            })
            .await?;
        Ok(lead)
    }

    /// Returns the most recent lead for `email`, creating a PENDING one of
    /// `lead_type` when the email has none.
    pub async fn ensure_pending(
        &self,
        email: &str,
        name: &str,
        lead_type: LeadType,
    ) -> Result<Lead> {
        self.ledger
            .update_typed::<LeadsRoot, _, Error, _>(LEADS, |leads| {
                if let Some(idx) = latest_index(leads, email) {
                    return Ok(leads[idx].clone());
                }
                let lead = Lead::new(email, name, LeadStatus::Pending, lead_type);
                leads.push(lead.clone());
                Ok(lead)
            })
            .await
    }

    /// Applies `mutate` to the most recent lead for `email`, creating one
    /// from `template` first when none exists. The version is bumped only
    /// when the lead actually changed.
    pub async fn upsert_for_email<F>(
        &self,
        email: &str,
        template: impl Fn() -> Lead,
        mut mutate: F,
    ) -> Result<Lead>
    where
        F: FnMut(&mut Lead),
    {
        self.ledger
            .update_typed::<LeadsRoot, _, Error, _>(LEADS, |leads| {
                let idx = match latest_index(leads, email) {
                    Some(idx) => idx,
                    None => {
                        leads.push(template());
                        leads.len() - 1
                    }
                };
                let lead = &mut leads[idx];
                let before = lead.clone();
                mutate(lead);
                touch_lead(lead, &before);
                Ok(lead.clone())
            })
            .await
    }

    /// Mutates the most recent lead for `email`; `None` when there is none.
    pub async fn update_latest<F>(&self, email: &str, mut mutate: F) -> Result<Option<Lead>>
    where
        F: FnMut(&mut Lead),
    {
        self.ledger
            .update_typed::<LeadsRoot, _, Error, _>(LEADS, |leads| {
                let Some(idx) = latest_index(leads, email) else {
                    return Ok(None);
                };
                let lead = &mut leads[idx];
                let before = lead.clone();
                mutate(lead);
                touch_lead(lead, &before);
                Ok(Some(lead.clone()))
            })
            .await
    }

    /// Writes back a lead read earlier. Fails with `Conflict` when someone
    /// else saved it in between.
    pub async fn save(&self, lead: &Lead) -> Result<Lead> {
        self.ledger
            .update_typed::<LeadsRoot, _, Error, _>(LEADS, |leads| {
                let current = leads
                    .iter_mut()
                    .find(|existing| existing.id == lead.id)
                    .ok_or_else(|| Error::not_found("lead", &lead.id))?;
                if current.version != lead.version {
                    return Err(Error::Conflict {
                        kind: "lead",
                        id: lead.id.clone(),
                    });
                }
                let before = current.clone();
                *current = lead.clone();
                touch_lead(current, &before);
                Ok(current.clone())
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<Lead> {
        self.ledger
            .update_typed::<LeadsRoot, _, Error, _>(LEADS, |leads| {
                let idx = leads
                    .iter()
                    .position(|lead| lead.id == id)
                    .ok_or_else(|| Error::not_found("lead", id))?;
                Ok(leads.remove(idx))
            })
            .await
    }
}

fn touch_lead(lead: &mut Lead, before: &Lead) {
    if lead != before {
        lead.version = before.version + 1;
        lead.updated_at = Utc::now();
    }
}

#[derive(Clone)]
pub struct CreditRepository {
    ledger: Ledger,
}

impl CreditRepository {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub async fn balance(&self, email: &str) -> Result<i64> {
        let credits = self.ledger.read_typed::<CreditsRoot>(CREDITS).await?;
        Ok(credits.get(&email_key(email)).copied().unwrap_or(0))
    }

    /// Adds `amount` credits and returns the new balance.
    pub async fn grant(&self, email: &str, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(Error::validation(format!(
                "credit grant must be positive, got {amount}"
            )));
        }
        let key = email_key(email);
        self.ledger
            .update_typed::<CreditsRoot, _, Error, _>(CREDITS, |credits| {
                let balance = credits.entry(key.clone()).or_insert(0);
                *balance = balance.saturating_add(amount);
                Ok(*balance)
            })
            .await
    }

    /// Takes one credit. A zero balance fails with `PaymentRequired` and is
    /// left untouched.
    pub async fn consume_one(&self, email: &str) -> Result<i64> {
        let key = email_key(email);
        self.ledger
            .update_typed::<CreditsRoot, _, Error, _>(CREDITS, |credits| {
                let balance = credits.get(&key).copied().unwrap_or(0);
                if balance <= 0 {
                    return Err(Error::PaymentRequired {
                        email: email.to_owned(),
                    });
                }
                credits.insert(key.clone(), balance - 1);
                Ok(balance - 1)
            })
            .await
    }

    /// Admin override; negative values are rejected.
    pub async fn set(&self, email: &str, balance: i64) -> Result<i64> {
        if balance < 0 {
            return Err(Error::validation("credit balance cannot be negative"));
        }
        let key = email_key(email);
        self.ledger
            .update_typed::<CreditsRoot, _, Error, _>(CREDITS, |credits| {
                credits.insert(key.clone(), balance);
                Ok(balance)
            })
            .await
    }
}

#[derive(Clone)]
pub struct PlanRepository {
    ledger: Ledger,
}

impl PlanRepository {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub async fn get(&self, email: &str) -> Result<Option<UserPlan>> {
        let users = self.ledger.read_typed::<UsersRoot>(USERS).await?;
        Ok(users.get(&email_key(email)).and_then(|u| u.plan.clone()))
    }

    pub async fn activate(&self, email: &str, plan: UserPlan) -> Result<UserPlan> {
        let key = email_key(email);
        self.ledger
            .update_typed::<UsersRoot, _, Error, _>(USERS, |users| {
                users.entry(key.clone()).or_default().plan = Some(plan.clone());
                Ok(plan.clone())
            })
            .await
    }

    pub async fn mark_expired(&self, email: &str) -> Result<()> {
        let key = email_key(email);
        self.ledger
            .update_typed::<UsersRoot, _, Error, _>(USERS, |users| {
                if let Some(plan) = users.get_mut(&key).and_then(|u| u.plan.as_mut())
                    && plan.status == PlanStatus::Active
                {
                    plan.status = PlanStatus::Expired;
                }
                Ok(())
            })
            .await
    }

    pub async fn revoke(&self, email: &str) -> Result<Option<UserPlan>> {
        let key = email_key(email);
        self.ledger
            .update_typed::<UsersRoot, _, Error, _>(USERS, |users| {
                Ok(users.get_mut(&key).and_then(|u| u.plan.take()))
            })
            .await
    }
}

#[derive(Clone)]
pub struct ProjectRepository {
    ledger: Ledger,
}

impl ProjectRepository {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub async fn find(&self, id: &str) -> Result<Option<Project>> {
        let projects = self.ledger.read_typed::<ProjectsRoot>(PROJECTS).await?;
        Ok(projects.get(id).cloned())
    }

    pub async fn get(&self, id: &str) -> Result<Project> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::not_found("project", id))
    }

    /// All projects, newest first.
    pub async fn list(&self) -> Result<Vec<Project>> {
        let projects = self.ledger.read_typed::<ProjectsRoot>(PROJECTS).await?;
        let mut projects: Vec<Project> = projects.into_values().collect();
        projects.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
        Ok(projects)
    }

    pub async fn for_email(&self, email: &str) -> Result<Vec<Project>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|project| project.belongs_to(email))
            .collect())
    }

    pub async fn insert(&self, project: Project) -> Result<Project> {
        self.ledger
            .update_typed::<ProjectsRoot, _, Error, _>(PROJECTS, |projects| {
                if projects.contains_key(&project.id) {
                    return Err(Error::Conflict {
                        kind: "project",
                        id: project.id.clone(),
                    });
                }
                projects.insert(project.id.clone(), project.clone());
                Ok(())
            })
            .await?;
        Ok(project)
    }

    /// Read-modify-write of one project. `mutate` sees the latest stored
    /// copy and may run more than once; returning an error aborts without
    /// writing.
    pub async fn update<R, F>(&self, id: &str, mut mutate: F) -> Result<R>
    where
        F: FnMut(&mut Project) -> Result<R>,
    {
        self.ledger
            .update_typed::<ProjectsRoot, _, Error, _>(PROJECTS, |projects| {
                let project = projects
                    .get_mut(id)
                    .ok_or_else(|| Error::not_found("project", id))?;
                let before = project.clone();
                let out = mutate(project)?;
                touch_project(project, &before);
                Ok(out)
            })
            .await
    }

    /// Writes back a project read earlier, rejecting stale copies.
    pub async fn save(&self, project: &Project) -> Result<Project> {
        self.update(&project.id, |current| {
            if current.version != project.version {
                return Err(Error::Conflict {
                    kind: "project",
                    id: project.id.clone(),
                });
            }
            *current = project.clone();
            Ok(())
        })
        .await?;
        self.get(&project.id).await
    }
}

fn touch_project(project: &mut Project, before: &Project) {
    if project != before {
        project.version = before.version + 1;
        project.metadata.updated_at = Utc::now();
    }
}

#[derive(Clone)]
pub struct OrderRepository {
    ledger: Ledger,
}

impl OrderRepository {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub async fn get(&self, transaction_id: &str) -> Result<Option<OrderRecord>> {
        let orders = self.ledger.read_typed::<OrdersRoot>(ORDERS).await?;
        Ok(orders.get(transaction_id).cloned())
    }

    /// Records the order unless its transaction id is already known.
    /// Returns `false` for a duplicate.
    pub async fn record_if_absent(&self, order: &OrderRecord) -> Result<bool> {
        self.ledger
            .update_typed::<OrdersRoot, _, Error, _>(ORDERS, |orders| {
                if orders.contains_key(&order.transaction_id) {
                    return Ok(false);
                }
                orders.insert(order.transaction_id.clone(), order.clone());
                Ok(true)
            })
            .await
    }

    pub async fn remove(&self, transaction_id: &str) -> Result<()> {
        self.ledger
            .update_typed::<OrdersRoot, _, Error, _>(ORDERS, |orders| {
                orders.remove(transaction_id);
                Ok(())
            })
            .await
    }
}

#[derive(Clone)]
pub struct SettingsRepository {
    ledger: Ledger,
}

impl SettingsRepository {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Unreadable settings count as "no bypass".
    pub async fn payment_bypass(&self) -> bool {
        match self.ledger.read_typed::<SettingsRecord>(SETTINGS).await {
            Ok(settings) => settings.payment_bypass,
            Err(err) => {
                tracing::warn!(err = ?err, "read settings failed; payment bypass off");
                false
            }
        }
    }

    pub async fn set_payment_bypass(&self, enabled: bool) -> Result<()> {
        self.ledger
            .update_typed::<SettingsRecord, _, Error, _>(SETTINGS, |settings| {
                settings.payment_bypass = enabled;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::plan::{Billing, PlanName};
    use crate::project::{NewProject, ProjectStatus};

    #[tokio::test]
    async fn consume_never_goes_negative() -> anyhow::Result<()> {
        let credits = CreditRepository::new(Ledger::in_memory());
        assert_eq!(credits.grant("A@b.com", 2).await?, 2);
        assert_eq!(credits.consume_one("a@b.com").await?, 1);
        assert_eq!(credits.consume_one("a@b.com ").await?, 0);
        let err = credits.consume_one("a@b.com").await.unwrap_err();
        assert_eq!(err.code(), "PAYMENT_REQUIRED");
        assert_eq!(credits.balance("a@b.com").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn grant_rejects_non_positive_amounts() {
        let credits = CreditRepository::new(Ledger::in_memory());
        assert!(credits.grant("a@b.com", 0).await.is_err());
        assert!(credits.grant("a@b.com", -3).await.is_err());
    }

    #[tokio::test]
    async fn latest_lead_wins_for_email() -> anyhow::Result<()> {
        let leads = LeadRepository::new(Ledger::in_memory());
        let mut old = Lead::new("a@b.com", "Ana", LeadStatus::Delivered, LeadType::Book);
        old.created_at = Utc::now() - chrono::Duration::days(3);
        leads.insert(old).await?;
        let new = leads
            .insert(Lead::new("A@B.com", "Ana", LeadStatus::Pending, LeadType::Book))
            .await?;

        let latest = leads.latest_for_email("a@b.com").await?.expect("lead");
        assert_eq!(latest.id, new.id);
        assert_eq!(leads.for_email("a@b.com").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn stale_lead_save_is_rejected() -> anyhow::Result<()> {
        let leads = LeadRepository::new(Ledger::in_memory());
        let lead = leads
            .insert(Lead::new("a@b.com", "Ana", LeadStatus::Pending, LeadType::Book))
            .await?;

        let mut first = lead.clone();
        first.tag = Some("webhook".to_owned());
        let saved = leads.save(&first).await?;
        assert_eq!(saved.version, 1);

        let mut second = lead;
        second.status = LeadStatus::InProgress;
        let err = leads.save(&second).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        Ok(())
    }

    #[tokio::test]
    async fn project_update_bumps_version_only_on_change() -> anyhow::Result<()> {
        let projects = ProjectRepository::new(Ledger::in_memory());
        let request = NewProject {
            topic: "T".to_owned(),
            email: "a@b.com".to_owned(),
            ..NewProject::default()
        };
        let project = projects.insert(Project::new(&request, true)).await?;

        projects.update(&project.id, |_| Ok(())).await?;
        assert_eq!(projects.get(&project.id).await?.version, 0);

        projects
            .update(&project.id, |p| {
                p.set_progress(ProjectStatus::Researching, 2, "Pesquisando");
                Ok(())
            })
            .await?;
        let stored = projects.get(&project.id).await?;
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status(), ProjectStatus::Researching);

        let err = projects.save(&project).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        Ok(())
    }

    #[tokio::test]
    async fn orders_are_recorded_once() -> anyhow::Result<()> {
        let orders = OrderRepository::new(Ledger::in_memory());
        let order = OrderRecord {
            transaction_id: "pay_1".to_owned(),
            provider: "asaas".to_owned(),
            email: "a@b.com".to_owned(),
            product_name: "Livro".to_owned(),
            credits: 1,
            recorded_at: Utc::now(),
        };
        assert!(orders.record_if_absent(&order).await?);
        assert!(!orders.record_if_absent(&order).await?);
        orders.remove("pay_1").await?;
        assert!(orders.get("pay_1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn plan_round_trip_keeps_unknown_user_fields() -> anyhow::Result<()> {
        let ledger = Ledger::in_memory();
        ledger.set("users/a_b_com/nickname", json!("ana")).await;
        let plans = PlanRepository::new(ledger.clone());
        plans
            .activate(
                "a@b.com",
                UserPlan::active(PlanName::Pro, Billing::Monthly, Utc::now()),
            )
            .await?;
        plans.mark_expired("a@b.com").await?;

        let plan = plans.get("a@b.com").await?.expect("plan");
        assert_eq!(plan.status, PlanStatus::Expired);
        assert_eq!(ledger.get("users/a_b_com/nickname").await, Some(json!("ana")));
        Ok(())
    }

    #[tokio::test]
    async fn settings_bypass_defaults_off() -> anyhow::Result<()> {
        let settings = SettingsRepository::new(Ledger::in_memory());
        assert!(!settings.payment_bypass().await);
        settings.set_payment_bypass(true).await?;
        assert!(settings.payment_bypass().await);
        Ok(())
    }
}
