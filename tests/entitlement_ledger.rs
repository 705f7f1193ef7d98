use std::sync::Arc;

use chrono::{Duration, TimeZone as _, Utc};

use bookforge::entitlement::EntitlementService;
use bookforge::lead::{Lead, LeadStatus, LeadType};
use bookforge::ledger::{FileLedger, Ledger};
use bookforge::plan::{Billing, PlanName, PlanStatus, UserPlan};

const EMAIL: &str = "leitor@exemplo.com";

fn service(ledger: Ledger) -> EntitlementService {
    EntitlementService::new(ledger, "https://pay.example/checkout")
}

#[tokio::test]
async fn credits_are_conserved_across_grants_and_consumption() -> anyhow::Result<()> {
    let svc = service(Ledger::in_memory());
    assert_eq!(svc.grant_credit(EMAIL, 3).await?, 3);

    for expected in [2, 1, 0] {
        assert_eq!(svc.consume_credit(EMAIL).await?.remaining, expected);
    }
    let err = svc.consume_credit(EMAIL).await.unwrap_err();
    assert_eq!(err.code(), "PAYMENT_REQUIRED");
    assert_eq!(svc.credits().balance(EMAIL).await?, 0);

    let err = svc.grant_credit(EMAIL, 0).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    Ok(())
}

#[tokio::test]
async fn emails_are_matched_case_insensitively() -> anyhow::Result<()> {
    let svc = service(Ledger::in_memory());
    svc.grant_credit("  Leitor@Exemplo.COM ", 1).await?;
    let report = svc.check_access(EMAIL).await?;
    assert!(report.has_access);
    assert_eq!(report.credits, 1);
    assert_eq!(report.email, EMAIL);
    Ok(())
}

#[tokio::test]
async fn concurrent_grants_are_all_counted() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ledger = Ledger::new(Arc::new(FileLedger::new(dir.path())));
    let svc = service(ledger);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let svc = svc.clone();
        tasks.push(tokio::spawn(async move { svc.grant_credit(EMAIL, 1).await }));
    }
    for task in tasks {
        task.await??;
    }
    assert_eq!(svc.credits().balance(EMAIL).await?, 16);
    Ok(())
}

#[tokio::test]
async fn file_ledger_survives_a_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let svc = service(Ledger::new(Arc::new(FileLedger::new(dir.path()))));
        svc.grant_credit(EMAIL, 2).await?;
        svc.leads()
            .ensure_pending(EMAIL, "Leitor", LeadType::Book)
            .await?;
        svc.settings().set_payment_bypass(true).await?;
    }

    let svc = service(Ledger::new(Arc::new(FileLedger::new(dir.path()))));
    assert_eq!(svc.credits().balance(EMAIL).await?, 2);
    let lead = svc.leads().latest_for_email(EMAIL).await?.expect("lead");
    assert_eq!(lead.status, LeadStatus::Pending);
    assert!(svc.check_access(EMAIL).await?.payment_bypass);
    Ok(())
}

#[tokio::test]
async fn discount_tier_follows_the_purchase_cycle() -> anyhow::Result<()> {
    let svc = service(Ledger::in_memory());
    let fresh = svc.check_access(EMAIL).await?;
    assert_eq!(fresh.cycle_index, 0);
    assert_eq!(fresh.discount_level, 1);
    assert_eq!(fresh.book_price.cents, 9_700);

    for status in [
        LeadStatus::Delivered,
        LeadStatus::Approved,
        LeadStatus::Completed,
        LeadStatus::Pending,
        LeadStatus::Cancelled,
    ] {
        svc.leads()
            .insert(Lead::new(EMAIL, "Leitor", status, LeadType::Book))
            .await?;
    }
    let report = svc.check_access(EMAIL).await?;
    assert_eq!(report.cycle_index, 3);
    assert_eq!(report.discount_level, 4);
    assert_eq!(report.book_price.cents, 6_700);
    assert!(report.book_price.checkout_url.ends_with("/book-t4"));

    // The fifth purchase wraps back to the first tier.
    svc.leads()
        .insert(Lead::new(EMAIL, "Leitor", LeadStatus::Delivered, LeadType::Book))
        .await?;
    let report = svc.check_access(EMAIL).await?;
    assert_eq!(report.discount_level, 1);
    assert_eq!(report.book_price.cents, 9_700);
    Ok(())
}

#[tokio::test]
async fn subscriber_status_survives_production_updates() -> anyhow::Result<()> {
    let svc = service(Ledger::in_memory());
    svc.activate_plan(
        EMAIL,
        UserPlan::active(PlanName::Pro, Billing::Monthly, Utc::now()),
    )
    .await?;
    svc.grant_credit(EMAIL, 1).await?;

    svc.consume_credit(EMAIL).await?;
    svc.mark_lead(EMAIL, LeadStatus::Delivered).await;

    let lead = svc.leads().latest_for_email(EMAIL).await?.expect("lead");
    assert_eq!(lead.status, LeadStatus::Subscriber);
    assert_eq!(lead.production_status, Some(LeadStatus::Delivered));
    assert_eq!(lead.lead_type, LeadType::Subscription);

    let report = svc.check_access(EMAIL).await?;
    assert_eq!(report.plan.map(|p| p.name), Some(PlanName::Pro));
    assert_eq!(report.plan_price.map(|p| p.cents), Some(8_700));
    Ok(())
}

#[tokio::test]
async fn expired_plans_are_flagged_on_access_check() -> anyhow::Result<()> {
    let svc = service(Ledger::in_memory());
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    svc.activate_plan(EMAIL, UserPlan::active(PlanName::Black, Billing::Annual, start))
        .await?;

    let within = svc
        .check_access_at(EMAIL, start + Duration::days(300))
        .await?;
    assert_eq!(within.plan.map(|p| p.status), Some(PlanStatus::Active));

    let after = svc
        .check_access_at(EMAIL, start + Duration::days(370))
        .await?;
    assert_eq!(after.plan.map(|p| p.status), Some(PlanStatus::Expired));
    assert!(!after.has_access);
    Ok(())
}

#[tokio::test]
async fn deleting_the_last_subscription_lead_revokes_the_plan() -> anyhow::Result<()> {
    let svc = service(Ledger::in_memory());
    svc.activate_plan(
        EMAIL,
        UserPlan::active(PlanName::Starter, Billing::Monthly, Utc::now()),
    )
    .await?;
    let lead = svc.leads().latest_for_email(EMAIL).await?.expect("lead");

    svc.delete_lead(&lead.id).await?;
    assert!(svc.plans().get(EMAIL).await?.is_none());
    assert!(svc.leads().for_email(EMAIL).await?.is_empty());

    let err = svc.delete_lead(&lead.id).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn raw_paths_address_nested_values() -> anyhow::Result<()> {
    let ledger = Ledger::in_memory();
    let svc = service(ledger.clone());
    svc.grant_credit(EMAIL, 5).await?;

    let key = bookforge::ledger::email_key(EMAIL);
    let value = ledger.try_get(&format!("credits/{key}")).await?;
    assert_eq!(value, Some(serde_json::json!(5)));

    ledger
        .try_set("settings/payment_bypass", serde_json::json!(true))
        .await?;
    assert!(svc.settings().payment_bypass().await);
    Ok(())
}
