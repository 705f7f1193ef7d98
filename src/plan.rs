use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanName {
    Starter,
    Pro,
    Black,
}

impl PlanName {
    pub const ALL: [PlanName; 3] = [PlanName::Starter, PlanName::Pro, PlanName::Black];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "STARTER",
            Self::Pro => "PRO",
            Self::Black => "BLACK",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STARTER" => Some(Self::Starter),
            "PRO" => Some(Self::Pro),
            "BLACK" => Some(Self::Black),
            _ => None,
        }
    }

    /// Higher tiers get AI-written front matter; STARTER gets placeholders.
    pub fn writes_extras(self) -> bool {
        matches!(self, Self::Pro | Self::Black)
    }

    pub fn included_credits(self, billing: Billing) -> i64 {
        let monthly = match self {
            Self::Starter => 1,
            Self::Pro => 2,
            Self::Black => 4,
        };
        match billing {
            Billing::Monthly => monthly,
            Billing::Annual => monthly * 12,
        }
    }

    pub fn default_features(self) -> Vec<String> {
        let mut features = vec!["book_generation".to_owned(), "docx_export".to_owned()];
        if self.writes_extras() {
            features.push("ai_front_matter".to_owned());
            features.push("translations".to_owned());
        }
        if self == Self::Black {
            features.push("priority_support".to_owned());
        }
        features
    }
}

impl fmt::Display for PlanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Billing {
    Monthly,
    Annual,
}

impl Billing {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" | "mensal" => Some(Self::Monthly),
            "annual" | "yearly" | "anual" => Some(Self::Annual),
            _ => None,
        }
    }
}

impl fmt::Display for Billing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    Active,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlan {
    pub name: PlanName,
    pub billing: Billing,
    pub status: PlanStatus,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl UserPlan {
    pub fn active(name: PlanName, billing: Billing, start_date: DateTime<Utc>) -> Self {
        Self {
            name,
            billing,
            status: PlanStatus::Active,
            start_date,
            features: name.default_features(),
        }
    }

    /// Monthly plans run 31 days; annual plans run twelve calendar months.
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self.billing {
            Billing::Monthly => self.start_date + Duration::days(31),
            Billing::Annual => self
                .start_date
                .checked_add_months(Months::new(12))
                .unwrap_or(self.start_date + Duration::days(365)),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PlanStatus::Active && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    #[test]
    fn monthly_plan_expires_after_31_days() {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let plan = UserPlan::active(PlanName::Pro, Billing::Monthly, start);
        assert!(!plan.is_expired_at(start + Duration::days(30)));
        assert!(plan.is_expired_at(start + Duration::days(31)));
    }

    #[test]
    fn annual_plan_expires_after_a_year() {
        let start = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        let plan = UserPlan::active(PlanName::Black, Billing::Annual, start);
        assert_eq!(
            plan.expires_at(),
            Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn plan_serializes_with_wire_names() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let plan = UserPlan::active(PlanName::Starter, Billing::Annual, start);
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["name"], "STARTER");
        assert_eq!(value["billing"], "annual");
        assert_eq!(value["status"], "ACTIVE");
        assert!(value.get("startDate").is_some());
    }

    #[test]
    fn included_credits_scale_with_billing() {
        assert_eq!(PlanName::Starter.included_credits(Billing::Monthly), 1);
        assert_eq!(PlanName::Black.included_credits(Billing::Annual), 48);
    }
}
