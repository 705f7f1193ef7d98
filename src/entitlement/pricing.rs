use serde::Serialize;

use crate::plan::{Billing, PlanName};

/// Number of discount tiers in one usage cycle.
pub const CYCLE_LEN: usize = 4;

const BOOK: [i64; CYCLE_LEN] = [9_700, 8_700, 7_700, 6_700];

const STARTER_MONTHLY: [i64; CYCLE_LEN] = [4_700, 4_200, 3_700, 3_200];
const STARTER_ANNUAL: [i64; CYCLE_LEN] = [47_000, 42_000, 37_000, 32_000];
const PRO_MONTHLY: [i64; CYCLE_LEN] = [9_700, 8_700, 7_700, 6_700];
const PRO_ANNUAL: [i64; CYCLE_LEN] = [97_000, 87_000, 77_000, 67_000];
const BLACK_MONTHLY: [i64; CYCLE_LEN] = [19_700, 17_700, 15_700, 13_700];
const BLACK_ANNUAL: [i64; CYCLE_LEN] = [197_000, 177_000, 157_000, 137_000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Book,
    Plan { name: PlanName, billing: Billing },
}

impl Offer {
    fn table(self) -> &'static [i64; CYCLE_LEN] {
        match self {
            Self::Book => &BOOK,
            Self::Plan { name, billing } => match (name, billing) {
                (PlanName::Starter, Billing::Monthly) => &STARTER_MONTHLY,
                (PlanName::Starter, Billing::Annual) => &STARTER_ANNUAL,
                (PlanName::Pro, Billing::Monthly) => &PRO_MONTHLY,
                (PlanName::Pro, Billing::Annual) => &PRO_ANNUAL,
                (PlanName::Black, Billing::Monthly) => &BLACK_MONTHLY,
                (PlanName::Black, Billing::Annual) => &BLACK_ANNUAL,
            },
        }
    }

    fn slug(self) -> String {
        match self {
            Self::Book => "book".to_owned(),
            Self::Plan { name, billing } => {
                format!("{}-{}", name.as_str().to_ascii_lowercase(), billing.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub cents: i64,
    pub display: String,
    pub checkout_url: String,
}

/// Usage count `n` maps to tier `(n mod 4) + 1`.
pub fn cycle_index(usage_count: usize) -> usize {
    usage_count % CYCLE_LEN
}

pub fn discount_level(usage_count: usize) -> u8 {
    // cycle_index is always < 4
    (cycle_index(usage_count) + 1) as u8
}

pub fn price(checkout_base_url: &str, offer: Offer, cycle_index: usize) -> Price {
    let idx = cycle_index % CYCLE_LEN;
    let cents = offer.table()[idx];
    Price {
        cents,
        display: format_brl(cents),
        checkout_url: format!(
            "{}/{}-t{}",
            checkout_base_url.trim_end_matches('/'),
            offer.slug(),
            idx + 1
        ),
    }
}

fn format_brl(cents: i64) -> String {
    let units = cents / 100;
    let frac = (cents % 100).abs();
    let digits = units.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}R$ {grouped},{frac:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_counts_cycle_through_four_tiers() {
        let tiers: Vec<u8> = (0..=4).map(discount_level).collect();
        assert_eq!(tiers, vec![1, 2, 3, 4, 1]);
    }

    #[test]
    fn book_price_follows_tier() {
        let p = price("https://pay.example/c/", Offer::Book, 2);
        assert_eq!(p.cents, 7_700);
        assert_eq!(p.display, "R$ 77,00");
        assert_eq!(p.checkout_url, "https://pay.example/c/book-t3");
    }

    #[test]
    fn plan_price_uses_billing_table() {
        let offer = Offer::Plan {
            name: PlanName::Black,
            billing: Billing::Annual,
        };
        let p = price("https://pay.example", offer, 0);
        assert_eq!(p.cents, 197_000);
        assert_eq!(p.display, "R$ 1.970,00");
        assert_eq!(p.checkout_url, "https://pay.example/black-annual-t1");
    }
}
