use serde::{Deserialize, Serialize};

use crate::services::money::{create_money, format_money, Money};

const DEFAULT_ONBOARDING_PERCENT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    HighSubNoOnboarding,
    LowSubWithOnboarding,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Fixed,
    Percent,
    #[serde(other)]
    Unknown,
}

/// A row of `trainer_membership_settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSettings {
    pub trainer_id: String,
    pub plan_type: PlanType,
    #[serde(default)]
    pub onboarding_fee_kind: Option<FeeKind>,
    /// Minor units for `fixed`, whole percent for `percent`.
    #[serde(default)]
    pub onboarding_fee_value: Option<i64>,
}

/// Returns the stored settings, or the default plan for trainers that never
/// chose one.
pub fn resolve_membership(row: Option<MembershipSettings>, trainer_id: &str) -> MembershipSettings {
    row.unwrap_or_else(|| MembershipSettings {
        trainer_id: trainer_id.to_string(),
        plan_type: PlanType::LowSubWithOnboarding,
        onboarding_fee_kind: Some(FeeKind::Percent),
        onboarding_fee_value: Some(DEFAULT_ONBOARDING_PERCENT),
    })
}

pub fn compute_onboarding_fee(final_price: &Money, membership: &MembershipSettings) -> Money {
    let zero = create_money(&final_price.currency, 0);
    if membership.plan_type != PlanType::LowSubWithOnboarding {
        return zero;
    }

    match (membership.onboarding_fee_kind, membership.onboarding_fee_value) {
        (Some(FeeKind::Fixed), Some(value)) => create_money(&final_price.currency, value),
        (Some(FeeKind::Percent), Some(percent)) => create_money(
            &final_price.currency,
            percent_of_rounded(final_price.amount, percent),
        ),
        _ => zero,
    }
}

/// `round(amount * percent / 100)` with halves rounded towards positive
/// infinity, evaluated exactly in integers.
fn percent_of_rounded(amount: i64, percent: i64) -> i64 {
    let scaled = i128::from(amount) * i128::from(percent);
    let rounded = (2 * scaled + 100).div_euclid(200);
    i64::try_from(rounded).unwrap_or(if rounded < 0 { i64::MIN } else { i64::MAX })
}

pub fn membership_plan_blurb(membership: &MembershipSettings, currency: &str) -> String {
    match membership.plan_type {
        PlanType::HighSubNoOnboarding => {
            "High subscription plan: no onboarding commission is deducted from your payouts."
                .to_string()
        }
        PlanType::LowSubWithOnboarding => {
            match (membership.onboarding_fee_kind, membership.onboarding_fee_value) {
                (Some(FeeKind::Percent), Some(percent)) => format!(
                    "Low subscription plan: a {percent}% onboarding commission is deducted evenly across your payout periods."
                ),
                (Some(FeeKind::Fixed), Some(value)) => format!(
                    "Low subscription plan: a {} onboarding commission is deducted evenly across your payout periods.",
                    format_money(&create_money(currency, value))
                ),
                _ => "Low subscription plan: no onboarding commission is configured.".to_string(),
            }
        }
        PlanType::Unknown => {
            "Unrecognised membership plan: no onboarding commission is deducted.".to_string()
        }
    }
}
