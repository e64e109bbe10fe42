use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::AppError;
use crate::services::money::{create_money, Money};
use crate::services::period_schedule::PayoutFrequency;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    Trainer,
    Customer,
}

impl ViewerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trainer => "trainer",
            Self::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateStatementInput {
    #[validate(length(min = 1, max = 64))]
    pub package_id: String,
    pub viewer_role: ViewerRole,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerPaymentMode {
    Upfront,
    Installments,
}

/// A row of `payment_packages`. Written by checkout; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub trainer_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub currency: String,
    pub final_price_amount: i64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub duration_weeks: Option<i64>,
    #[serde(default)]
    pub duration_months: Option<i64>,
    pub payout_frequency: PayoutFrequency,
    pub customer_payment_mode: CustomerPaymentMode,
}

impl Package {
    pub fn final_price(&self) -> Money {
        create_money(&self.currency, self.final_price_amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    AutoApproved,
}

impl ApprovalStatus {
    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }
}

/// A persisted slice of the payout schedule. Schedule fields are fixed at
/// insert time; only `approval_status` and `approved_at` change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPeriod {
    pub id: String,
    pub package_id: String,
    pub period_index: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub gross_portion: Money,
    pub commission_deduction: Money,
    pub net_payable: Money,
    pub approval_status: ApprovalStatus,
    pub approval_opened_at: DateTime<Utc>,
    pub approval_deadline_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

/// Insert payload for `payout_periods`; column names match the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPayoutPeriod {
    pub package_id: String,
    pub period_index: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub currency: String,
    pub gross_portion_amount: i64,
    pub commission_deduction_amount: i64,
    pub net_payable_amount: i64,
    pub approval_status: ApprovalStatus,
    pub approval_opened_at: DateTime<Utc>,
    pub approval_deadline_at: DateTime<Utc>,
}

/// A row of `customer_payments`. Written by the payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPayment {
    pub id: String,
    pub package_id: String,
    pub amount_value: i64,
    pub status: String,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

impl CustomerPayment {
    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Audit record for `payment_statement_views`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementView {
    pub package_id: String,
    pub viewer_id: String,
    pub viewer_role: ViewerRole,
    pub statement_data: Value,
    pub viewed_at: DateTime<Utc>,
}
