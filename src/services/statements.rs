use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::{
    auth::Viewer,
    error::{AppError, AppResult},
    repository::payout_store::PayoutStore,
    schemas::{
        CustomerPayment, CustomerPaymentMode, GenerateStatementInput, Package, PayoutPeriod,
        StatementView, ViewerRole,
    },
    services::{
        fee_policy::{compute_onboarding_fee, membership_plan_blurb, resolve_membership},
        money::{create_money, split_money_evenly, Money, MoneyError},
        payout_periods::{auto_approve_overdue_periods, materialize_payout_periods, PeriodPlan},
        period_schedule::{compute_period_boundaries, duration_label, get_period_count, PayoutFrequency},
    },
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementTotals {
    pub package_gross: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_onboarding_total: Option<Money>,
    pub trainer_net_total: Money,
    pub customer_paid_to_date: Money,
    pub customer_outstanding: Money,
    pub trainer_paid_out_to_date: Money,
    pub trainer_outstanding: Money,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub package_id: String,
    pub role: ViewerRole,
    pub package_title: String,
    pub package_start_date: NaiveDate,
    pub payout_frequency: PayoutFrequency,
    pub duration_label: String,
    pub generated_at: String,
    pub totals: StatementTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membership_plan_blurb: Option<String>,
    pub customer_payments: Vec<CustomerPayment>,
    pub payout_schedule: Vec<PayoutPeriod>,
}

/// Builds the role-scoped statement for one package, materializing and
/// sweeping its payout periods on the way, and records who viewed it.
///
/// Any failure aborts the whole statement; no partial figures are returned.
pub async fn generate_statement<S: PayoutStore>(
    store: &S,
    viewer: &Viewer,
    input: &GenerateStatementInput,
    display_timezone: Tz,
    now: DateTime<Utc>,
) -> AppResult<Statement> {
    let package_id = input.package_id.trim();
    let role = input.viewer_role;

    let package = step("load_package", package_id, async {
        store.fetch_package(package_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Payment package {package_id} not found."))
        })
    })
    .await?;
    step("authorize", package_id, async {
        authorize_viewer(&package, viewer, role)
    })
    .await?;

    let membership = resolve_membership(
        step("load_membership", package_id, store.fetch_membership(&package.trainer_id)).await?,
        &package.trainer_id,
    );
    let final_price = package.final_price();
    let onboarding_fee = compute_onboarding_fee(&final_price, &membership);

    let (boundaries, gross_portions, fee_allocations) = step("schedule", package_id, async {
        let period_count = get_period_count(
            package.duration_weeks,
            package.duration_months,
            package.payout_frequency,
        )?;
        Ok::<_, AppError>((
            compute_period_boundaries(package.start_date, period_count, package.payout_frequency)?,
            split_money_evenly(&final_price, period_count)?,
            split_money_evenly(&onboarding_fee, period_count)?,
        ))
    })
    .await?;

    let plan = PeriodPlan {
        package_id: &package.id,
        boundaries: &boundaries,
        gross_portions: &gross_portions,
        fee_allocations: &fee_allocations,
    };
    let periods = step(
        "materialize_periods",
        package_id,
        materialize_payout_periods(store, &plan),
    )
    .await?;
    let sweep = step(
        "auto_approve",
        package_id,
        auto_approve_overdue_periods(store, &package.id, periods, now),
    )
    .await?;
    let payments = step(
        "load_payments",
        package_id,
        store.list_customer_payments(&package.id),
    )
    .await?;

    let totals = step("totals", package_id, async {
        compute_totals(&package, &onboarding_fee, &payments, &sweep.periods, role)
    })
    .await?;
    let statement = Statement {
        package_id: package.id.clone(),
        role,
        package_title: package
            .title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| "Training package".to_string()),
        package_start_date: package.start_date,
        payout_frequency: package.payout_frequency,
        duration_label: duration_label(package.duration_weeks, package.duration_months),
        generated_at: now.with_timezone(&display_timezone).to_rfc3339(),
        totals,
        membership_plan_blurb: (role == ViewerRole::Trainer)
            .then(|| membership_plan_blurb(&membership, &final_price.currency)),
        customer_payments: payments,
        payout_schedule: sweep.periods,
    };

    step("record_view", package_id, async {
        let statement_data = serde_json::to_value(&statement).map_err(|error| {
            AppError::Internal(format!("Could not encode statement snapshot: {error}"))
        })?;
        store
            .record_statement_view(&StatementView {
                package_id: package.id.clone(),
                viewer_id: viewer.id.clone(),
                viewer_role: role,
                statement_data,
                viewed_at: now,
            })
            .await
    })
    .await?;

    tracing::info!(
        package_id = %package.id,
        role = role.as_str(),
        periods = statement.payout_schedule.len(),
        auto_approved = sweep.auto_approved,
        "Generated payment statement"
    );
    Ok(statement)
}

async fn step<T>(
    label: &'static str,
    package_id: &str,
    work: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    work.await.inspect_err(|error| {
        tracing::error!(step = label, package_id, error = %error, "Payment statement generation failed");
    })
}

fn authorize_viewer(package: &Package, viewer: &Viewer, role: ViewerRole) -> AppResult<()> {
    let owner_id = match role {
        ViewerRole::Trainer => &package.trainer_id,
        ViewerRole::Customer => &package.customer_id,
    };
    if owner_id == &viewer.id {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "Forbidden: you are not the {} on this package.",
        role.as_str()
    )))
}

fn compute_totals(
    package: &Package,
    onboarding_fee: &Money,
    payments: &[CustomerPayment],
    periods: &[PayoutPeriod],
    role: ViewerRole,
) -> AppResult<StatementTotals> {
    let currency = package.currency.as_str();
    let gross = package.final_price_amount;

    let customer_paid = checked_total(
        payments
            .iter()
            .filter(|payment| payment.succeeded())
            .map(|payment| payment.amount_value),
        "customer paid to date",
    )?;
    let customer_outstanding = match package.customer_payment_mode {
        CustomerPaymentMode::Upfront => 0,
        CustomerPaymentMode::Installments => gross
            .checked_sub(customer_paid)
            .ok_or(MoneyError::Overflow("customer outstanding"))?,
    };

    let trainer_paid_out = checked_total(
        periods
            .iter()
            .filter(|period| period.approval_status.is_approved())
            .map(|period| period.net_payable.amount),
        "trainer paid out to date",
    )?;
    let trainer_net_total = gross
        .checked_sub(onboarding_fee.amount)
        .ok_or(MoneyError::Overflow("trainer net total"))?;
    let trainer_outstanding = trainer_net_total
        .checked_sub(trainer_paid_out)
        .ok_or(MoneyError::Overflow("trainer outstanding"))?;

    Ok(StatementTotals {
        package_gross: create_money(currency, gross),
        commission_onboarding_total: (role == ViewerRole::Trainer)
            .then(|| create_money(currency, onboarding_fee.amount)),
        trainer_net_total: create_money(currency, trainer_net_total),
        customer_paid_to_date: create_money(currency, customer_paid),
        customer_outstanding: create_money(currency, customer_outstanding),
        trainer_paid_out_to_date: create_money(currency, trainer_paid_out),
        trainer_outstanding: create_money(currency, trainer_outstanding),
    })
}

fn checked_total(
    mut amounts: impl Iterator<Item = i64>,
    label: &'static str,
) -> Result<i64, MoneyError> {
    amounts
        .try_fold(0_i64, |total, amount| total.checked_add(amount))
        .ok_or(MoneyError::Overflow(label))
}
