use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{create_row, create_rows, find_row, list_rows, map_db_error},
    schemas::{
        ApprovalStatus, CustomerPayment, NewPayoutPeriod, Package, PayoutPeriod, StatementView,
    },
    services::{fee_policy::MembershipSettings, money::create_money},
};

const MAX_ROWS: i64 = 1000;

/// Persistence operations the statement engine depends on.
///
/// Reads always return the current stored state; writers never hand back
/// locally patched copies, callers reload instead.
pub trait PayoutStore {
    fn fetch_package(&self, package_id: &str)
        -> impl Future<Output = AppResult<Option<Package>>> + Send;

    fn fetch_membership(
        &self,
        trainer_id: &str,
    ) -> impl Future<Output = AppResult<Option<MembershipSettings>>> + Send;

    /// One page of periods with `period_index > after_index`, ordered by
    /// `period_index` and at most `limit` long.
    fn list_payout_periods(
        &self,
        package_id: &str,
        after_index: i32,
        limit: usize,
    ) -> impl Future<Output = AppResult<Vec<PayoutPeriod>>> + Send;

    /// One batch; a `(package_id, period_index)` collision fails the whole call.
    fn insert_payout_periods(
        &self,
        periods: &[NewPayoutPeriod],
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// Moves a still-pending period to `auto_approved`. Returns whether this
    /// call performed the transition.
    fn mark_period_auto_approved(
        &self,
        period_id: &str,
        approved_at: DateTime<Utc>,
    ) -> impl Future<Output = AppResult<bool>> + Send;

    fn list_customer_payments(
        &self,
        package_id: &str,
    ) -> impl Future<Output = AppResult<Vec<CustomerPayment>>> + Send;

    fn record_statement_view(
        &self,
        view: &StatementView,
    ) -> impl Future<Output = AppResult<()>> + Send;
}

#[derive(Clone)]
pub struct PgPayoutStore {
    pool: PgPool,
}

impl PgPayoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Deserialize)]
struct PayoutPeriodRow {
    id: String,
    package_id: String,
    period_index: i32,
    period_start: NaiveDate,
    period_end: NaiveDate,
    currency: String,
    gross_portion_amount: i64,
    commission_deduction_amount: i64,
    net_payable_amount: i64,
    approval_status: ApprovalStatus,
    approval_opened_at: DateTime<Utc>,
    approval_deadline_at: DateTime<Utc>,
    #[serde(default)]
    approved_at: Option<DateTime<Utc>>,
}

impl From<PayoutPeriodRow> for PayoutPeriod {
    fn from(row: PayoutPeriodRow) -> Self {
        Self {
            id: row.id,
            package_id: row.package_id,
            period_index: row.period_index,
            period_start: row.period_start,
            period_end: row.period_end,
            gross_portion: create_money(&row.currency, row.gross_portion_amount),
            commission_deduction: create_money(&row.currency, row.commission_deduction_amount),
            net_payable: create_money(&row.currency, row.net_payable_amount),
            approval_status: row.approval_status,
            approval_opened_at: row.approval_opened_at,
            approval_deadline_at: row.approval_deadline_at,
            approved_at: row.approved_at,
        }
    }
}

impl PayoutStore for PgPayoutStore {
    async fn fetch_package(&self, package_id: &str) -> AppResult<Option<Package>> {
        find_row(&self.pool, "payment_packages", package_id, "id")
            .await?
            .map(|row| decode_row("payment_packages", row))
            .transpose()
    }

    async fn fetch_membership(&self, trainer_id: &str) -> AppResult<Option<MembershipSettings>> {
        find_row(
            &self.pool,
            "trainer_membership_settings",
            trainer_id,
            "trainer_id",
        )
        .await?
        .map(|row| decode_row("trainer_membership_settings", row))
        .transpose()
    }

    async fn list_payout_periods(
        &self,
        package_id: &str,
        after_index: i32,
        limit: usize,
    ) -> AppResult<Vec<PayoutPeriod>> {
        let limit = i64::try_from(limit).unwrap_or(MAX_ROWS).clamp(1, MAX_ROWS);
        let rows = sqlx::query_scalar::<_, Option<Value>>(
            "SELECT row_to_json(t) AS row
             FROM payout_periods t
             WHERE t.package_id = $1::uuid AND t.period_index > $2
             ORDER BY t.period_index ASC
             LIMIT $3",
        )
        .bind(package_id)
        .bind(after_index)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        rows.into_iter()
            .flatten()
            .map(|row| decode_row::<PayoutPeriodRow>("payout_periods", row).map(PayoutPeriod::from))
            .collect()
    }

    async fn insert_payout_periods(&self, periods: &[NewPayoutPeriod]) -> AppResult<()> {
        let payloads = periods
            .iter()
            .map(encode_row)
            .collect::<AppResult<Vec<_>>>()?;
        create_rows(&self.pool, "payout_periods", &payloads).await?;
        Ok(())
    }

    async fn mark_period_auto_approved(
        &self,
        period_id: &str,
        approved_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE payout_periods
             SET approval_status = 'auto_approved', approved_at = $2
             WHERE id = $1::uuid AND approval_status = 'pending'",
        )
        .bind(period_id)
        .bind(approved_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_customer_payments(&self, package_id: &str) -> AppResult<Vec<CustomerPayment>> {
        let rows = list_rows(
            &self.pool,
            "customer_payments",
            Some(&package_filter(package_id)),
            MAX_ROWS,
            "paid_at",
            true,
        )
        .await?;
        rows.into_iter()
            .map(|row| decode_row("customer_payments", row))
            .collect()
    }

    async fn record_statement_view(&self, view: &StatementView) -> AppResult<()> {
        create_row(&self.pool, "payment_statement_views", &encode_row(view)?).await?;
        Ok(())
    }
}

fn package_filter(package_id: &str) -> Map<String, Value> {
    let mut filters = Map::new();
    filters.insert(
        "package_id".to_string(),
        Value::String(package_id.to_string()),
    );
    filters
}

fn decode_row<T: DeserializeOwned>(table: &str, row: Value) -> AppResult<T> {
    serde_json::from_value(row).map_err(|error| {
        tracing::error!(table, error = %error, "Stored row does not match the expected shape");
        AppError::Internal(format!("Malformed {table} record."))
    })
}

fn encode_row<T: serde::Serialize>(value: &T) -> AppResult<Map<String, Value>> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::Internal("Row payload must be an object.".to_string())),
        Err(error) => Err(AppError::Internal(format!("Could not encode row: {error}"))),
    }
}
