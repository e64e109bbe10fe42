//! In-process `PayoutStore` used by the engine tests.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::{
    error::{AppError, AppResult},
    repository::payout_store::PayoutStore,
    schemas::{
        ApprovalStatus, CustomerPayment, NewPayoutPeriod, Package, PayoutPeriod, StatementView,
    },
    services::{fee_policy::MembershipSettings, money::create_money},
};

fn stored_period(period: &NewPayoutPeriod) -> PayoutPeriod {
    PayoutPeriod {
        id: uuid::Uuid::new_v4().to_string(),
        package_id: period.package_id.clone(),
        period_index: period.period_index,
        period_start: period.period_start,
        period_end: period.period_end,
        gross_portion: create_money(&period.currency, period.gross_portion_amount),
        commission_deduction: create_money(&period.currency, period.commission_deduction_amount),
        net_payable: create_money(&period.currency, period.net_payable_amount),
        approval_status: period.approval_status,
        approval_opened_at: period.approval_opened_at,
        approval_deadline_at: period.approval_deadline_at,
        approved_at: None,
    }
}

#[derive(Default)]
struct Tables {
    packages: Vec<Package>,
    memberships: Vec<MembershipSettings>,
    periods: Vec<PayoutPeriod>,
    payments: Vec<CustomerPayment>,
    views: Vec<StatementView>,
    // Rows committed by another writer but not yet visible to reads.
    concurrent_indexes: Vec<(String, i32)>,
    insert_batches: usize,
    approval_updates: usize,
    period_reads: usize,
    fail_inserts: bool,
}

#[derive(Default)]
pub struct MemoryPayoutStore {
    tables: Mutex<Tables>,
}

impl MemoryPayoutStore {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory store lock poisoned")
    }

    pub fn with_package(self, package: Package) -> Self {
        self.tables().packages.push(package);
        self
    }

    pub fn with_membership(self, membership: MembershipSettings) -> Self {
        self.tables().memberships.push(membership);
        self
    }

    pub fn with_payment(self, payment: CustomerPayment) -> Self {
        self.tables().payments.push(payment);
        self
    }

    pub fn with_concurrent_insert(self, package_id: &str, period_index: i32) -> Self {
        self.tables()
            .concurrent_indexes
            .push((package_id.to_string(), period_index));
        self
    }

    pub fn fail_inserts(&self) {
        self.tables().fail_inserts = true;
    }

    pub fn set_period_status(&self, period_index: i32, status: ApprovalStatus) {
        for period in self
            .tables()
            .periods
            .iter_mut()
            .filter(|period| period.period_index == period_index)
        {
            period.approval_status = status;
        }
    }

    pub fn period_count(&self) -> usize {
        self.tables().periods.len()
    }

    pub fn insert_batches(&self) -> usize {
        self.tables().insert_batches
    }

    pub fn period_reads(&self) -> usize {
        self.tables().period_reads
    }

    pub fn approval_updates(&self) -> usize {
        self.tables().approval_updates
    }

    pub fn views(&self) -> Vec<StatementView> {
        self.tables().views.clone()
    }
}

impl PayoutStore for MemoryPayoutStore {
    async fn fetch_package(&self, package_id: &str) -> AppResult<Option<Package>> {
        Ok(self
            .tables()
            .packages
            .iter()
            .find(|package| package.id == package_id)
            .cloned())
    }

    async fn fetch_membership(&self, trainer_id: &str) -> AppResult<Option<MembershipSettings>> {
        Ok(self
            .tables()
            .memberships
            .iter()
            .find(|membership| membership.trainer_id == trainer_id)
            .cloned())
    }

    async fn list_payout_periods(
        &self,
        package_id: &str,
        after_index: i32,
        limit: usize,
    ) -> AppResult<Vec<PayoutPeriod>> {
        let mut tables = self.tables();
        tables.period_reads += 1;
        let mut periods = tables
            .periods
            .iter()
            .filter(|period| period.package_id == package_id && period.period_index > after_index)
            .cloned()
            .collect::<Vec<_>>();
        periods.sort_by_key(|period| period.period_index);
        periods.truncate(limit);
        Ok(periods)
    }

    async fn insert_payout_periods(&self, periods: &[NewPayoutPeriod]) -> AppResult<()> {
        let mut tables = self.tables();
        if tables.fail_inserts {
            return Err(AppError::Dependency("Database operation failed.".to_string()));
        }
        let collides = periods.iter().enumerate().any(|(position, candidate)| {
            tables.periods.iter().any(|existing| {
                existing.package_id == candidate.package_id
                    && existing.period_index == candidate.period_index
            }) || tables.concurrent_indexes.iter().any(|(package_id, period_index)| {
                *package_id == candidate.package_id && *period_index == candidate.period_index
            }) || periods[..position].iter().any(|earlier| {
                earlier.package_id == candidate.package_id
                    && earlier.period_index == candidate.period_index
            })
        });
        if collides {
            return Err(AppError::Conflict(
                "Duplicate value violates a unique constraint.".to_string(),
            ));
        }

        tables.insert_batches += 1;
        for period in periods {
            tables.periods.push(stored_period(period));
        }
        Ok(())
    }

    async fn mark_period_auto_approved(
        &self,
        period_id: &str,
        approved_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tables = self.tables();
        tables.approval_updates += 1;
        let Some(period) = tables.periods.iter_mut().find(|period| period.id == period_id) else {
            return Ok(false);
        };
        if period.approval_status != ApprovalStatus::Pending {
            return Ok(false);
        }
        period.approval_status = ApprovalStatus::AutoApproved;
        period.approved_at = Some(approved_at);
        Ok(true)
    }

    async fn list_customer_payments(&self, package_id: &str) -> AppResult<Vec<CustomerPayment>> {
        Ok(self
            .tables()
            .payments
            .iter()
            .filter(|payment| payment.package_id == package_id)
            .cloned()
            .collect())
    }

    async fn record_statement_view(&self, view: &StatementView) -> AppResult<()> {
        self.tables().views.push(view.clone());
        Ok(())
    }
}
