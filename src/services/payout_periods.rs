use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::{
    error::{AppError, AppResult},
    repository::payout_store::PayoutStore,
    schemas::{ApprovalStatus, NewPayoutPeriod, PayoutPeriod},
    services::{
        money::{Money, MoneyError},
        period_schedule::PeriodBoundary,
    },
};

/// Grace window between a period closing and its automatic approval.
pub const APPROVAL_WINDOW_HOURS: i64 = 48;

const PERIOD_PAGE_SIZE: usize = 500;

/// Every stored period for a package, ordered by `period_index`, read in
/// keyset pages so no package is truncated by a row cap.
pub async fn load_payout_periods<S: PayoutStore>(
    store: &S,
    package_id: &str,
) -> AppResult<Vec<PayoutPeriod>> {
    let mut periods = Vec::new();
    let mut after_index = 0;
    loop {
        let page = store
            .list_payout_periods(package_id, after_index, PERIOD_PAGE_SIZE)
            .await?;
        let last_page = page.len() < PERIOD_PAGE_SIZE;
        if let Some(last) = page.last() {
            after_index = last.period_index;
        }
        periods.extend(page);
        if last_page {
            return Ok(periods);
        }
    }
}

/// The computed schedule for one package, one entry per period.
pub struct PeriodPlan<'a> {
    pub package_id: &'a str,
    pub boundaries: &'a [PeriodBoundary],
    pub gross_portions: &'a [Money],
    pub fee_allocations: &'a [Money],
}

/// Inserts whichever planned periods are not yet stored, in one batch, and
/// returns the stored periods as reloaded after the write.
///
/// Stored periods are never recomputed, so calling this repeatedly for the
/// same package is a no-op once every period exists.
pub async fn materialize_payout_periods<S: PayoutStore>(
    store: &S,
    plan: &PeriodPlan<'_>,
) -> AppResult<Vec<PayoutPeriod>> {
    let period_count = plan.boundaries.len();
    if plan.gross_portions.len() != period_count || plan.fee_allocations.len() != period_count {
        return Err(AppError::InvalidArgument(format!(
            "Invalid argument: {period_count} periods but {} gross portions and {} fee allocations.",
            plan.gross_portions.len(),
            plan.fee_allocations.len()
        )));
    }

    let existing = load_payout_periods(store, plan.package_id).await?;
    let stored_indexes = existing
        .iter()
        .map(|period| period.period_index)
        .collect::<HashSet<_>>();

    let mut missing = Vec::new();
    for position in 0..period_count {
        let period_index = i32::try_from(position + 1).map_err(|_| {
            AppError::InvalidArgument(format!(
                "Invalid argument: {period_count} payout periods."
            ))
        })?;
        if !stored_indexes.contains(&period_index) {
            missing.push(build_period(plan, position, period_index)?);
        }
    }

    if missing.is_empty() {
        return Ok(existing);
    }

    store.insert_payout_periods(&missing).await?;
    tracing::info!(
        package_id = plan.package_id,
        created = missing.len(),
        "Materialized payout periods"
    );

    load_payout_periods(store, plan.package_id).await
}

fn build_period(
    plan: &PeriodPlan<'_>,
    position: usize,
    period_index: i32,
) -> AppResult<NewPayoutPeriod> {
    let boundary = plan.boundaries[position];
    let gross = &plan.gross_portions[position];
    let fee = &plan.fee_allocations[position];
    let net_payable_amount = gross
        .amount
        .checked_sub(fee.amount)
        .ok_or(MoneyError::Overflow("net payable"))?;

    let approval_opened_at = boundary.end.and_time(NaiveTime::MIN).and_utc();
    Ok(NewPayoutPeriod {
        package_id: plan.package_id.to_string(),
        period_index,
        period_start: boundary.start,
        period_end: boundary.end,
        currency: gross.currency.clone(),
        gross_portion_amount: gross.amount,
        commission_deduction_amount: fee.amount,
        net_payable_amount,
        approval_status: ApprovalStatus::Pending,
        approval_opened_at,
        approval_deadline_at: approval_opened_at + Duration::hours(APPROVAL_WINDOW_HOURS),
    })
}

pub struct SweepOutcome {
    pub periods: Vec<PayoutPeriod>,
    pub auto_approved: usize,
}

/// Auto-approves every pending period whose deadline is at or before `now`,
/// one update per period, then reloads the package's periods if anything
/// changed.
pub async fn auto_approve_overdue_periods<S: PayoutStore>(
    store: &S,
    package_id: &str,
    periods: Vec<PayoutPeriod>,
    now: DateTime<Utc>,
) -> AppResult<SweepOutcome> {
    let overdue = periods
        .iter()
        .filter(|period| {
            period.approval_status == ApprovalStatus::Pending && period.approval_deadline_at <= now
        })
        .map(|period| period.id.clone())
        .collect::<Vec<_>>();

    if overdue.is_empty() {
        return Ok(SweepOutcome {
            periods,
            auto_approved: 0,
        });
    }

    let mut auto_approved = 0;
    for period_id in &overdue {
        if store.mark_period_auto_approved(period_id, now).await? {
            auto_approved += 1;
        }
    }
    if auto_approved > 0 {
        tracing::info!(package_id, auto_approved, "Auto-approved overdue payout periods");
    }

    Ok(SweepOutcome {
        periods: load_payout_periods(store, package_id).await?,
        auto_approved,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, Utc};

    use super::{
        auto_approve_overdue_periods, load_payout_periods, materialize_payout_periods, PeriodPlan,
        APPROVAL_WINDOW_HOURS,
    };
    use crate::{
        error::AppError,
        repository::memory_store::MemoryPayoutStore,
        schemas::{ApprovalStatus, PayoutPeriod},
        services::{
            money::{create_money, split_money_evenly, Money},
            period_schedule::{compute_period_boundaries, PayoutFrequency, PeriodBoundary},
        },
    };

    struct Fixture {
        boundaries: Vec<PeriodBoundary>,
        gross: Vec<Money>,
        fees: Vec<Money>,
    }

    impl Fixture {
        fn new(total: i64, fee: i64, count: i64) -> Self {
            let start = NaiveDate::from_ymd_opt(2026, 1, 5).expect("valid date");
            Self {
                boundaries: compute_period_boundaries(start, count, PayoutFrequency::Weekly)
                    .expect("boundaries"),
                gross: split_money_evenly(&create_money("GBP", total), count).expect("split"),
                fees: split_money_evenly(&create_money("GBP", fee), count).expect("split"),
            }
        }

        fn plan(&self) -> PeriodPlan<'_> {
            PeriodPlan {
                package_id: "pkg-1",
                boundaries: &self.boundaries,
                gross_portions: &self.gross,
                fee_allocations: &self.fees,
            }
        }
    }

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn materializes_every_period_with_consistent_amounts() {
        let store = MemoryPayoutStore::default();
        let fixture = Fixture::new(100_000, 10_001, 3);

        let periods = materialize_payout_periods(&store, &fixture.plan())
            .await
            .expect("materialized");

        assert_eq!(periods.len(), 3);
        assert_eq!(
            periods.iter().map(|p| p.period_index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for period in &periods {
            assert_eq!(
                period.net_payable.amount,
                period.gross_portion.amount - period.commission_deduction.amount
            );
            assert_eq!(period.approval_status, ApprovalStatus::Pending);
            assert_eq!(
                period.approval_opened_at,
                period.period_end.and_hms_opt(0, 0, 0).expect("midnight").and_utc()
            );
            assert_eq!(
                period.approval_deadline_at - period.approval_opened_at,
                Duration::hours(APPROVAL_WINDOW_HOURS)
            );
        }
        assert_eq!(
            periods.iter().map(|p| p.gross_portion.amount).sum::<i64>(),
            100_000
        );
        assert_eq!(
            periods
                .iter()
                .map(|p| p.commission_deduction.amount)
                .sum::<i64>(),
            10_001
        );
        assert_eq!(periods[0].commission_deduction.amount, 3_334);
        for pair in periods.windows(2) {
            assert_eq!(pair[0].period_end, pair[1].period_start);
        }
    }

    #[tokio::test]
    async fn second_materialization_creates_nothing() {
        let store = MemoryPayoutStore::default();
        let fixture = Fixture::new(120_000, 12_000, 12);

        let first = materialize_payout_periods(&store, &fixture.plan())
            .await
            .expect("first run");
        let second = materialize_payout_periods(&store, &fixture.plan())
            .await
            .expect("second run");

        assert_eq!(store.period_count(), 12);
        assert_eq!(store.insert_batches(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn only_missing_periods_are_added() {
        let seeded = Fixture::new(90_000, 0, 2);
        let store = MemoryPayoutStore::default();
        let existing = materialize_payout_periods(&store, &seeded.plan())
            .await
            .expect("seeded");

        // A later request computes a different split; stored rows must win.
        let fixture = Fixture::new(120_000, 12_000, 4);
        let periods = materialize_payout_periods(&store, &fixture.plan())
            .await
            .expect("materialized");

        assert_eq!(periods.len(), 4);
        assert_eq!(periods[0], existing[0]);
        assert_eq!(periods[1], existing[1]);
        assert_eq!(periods[2].gross_portion.amount, 30_000);
        assert_eq!(periods[2].period_index, 3);
        assert_eq!(store.insert_batches(), 2);
    }

    #[tokio::test]
    async fn failed_insert_aborts_materialization() {
        let store = MemoryPayoutStore::default();
        store.fail_inserts();
        let fixture = Fixture::new(120_000, 12_000, 12);

        let result = materialize_payout_periods(&store, &fixture.plan()).await;
        assert!(matches!(result, Err(AppError::Dependency(_))));
        assert_eq!(store.period_count(), 0);
    }

    #[tokio::test]
    async fn mismatched_plan_is_rejected() {
        let store = MemoryPayoutStore::default();
        let fixture = Fixture::new(120_000, 12_000, 3);
        let plan = PeriodPlan {
            package_id: "pkg-1",
            boundaries: &fixture.boundaries,
            gross_portions: &fixture.gross[..2],
            fee_allocations: &fixture.fees,
        };
        let result = materialize_payout_periods(&store, &plan).await;
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn long_packages_are_read_in_full_across_pages() {
        let store = MemoryPayoutStore::default();
        let fixture = Fixture::new(1_200_000, 120_000, 1_200);

        let first = materialize_payout_periods(&store, &fixture.plan())
            .await
            .expect("first run");
        assert_eq!(first.len(), 1_200);
        assert_eq!(first.last().map(|p| p.period_index), Some(1_200));
        assert_eq!(
            first.iter().map(|p| p.gross_portion.amount).sum::<i64>(),
            1_200_000
        );

        let second = materialize_payout_periods(&store, &fixture.plan())
            .await
            .expect("second run");
        assert_eq!(second, first);
        assert_eq!(store.period_count(), 1_200);
        assert_eq!(store.insert_batches(), 1);
    }

    #[tokio::test]
    async fn paged_load_stops_after_short_page() {
        let store = MemoryPayoutStore::default();
        let fixture = Fixture::new(1_000_000, 0, 1_000);
        materialize_payout_periods(&store, &fixture.plan())
            .await
            .expect("materialized");
        let reads_before = store.period_reads();

        let periods = load_payout_periods(&store, "pkg-1").await.expect("loaded");
        assert_eq!(periods.len(), 1_000);
        // Two full pages of 500, then an empty one.
        assert_eq!(store.period_reads() - reads_before, 3);
    }

    #[tokio::test]
    async fn concurrent_insert_of_same_index_is_a_conflict() {
        let store = MemoryPayoutStore::default().with_concurrent_insert("pkg-1", 2);
        let fixture = Fixture::new(30_000, 3_000, 3);

        let result = materialize_payout_periods(&store, &fixture.plan()).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(store.period_count(), 0);
        assert_eq!(store.insert_batches(), 0);
    }

    #[tokio::test]
    async fn net_payable_overflow_is_rejected() {
        let store = MemoryPayoutStore::default();
        let mut fixture = Fixture::new(30_000, 3_000, 1);
        fixture.gross[0].amount = i64::MIN;
        fixture.fees[0].amount = 1;

        let result = materialize_payout_periods(&store, &fixture.plan()).await;
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert_eq!(store.period_count(), 0);
    }

    async fn seeded_periods(store: &MemoryPayoutStore) -> Vec<PayoutPeriod> {
        let fixture = Fixture::new(30_000, 3_000, 3);
        materialize_payout_periods(store, &fixture.plan())
            .await
            .expect("materialized")
    }

    #[tokio::test]
    async fn deadline_equal_to_now_is_auto_approved() {
        let store = MemoryPayoutStore::default();
        let periods = seeded_periods(&store).await;
        // Period 1 ends 2026-01-12, so its deadline is 2026-01-14T00:00:00Z.
        let now = at("2026-01-14T00:00:00Z");
        assert_eq!(periods[0].approval_deadline_at, now);

        let outcome = auto_approve_overdue_periods(&store, "pkg-1", periods, now)
            .await
            .expect("sweep");

        assert_eq!(outcome.auto_approved, 1);
        assert_eq!(outcome.periods[0].approval_status, ApprovalStatus::AutoApproved);
        assert_eq!(outcome.periods[0].approved_at, Some(now));
        assert_eq!(outcome.periods[1].approval_status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn one_microsecond_early_stays_pending() {
        let store = MemoryPayoutStore::default();
        let periods = seeded_periods(&store).await;
        let now = at("2026-01-14T00:00:00Z") - Duration::microseconds(1);

        let outcome = auto_approve_overdue_periods(&store, "pkg-1", periods, now)
            .await
            .expect("sweep");

        assert_eq!(outcome.auto_approved, 0);
        assert!(outcome
            .periods
            .iter()
            .all(|period| period.approval_status == ApprovalStatus::Pending));
        assert_eq!(store.approval_updates(), 0);
    }

    #[tokio::test]
    async fn sweep_skips_settled_periods_and_is_idempotent() {
        let store = MemoryPayoutStore::default();
        let periods = seeded_periods(&store).await;
        store.set_period_status(1, ApprovalStatus::Approved);
        let periods = {
            let mut reloaded = periods;
            reloaded[0].approval_status = ApprovalStatus::Approved;
            reloaded
        };
        let now = at("2026-03-01T00:00:00Z");

        let first = auto_approve_overdue_periods(&store, "pkg-1", periods, now)
            .await
            .expect("first sweep");
        assert_eq!(first.auto_approved, 2);
        assert_eq!(first.periods[0].approval_status, ApprovalStatus::Approved);
        assert_eq!(first.periods[0].approved_at, None);
        assert_eq!(store.approval_updates(), 2);

        let second = auto_approve_overdue_periods(&store, "pkg-1", first.periods, now)
            .await
            .expect("second sweep");
        assert_eq!(second.auto_approved, 0);
        assert_eq!(store.approval_updates(), 2);
    }
}
