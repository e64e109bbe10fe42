use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const WEEKS_PER_MONTH: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutFrequency {
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodBoundary {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Number of payout periods for a package. Callers populate at most one of
/// the two durations; a package with neither gets a single period.
pub fn get_period_count(
    duration_weeks: Option<i64>,
    duration_months: Option<i64>,
    frequency: PayoutFrequency,
) -> AppResult<i64> {
    match (duration_weeks, duration_months, frequency) {
        (Some(weeks), _, PayoutFrequency::Weekly) => Ok(weeks),
        (Some(weeks), _, PayoutFrequency::Monthly) => Ok(ceil_div(weeks, WEEKS_PER_MONTH)),
        (None, Some(months), PayoutFrequency::Monthly) => Ok(months),
        (None, Some(months), PayoutFrequency::Weekly) => {
            months.checked_mul(WEEKS_PER_MONTH).ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "Invalid argument: {months} months is too long to schedule weekly."
                ))
            })
        }
        (None, None, _) => Ok(1),
    }
}

fn ceil_div(value: i64, divisor: i64) -> i64 {
    let quotient = value.div_euclid(divisor);
    if value.rem_euclid(divisor) == 0 {
        quotient
    } else {
        quotient + 1
    }
}

/// Contiguous period boundaries: every end is the next period's start.
///
/// Monthly offsets are calendar months counted from `start_date`, not one
/// month added to each period's own start. The two differ once a month end
/// clamps: a 31 January start yields 28 February then 31 March here, where
/// stepping from 28 February would give 28 March. Counting from the start
/// keeps every end equal to the next start without drifting earlier.
pub fn compute_period_boundaries(
    start_date: NaiveDate,
    count: i64,
    frequency: PayoutFrequency,
) -> AppResult<Vec<PeriodBoundary>> {
    let count = u32::try_from(count.max(0)).map_err(|_| {
        AppError::InvalidArgument(format!("Invalid argument: {count} payout periods."))
    })?;

    (0..count)
        .map(|index| {
            let start = offset_date(start_date, index, frequency)?;
            let end = offset_date(start_date, index + 1, frequency)?;
            Ok(PeriodBoundary { start, end })
        })
        .collect()
}

fn offset_date(start_date: NaiveDate, periods: u32, frequency: PayoutFrequency) -> AppResult<NaiveDate> {
    let shifted = match frequency {
        PayoutFrequency::Weekly => start_date.checked_add_days(Days::new(u64::from(periods) * 7)),
        PayoutFrequency::Monthly => start_date.checked_add_months(Months::new(periods)),
    };
    shifted.ok_or_else(|| {
        AppError::InvalidArgument(format!(
            "Invalid argument: payout schedule from {start_date} is out of range."
        ))
    })
}

pub fn duration_label(duration_weeks: Option<i64>, duration_months: Option<i64>) -> String {
    match (duration_weeks, duration_months) {
        (Some(1), _) => "1 week".to_string(),
        (Some(weeks), _) => format!("{weeks} weeks"),
        (None, Some(1)) => "1 month".to_string(),
        (None, Some(months)) => format!("{months} months"),
        (None, None) => "1 payout period".to_string(),
    }
}
