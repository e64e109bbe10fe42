pub mod fee_policy;
pub mod money;
pub mod payout_periods;
pub mod period_schedule;
pub mod statements;
