//! Periodic income accrual.
//!
//! Interest, fee and penalty income are recognised per repayment period,
//! either for whole periods that are due or prorated up to a till date.

pub mod bridge;
pub mod builder;
pub mod interest_waiver;
pub mod pipeline;

pub use bridge::{AccountingBridgeData, BridgeChargePaid, BridgeTransaction};
pub use builder::{
    build_full_period, build_till_date, AccrualPosting, AccrualTransaction, ChargePaidBy, PreparedAccrual,
    ScheduleAccrualUpdate,
};
pub use interest_waiver::{reconcile_interest, InterestReconciliation};
pub use pipeline::{accrue_loan, prepare_accrual, LoanAccrualInput, LoanAccrualResult};
