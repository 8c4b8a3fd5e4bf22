pub mod accrual;
pub mod arrears;
pub mod batch;
pub mod charges;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod schedule;
pub mod store;
pub mod types;

// re-export key types
pub use accrual::{
    accrue_loan, reconcile_interest, AccountingBridgeData, AccrualPosting, AccrualTransaction, ChargePaidBy,
    InterestReconciliation, LoanAccrualInput, LoanAccrualResult,
};
pub use arrears::{
    update_arrears, ArrearsChange, ArrearsRow, ArrearsTrigger, LoanArrearsProfile, LoanBusinessEvent,
    LoanRepaymentTotals,
};
pub use batch::{group_candidates_by_loan, AccrualBatch, LoanAccrualSummary, RunSummary};
pub use charges::{
    adjust_charge, apportion_charges, undo_waive_charge, waive_charge, AccrualWindow, ChargeApportionment,
    LoanChargeData, LoanInstallmentChargeData, WaiveChargeOutcome,
};
pub use config::{AccrualSettings, ArrearsSettings, ConfigurationProvider, RetryPolicy};
pub use decimal::{CurrencyData, Money, MoneyRounding};
pub use errors::{AccrualError, Result, WaiveRefusal};
pub use events::{BusinessEventSink, EventStore, LoanEvent};
pub use schedule::{
    ComponentBalance, InterestWaiverPeriod, LoanScheduleAccrualData, LoanSchedulePeriodData, RepaymentInstallment,
    WaiverTransaction,
};
pub use store::{
    AccrualStore, ArrearsStore, JournalEntrySink, LoanAccrualCommit, LoanAccrualSnapshot, MemoryLoan, MemoryStore,
    RecordingJournal,
};
pub use types::{
    AccountingMethod, AccrualPolicy, ChargeDefinitionId, LoanChargeId, LoanId, LoanStatus, RunMode, TransactionId,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
