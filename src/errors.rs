use thiserror::Error;

use crate::decimal::Money;
use crate::types::{LoanChargeId, LoanId, LoanStatus};

/// why a charge waiver was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiveRefusal {
    LoanInactive,
    AlreadyWaived,
    AlreadyPaid,
}

impl std::fmt::Display for WaiveRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WaiveRefusal::LoanInactive => "loan inactive",
            WaiveRefusal::AlreadyWaived => "already waived",
            WaiveRefusal::AlreadyPaid => "already paid",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum AccrualError {
    #[error("loan not found: {loan_id}")]
    LoanNotFound {
        loan_id: LoanId,
    },

    #[error("loan charge not found: {charge_id}")]
    ChargeNotFound {
        charge_id: LoanChargeId,
    },

    #[error("installment {installment_number} not found for loan charge {charge_id}")]
    InstallmentNotFound {
        charge_id: LoanChargeId,
        installment_number: u32,
    },

    #[error("loan charge {charge_id} cannot be waived: {reason}")]
    ChargeCannotBeWaived {
        charge_id: LoanChargeId,
        reason: WaiveRefusal,
    },

    #[error("loan charge {charge_id} has no waiver to undo")]
    ChargeNotWaived {
        charge_id: LoanChargeId,
    },

    #[error("loan charge adjustment refused ({code}): {message}")]
    ChargeAdjustment {
        code: String,
        message: String,
    },

    #[error("invalid loan status for operation: {status:?}")]
    InvalidLoanStatus {
        status: LoanStatus,
    },

    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("invalid schedule data for loan {loan_id}: {message}")]
    InvalidSchedule {
        loan_id: LoanId,
        message: String,
    },

    #[error("concurrent update on loan {loan_id}: expected version {expected}, found {found}")]
    ConcurrencyConflict {
        loan_id: LoanId,
        expected: u64,
        found: u64,
    },

    #[error("loan {loan_id} still conflicting after {attempts} attempts")]
    RetriesExhausted {
        loan_id: LoanId,
        attempts: u32,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("journal entry posting failed for loan {loan_id}: {message}")]
    JournalPosting {
        loan_id: LoanId,
        message: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run failed for {failed} loan(s): {}", messages.join("; "))]
    RunFailed {
        failed: usize,
        messages: Vec<String>,
    },
}

impl AccrualError {
    /// conflicts that a fresh snapshot and recompute may resolve
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccrualError::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, AccrualError>;
