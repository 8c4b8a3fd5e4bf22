use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AccrualError;

/// loan identifier
pub type LoanId = i64;

/// identifier of a charge instance attached to a loan
pub type LoanChargeId = i64;

/// identifier of the charge definition a loan charge was created from
pub type ChargeDefinitionId = i64;

/// identifier of a newly created ledger transaction
pub type TransactionId = Uuid;

/// which date of a charge decides its accrual eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccrualPolicy {
    /// charges accrue in the window containing their due date
    #[default]
    #[serde(rename = "due-date")]
    DueDate,
    /// charges accrue once submitted and their due date is reached by the schedule
    #[serde(rename = "submitted-date")]
    SubmittedDate,
}

impl AccrualPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccrualPolicy::DueDate => "due-date",
            AccrualPolicy::SubmittedDate => "submitted-date",
        }
    }
}

impl fmt::Display for AccrualPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccrualPolicy {
    type Err = AccrualError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "due-date" => Ok(AccrualPolicy::DueDate),
            "submitted-date" => Ok(AccrualPolicy::SubmittedDate),
            other => Err(AccrualError::InvalidConfiguration {
                message: format!("unknown accrual policy '{}'", other),
            }),
        }
    }
}

/// accounting rule of the loan product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AccountingMethod {
    None,
    Cash,
    AccrualUpfront,
    #[default]
    AccrualPeriodic,
}

impl AccountingMethod {
    pub fn is_cash_based(&self) -> bool {
        matches!(self, AccountingMethod::Cash)
    }

    pub fn is_upfront_accrual(&self) -> bool {
        matches!(self, AccountingMethod::AccrualUpfront)
    }

    pub fn is_periodic_accrual(&self) -> bool {
        matches!(self, AccountingMethod::AccrualPeriodic)
    }
}

/// loan status as seen by the interactive charge operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    SubmittedAndPendingApproval,
    Approved,
    Active,
    ClosedObligationsMet,
    ClosedWrittenOff,
    Overpaid,
}

impl LoanStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, LoanStatus::Active)
    }
}

/// how far an accrual run catches up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// accrue every due installment in full
    AsOfToday,
    /// accrue through `till_date`, prorating the first incomplete installment
    TillDate(NaiveDate),
}

/// ledger transaction kind created by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LedgerTransactionType {
    Accrual,
}
