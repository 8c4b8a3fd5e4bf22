use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::{CurrencyData, Money};
use crate::types::LoanId;

/// One accrual candidate: an installment of a loan with the accrual columns
/// already derived for it.
///
/// Rows are built fresh for every run from the schedule projection and are
/// never mutated; the apportionment and reconciliation stages return new
/// records built on top of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanScheduleAccrualData {
    pub loan_id: LoanId,
    pub office_id: i64,
    pub loan_product_id: i64,
    pub repayment_schedule_id: i64,
    pub installment_number: u32,
    pub from_date: NaiveDate,
    pub due_date: NaiveDate,
    /// the loan's accrued-till watermark when the row was read
    pub accrued_till: Option<NaiveDate>,
    pub interest_calculated_from: Option<NaiveDate>,
    /// nominal interest for the period
    pub interest_income: Option<Money>,
    pub accrued_interest_income: Option<Money>,
    pub accrued_fee_income: Option<Money>,
    pub accrued_penalty_income: Option<Money>,
    pub waived_interest_income: Option<Money>,
    pub credited_fee: Option<Money>,
    pub credited_penalty: Option<Money>,
    pub currency: CurrencyData,
}

impl LoanScheduleAccrualData {
    /// start of the interest-bearing part of the period
    pub fn interest_start_date(&self) -> NaiveDate {
        match self.interest_calculated_from {
            Some(from) if self.from_date < from => from.min(self.due_date),
            _ => self.from_date,
        }
    }

    pub fn has_waived_interest(&self) -> bool {
        self.waived_interest_income.is_some()
    }
}

/// interest waived on a schedule period, used to replay waiver consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestWaiverPeriod {
    pub due_date: NaiveDate,
    pub interest_waived: Money,
}

/// a waive-interest transaction recorded against the whole loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaiverTransaction {
    pub date: NaiveDate,
    /// part already matched to recognized income
    pub interest_portion: Money,
    /// part waived before it was ever accrued
    pub unrecognized_income_portion: Money,
}

/// period of the frozen, originally issued schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanSchedulePeriodData {
    pub loan_id: LoanId,
    pub due_date: NaiveDate,
    pub principal_due: Money,
    pub interest_due: Money,
    pub fee_charges_due: Money,
    pub penalty_charges_due: Money,
}

/// due / paid / waived / written-off figures of one schedule component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentBalance {
    pub due: Money,
    pub paid: Money,
    pub waived: Money,
    pub written_off: Money,
}

impl ComponentBalance {
    pub fn due(due: Money) -> Self {
        Self {
            due,
            ..Self::default()
        }
    }

    pub fn with_paid(mut self, paid: Money) -> Self {
        self.paid = paid;
        self
    }

    pub fn with_waived(mut self, waived: Money) -> Self {
        self.waived = waived;
        self
    }

    pub fn with_written_off(mut self, written_off: Money) -> Self {
        self.written_off = written_off;
        self
    }

    /// never negative; overpayment of a component is not arrears relief for another
    pub fn outstanding(&self) -> Money {
        self.due
            .saturating_sub(self.paid + self.waived + self.written_off)
    }
}

/// live repayment schedule installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentInstallment {
    pub installment_number: u32,
    pub from_date: NaiveDate,
    pub due_date: NaiveDate,
    pub principal: ComponentBalance,
    pub interest: ComponentBalance,
    pub fee: ComponentBalance,
    pub penalty: ComponentBalance,
}

impl RepaymentInstallment {
    pub fn total_outstanding(&self) -> Money {
        self.principal.outstanding()
            + self.interest.outstanding()
            + self.fee.outstanding()
            + self.penalty.outstanding()
    }

    pub fn is_fully_settled(&self) -> bool {
        self.total_outstanding().is_zero()
    }
}
